//! Diagnostic rerun of a failing case
//!
//! The first wrong answer or runtime error of a submission is run once more
//! with doubled limits so the user sees how the program ends when it is not
//! cut short: its exit status or signal and the head of its stderr. Rejudges
//! skip this.

use tracing::{debug, warn};

use super::JudgeContext;
use crate::core::message::Message;
use crate::core::utils::{signal_name, truncate};
use crate::engine::executer::{self, Parameter};
use crate::jobs::report::NextEvent;

/// Bytes of stderr kept in the report
pub const STDERR_MAX: usize = 1024;

/// Rerun `param` with doubled limits and report what happened
pub async fn analyze(ctx: &JudgeContext, param: Parameter, case_id: u32) {
    if ctx.meta.is_rejudge || !ctx.claim_analysis() {
        return;
    }
    debug!("Analyzing case {} of {}", case_id, ctx.rid);

    let (time_ms, memory_mb) = (param.time_ms * 2, param.memory_mb * 2);
    let param = param.with_limits(time_ms, memory_mb);
    let outcome = match executer::run(ctx.sandbox.as_ref(), param).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Analysis of {} failed: {}", ctx.rid, e);
            return;
        }
    };
    outcome.release(ctx.sandbox.as_ref()).await;

    let ending = match (outcome.signalled, signal_name(outcome.code)) {
        (true, Some(signal)) => format!("killed by {}", signal),
        _ => format!("exit code {}", outcome.code),
    };
    let mut text = format!(
        "{} with doubled limits, {} ({:.0}ms, {:.0}KB).",
        outcome.status, ending, outcome.time_ms, outcome.memory_kb
    );
    let stderr = outcome.stderr.trim();
    if !stderr.is_empty() {
        text.push('\n');
        text.push_str(truncate(stderr, STDERR_MAX));
    }
    ctx.next(NextEvent::message(Message::with_params(
        "Analysis of case {0}: {1}",
        vec![case_id.to_string(), text],
    )));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sandbox::{mock, SandboxStatus};
    use crate::judge::context::JudgeMeta;
    use crate::judge::testing::Fixture;

    #[tokio::test]
    async fn test_analysis_runs_once() {
        let fixture = Fixture::new(|_| {
            let mut result = mock::with_status(SandboxStatus::Signalled, 5);
            result.exit_status = 11;
            result.files.insert("stderr".into(), "segfault at 0x0".into());
            result
        });
        let ctx = fixture.context();
        analyze(&ctx, Parameter::new(["${dir}/foo"]).with_limits(1000, 256), 2).await;
        analyze(&ctx, Parameter::new(["${dir}/foo"]).with_limits(1000, 256), 3).await;

        let commands = fixture.mock.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].cpu_limit, 2_000_000_000);
        let messages = fixture.reporter.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Analysis of case 2: runtime_error with doubled limits, killed by SIGSEGV"));
        assert!(messages[0].ends_with("segfault at 0x0"));
    }

    #[tokio::test]
    async fn test_rejudge_skips_analysis() {
        let fixture = Fixture::new(|_| mock::ok(""));
        let ctx = fixture.context().with_meta(JudgeMeta {
            is_rejudge: true,
            ..Default::default()
        });
        analyze(&ctx, Parameter::new(["a"]), 1).await;
        assert!(fixture.mock.commands().is_empty());
    }
}
