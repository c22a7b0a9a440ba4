//! Ad hoc runs on user-provided input
//!
//! No test data is involved: the submission runs once on the given stdin
//! with doubled problem time, and its output is forwarded as it arrives.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use super::analysis::analyze;
use super::default::solution_param;
use super::{classify, runtime_message, JudgeContext, Strategy};
use crate::core::status::Status;
use crate::engine::executer;
use crate::engine::sandbox::CopyInFile;
use crate::error::Result;
use crate::jobs::report::{EndEvent, NextEvent};

pub struct Run;

#[async_trait]
impl Strategy for Run {
    fn name(&self) -> &'static str {
        "run"
    }

    async fn judge(&self, ctx: &JudgeContext) -> Result<()> {
        ctx.next(NextEvent::status(Status::Compiling));
        let execute = ctx.compile_user().await?;
        ctx.next(NextEvent::progress(Status::Judging, 0.0));

        let stdin = CopyInFile::content(ctx.input.clone().unwrap_or_default());
        let param = solution_param(
            ctx,
            &execute,
            stdin,
            ctx.config.time_ms * 2,
            ctx.config.memory_mb,
        );
        let mut forward = |_index: usize, _fd: usize, chunk: Bytes| {
            ctx.next(NextEvent::message(String::from_utf8_lossy(&chunk).into_owned()));
        };
        let outcome = executer::run_streamed(ctx.sandbox.as_ref(), param.clone(), &mut forward).await?;
        outcome.release(ctx.sandbox.as_ref()).await;

        let status = classify(&outcome, param.time_ms, param.memory_mb);
        info!("Run {} ended {} in {:.1}ms", ctx.rid, status, outcome.time_ms);
        let mut end = EndEvent::new(status, 0.0).with_usage(outcome.time_ms, outcome.memory_kb);
        if status == Status::RuntimeError {
            end = end.with_message(runtime_message(&outcome));
            analyze(ctx, param, 1).await;
        }
        ctx.end(end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::engine::sandbox::mock;
    use crate::jobs::testdata::ParsedConfig;
    use crate::judge::testing::Fixture;

    #[tokio::test]
    async fn test_output_forwarded() {
        let fixture = Fixture::new(|call| mock::exited(0, call.stdin.to_uppercase(), "note"));
        let ctx = fixture
            .context()
            .with_code("python", CopyInFile::content("print(input().upper())"))
            .with_config(ParsedConfig::default(), fixture.dir.path())
            .with_input(Some("hello".into()));
        Run.judge(&ctx).await.unwrap();

        assert_eq!(fixture.reporter.messages(), vec!["HELLO", "note"]);
        let end = fixture.reporter.last_end();
        assert_eq!(end.status, Status::Accepted);
        // python: 2s * 3 + 2s
        assert_eq!(fixture.mock.commands()[0].cpu_limit, 8_000_000_000);
    }

    #[tokio::test]
    async fn test_runtime_error_reported() {
        let fixture = Fixture::new(|_| mock::exited(2, "", ""));
        let ctx = fixture
            .context()
            .with_code("sh", CopyInFile::content("exit 2"))
            .with_input(None);
        Run.judge(&ctx).await.unwrap();
        let end = fixture.reporter.last_end();
        assert_eq!(end.status, Status::RuntimeError);
        assert_eq!(end.message.unwrap().render(), "Your program returned 2.");
    }
}
