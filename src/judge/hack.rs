//! Hack attempts
//!
//! A hacker submits an input. The validator must accept it; the hacked
//! solution then runs on it and the checker compares against an empty answer.
//! A solution that survives makes the hack unsuccessful.

use async_trait::async_trait;
use tracing::info;

use super::default::{solution_param, user_output};
use super::{classify, runtime_message, JudgeContext, Strategy};
use crate::components::checker::{self, CheckConfig};
use crate::config::DetailLevel;
use crate::core::message::Message;
use crate::core::status::Status;
use crate::engine::executer;
use crate::engine::sandbox::CopyInFile;
use crate::error::{JudgeError, Result};
use crate::jobs::report::{EndEvent, NextEvent};

pub struct Hack;

#[async_trait]
impl Strategy for Hack {
    fn name(&self) -> &'static str {
        "hack"
    }

    async fn judge(&self, ctx: &JudgeContext) -> Result<()> {
        ctx.next(NextEvent::progress(Status::Compiling, 0.0));
        let input = ctx
            .hack_input
            .clone()
            .ok_or_else(|| JudgeError::system("Hack input missing."))?;
        let validator = ctx
            .config
            .validator
            .as_deref()
            .ok_or_else(|| JudgeError::format("You did not specify a validator."))?;
        let (execute, checker, validator) = tokio::try_join!(
            ctx.compile_user(),
            ctx.compile_checker(),
            ctx.compile_aux(validator),
        )?;
        ctx.next(NextEvent::progress(Status::Judging, 0.0));

        let param = solution_param(
            ctx,
            &execute,
            input.clone(),
            ctx.config.time_ms,
            ctx.config.memory_mb,
        );
        let validation = executer::run(
            ctx.sandbox.as_ref(),
            validator
                .param()
                .with_copy_in(&ctx.judge_copy_in())
                .with_stdin(input.clone())
                .with_limits(param.time_ms, ctx.config.memory_mb),
        )
        .await?;
        if validation.status != Status::Accepted {
            let message = format!("{}\n{}", validation.stdout, validation.stderr);
            info!("Hack input for {} rejected by the validator", ctx.rid);
            ctx.end(
                EndEvent::new(Status::FormatError, 0.0).with_message(message.trim().to_string()),
            );
            return Ok(());
        }

        let outcome = executer::run(ctx.sandbox.as_ref(), param.clone()).await?;
        let mut status = classify(&outcome, param.time_ms, ctx.config.memory_mb);
        let mut message = Message::default();
        match status {
            Status::Accepted => {
                let config = CheckConfig::new(
                    input,
                    CopyInFile::content(""),
                    user_output(ctx, &outcome),
                    100.0,
                )
                .with_execute(checker)
                .with_copy_in(ctx.judge_copy_in())
                .with_detail(ctx.config.detail == DetailLevel::Full)
                .with_env(ctx.case_env(0));
                let check =
                    checker::check(ctx.sandbox.as_ref(), &ctx.config.checker_type, &config).await?;
                status = check.status;
                message = check.message;
            }
            Status::RuntimeError if outcome.code != 0 => message = runtime_message(&outcome),
            _ => {}
        }

        if !message.is_empty() {
            ctx.next(NextEvent::message(message));
        }
        let verdict = if status == Status::Accepted {
            Status::HackUnsuccessful
        } else {
            Status::HackSuccessful
        };
        info!("Hack on {} ends {} ({})", ctx.rid, verdict, status);
        ctx.end(EndEvent::new(verdict, 0.0).with_usage(outcome.time_ms, outcome.memory_kb));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::engine::sandbox::mock;
    use crate::judge::testing::Fixture;

    const CONFIG: &str = r#"
validator: val.py
checker_type: testlib
checker: chk.py
subtasks:
  - cases:
      - {input: 1.in, output: 1.out}
"#;

    /// The validator rejects negative inputs, the solution prints its input,
    /// the checker accepts anything but 7
    fn fixture() -> Fixture {
        let fixture = Fixture::new(|call| match call.program() {
            "/usr/bin/python3" if call.files.get("foo.py").is_some_and(|f| f == "validate") => {
                if call.stdin.starts_with('-') {
                    mock::exited(3, "", "FAIL Integer -5 violates the range [0, 10]")
                } else {
                    mock::ok("")
                }
            }
            "/usr/bin/python3" if call.files.get("foo.py").is_some_and(|f| f == "check") => {
                if call.files.get("user_out").is_some_and(|o| o.trim() == "7") {
                    mock::exited(1, "", "wrong answer 7 is unlucky")
                } else {
                    mock::exited(0, "", "ok")
                }
            }
            _ => mock::ok(call.stdin.clone()),
        });
        fixture.write("val.py", "validate");
        fixture.write("chk.py", "check");
        fixture.write("1.in", "1\n");
        fixture.write("1.out", "1\n");
        fixture
    }

    async fn hack(fixture: &Fixture, input: &str) -> EndEvent {
        let ctx = fixture
            .judging("python", "print(input())", CONFIG)
            .await
            .with_hack_input(Some(CopyInFile::content(input)));
        Hack.judge(&ctx).await.unwrap();
        fixture.reporter.last_end()
    }

    #[tokio::test]
    async fn test_invalid_hack_input() {
        let fixture = fixture();
        let end = hack(&fixture, "-5\n").await;
        assert_eq!(end.status, Status::FormatError);
        assert_eq!(end.message.unwrap().render(), "FAIL Integer -5 violates the range [0, 10]");
    }

    #[tokio::test]
    async fn test_hack_outcomes() {
        let fixture = fixture();
        assert_eq!(hack(&fixture, "3\n").await.status, Status::HackUnsuccessful);

        let fixture = self::fixture();
        let end = hack(&fixture, "7\n").await;
        assert_eq!(end.status, Status::HackSuccessful);
        assert_eq!(fixture.reporter.messages(), vec!["7 is unlucky"]);
    }
}
