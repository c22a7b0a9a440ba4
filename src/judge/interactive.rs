//! Interactive problems
//!
//! The solution and the interactor run side by side with their standard
//! streams cross-wired. The interactor reads the case input from `/w/in`,
//! the answer from `/w/out`, and reports its verdict on stderr.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::analysis::analyze;
use super::default::solution_param;
use super::{classify, runtime_message, src, CaseResult, CaseRunner, JudgeContext, Strategy};
use crate::components::checker::{cplib, testlib, CheckResult};
use crate::core::status::Status;
use crate::engine::compiler::Execute;
use crate::engine::executer::{self, RunOutcome};
use crate::engine::sandbox::{CopyInFile, PipeMap};
use crate::error::{JudgeError, Result};
use crate::jobs::testdata::{Case, InteractorProtocol, ProblemKind, Subtask};

/// Exit status of a writer whose reader went away first
const BROKEN_PIPE: i32 = 13;

pub struct Interactive;

struct InteractiveRunner {
    execute: Arc<Execute>,
    interactor: Arc<Execute>,
    protocol: InteractorProtocol,
}

/// Verdict on the solution alone, before the interactor is consulted
fn solution_verdict(
    solution: &RunOutcome,
    interactor: &RunOutcome,
    time_ms: u64,
    memory_mb: u64,
) -> Option<Status> {
    match classify(solution, time_ms, memory_mb) {
        Status::Accepted => None,
        Status::RuntimeError if solution.code == BROKEN_PIPE && interactor.code == 0 => None,
        status => Some(status),
    }
}

#[async_trait]
impl CaseRunner for InteractiveRunner {
    async fn judge_case(
        &self,
        ctx: &JudgeContext,
        subtask: &Subtask,
        case: &Case,
    ) -> Result<CaseResult> {
        let solution = solution_param(
            ctx,
            &self.execute,
            CopyInFile::empty(),
            case.time_ms,
            case.memory_mb,
        );
        let interactor = self
            .interactor
            .param()
            .with_args(["/w/in", "/w/tout", "/w/out"])
            .with_copy_in(&ctx.judge_copy_in())
            .with_file("in", src(&case.input))
            .with_file("out", src(&case.output))
            .with_limits(case.time_ms * 2, case.memory_mb * 2)
            .with_env(&ctx.case_env(case.id));
        let (time_ms, memory_mb) = (solution.time_ms, solution.memory_mb);

        let pipes = vec![PipeMap::new((0, 1), (1, 0)), PipeMap::new((1, 1), (0, 0))];
        let params = vec![solution.clone(), interactor];
        let mut outcomes = executer::run_piped(ctx.sandbox.as_ref(), params, pipes).await?;
        let (user, judge) = match (outcomes.pop(), outcomes.pop()) {
            (Some(judge), Some(user)) => (user, judge),
            _ => return Err(JudgeError::system("Interactive run returned too few results.")),
        };
        debug!(
            "Case {} of {}: solution {} ({}), interactor {} ({})",
            case.id, ctx.rid, user.status, user.code, judge.status, judge.code
        );

        let result = CaseResult::new(case, subtask, Status::Accepted)
            .with_usage(user.time_ms, user.memory_kb);
        let result = match solution_verdict(&user, &judge, time_ms, memory_mb) {
            Some(Status::RuntimeError) => {
                analyze(ctx, solution, case.id).await;
                CaseResult {
                    status: Status::RuntimeError,
                    ..result
                }
                .with_message(runtime_message(&user))
            }
            Some(status) => CaseResult { status, ..result },
            None => {
                let check: CheckResult = match self.protocol {
                    InteractorProtocol::Cplib => cplib::parse(&judge.stderr, case.score),
                    InteractorProtocol::Testlib => {
                        testlib::judge_process(&judge, case.score, "Interactor")
                    }
                };
                result.with_check(check)
            }
        };
        Ok(result)
    }
}

#[async_trait]
impl Strategy for Interactive {
    fn name(&self) -> &'static str {
        "interactive"
    }

    async fn prepare(&self, ctx: &JudgeContext) -> Result<Arc<dyn CaseRunner>> {
        let (path, protocol) = match &ctx.config.kind {
            ProblemKind::Interactive {
                interactor,
                protocol,
            } => (interactor.clone(), *protocol),
            _ => return Err(JudgeError::format("You did not specify an interactor.")),
        };
        let (execute, interactor) = tokio::try_join!(ctx.compile_user(), ctx.compile_aux(&path))?;
        Ok(Arc::new(InteractiveRunner {
            execute,
            interactor,
            protocol,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::engine::sandbox::mock::{self, MockCall};
    use crate::engine::sandbox::{SandboxResult, SandboxStatus};
    use crate::judge::testing::Fixture;

    const CONFIG: &str = r#"
type: interactive
interactor: interactor.cc
subtasks:
  - score: 100
    cases:
      - {input: 1.in, output: 1.out}
"#;

    fn is_interactor(call: &MockCall<'_>) -> bool {
        call.arg(1) == Some("/w/in")
    }

    fn fixture<F>(handler: F) -> Fixture
    where
        F: Fn(&MockCall<'_>) -> SandboxResult + Send + Sync + 'static,
    {
        let fixture = Fixture::new(move |call| {
            if call.program() == "/usr/bin/g++" {
                mock::ok("")
            } else {
                handler(call)
            }
        });
        fixture.write("interactor.cc", "int main(){}");
        fixture.write("1.in", "5\n");
        fixture.write("1.out", "5\n");
        fixture
    }

    #[tokio::test]
    async fn test_interactor_accepts() {
        let fixture = fixture(|call| {
            if is_interactor(call) {
                mock::exited(0, "", "ok 5 queries")
            } else {
                mock::ok("")
            }
        });
        let ctx = fixture.judging("cpp", "int main(){}", CONFIG).await;
        Interactive.judge(&ctx).await.unwrap();

        let end = fixture.reporter.last_end();
        assert_eq!(end.status, Status::Accepted);
        assert_eq!(end.score, 100.0);

        let request = fixture.mock.requests().pop().unwrap();
        assert_eq!(request.cmd.len(), 2);
        assert_eq!(request.pipe_mapping.len(), 2);
        assert_eq!(request.cmd[0].files[0], None);
        assert_eq!(request.cmd[1].files[1], None);
        assert_eq!(request.cmd[1].cpu_limit, 2 * request.cmd[0].cpu_limit);
    }

    #[tokio::test]
    async fn test_broken_pipe_tolerated_when_interactor_succeeds() {
        let fixture = fixture(|call| {
            if is_interactor(call) {
                mock::exited(0, "", "ok")
            } else {
                let mut result = mock::with_status(SandboxStatus::Signalled, 1);
                result.exit_status = BROKEN_PIPE;
                result
            }
        });
        let ctx = fixture.judging("cpp", "int main(){}", CONFIG).await;
        Interactive.judge(&ctx).await.unwrap();
        assert_eq!(fixture.reporter.last_end().status, Status::Accepted);
    }

    #[tokio::test]
    async fn test_broken_pipe_with_failing_interactor() {
        let fixture = fixture(|call| {
            if is_interactor(call) {
                mock::exited(1, "", "wrong answer too many queries")
            } else {
                let mut result = mock::with_status(SandboxStatus::Signalled, 1);
                result.exit_status = BROKEN_PIPE;
                result
            }
        });
        let ctx = fixture.judging("cpp", "int main(){}", CONFIG).await;
        Interactive.judge(&ctx).await.unwrap();
        let case = &fixture.reporter.cases()[0];
        assert_eq!(case.status, Status::RuntimeError);
        assert_eq!(case.message.render(), "SIGPIPE");
    }

    #[tokio::test]
    async fn test_interactor_rejects() {
        let fixture = fixture(|call| {
            if is_interactor(call) {
                mock::exited(1, "", "wrong answer expected 5, found 4")
            } else {
                mock::ok("")
            }
        });
        let ctx = fixture.judging("cpp", "int main(){}", CONFIG).await;
        Interactive.judge(&ctx).await.unwrap();
        let case = &fixture.reporter.cases()[0];
        assert_eq!(case.status, Status::WrongAnswer);
        assert_eq!(case.message.render(), "expected 5, found 4");
        assert_eq!(fixture.reporter.last_end().score, 0.0);
    }

    #[tokio::test]
    async fn test_interactor_json_report() {
        let fixture = fixture(|call| {
            if is_interactor(call) {
                mock::exited(
                    0,
                    "",
                    r#"{"status": "partially_correct", "score": 0.25, "message": "used 80 queries"}"#,
                )
            } else {
                mock::ok("")
            }
        });
        let config = format!("{}checker_type: cplib\n", CONFIG);
        let ctx = fixture.judging("cpp", "int main(){}", &config).await;
        Interactive.judge(&ctx).await.unwrap();

        let case = &fixture.reporter.cases()[0];
        assert_eq!(case.status, Status::WrongAnswer);
        assert_eq!(case.score, 25.0);
        assert_eq!(case.message.render(), "used 80 queries");
        assert_eq!(fixture.reporter.last_end().score, 25.0);
    }

    #[test]
    fn test_solution_verdict_limits_first() {
        let param = crate::engine::executer::Parameter::new(["a"]).with_limits(3000, 256);
        let mut slow = mock::ok("");
        slow.time = 1_500_000_000;
        let user = RunOutcome::from_result(slow, &param);
        let judge = RunOutcome::from_result(mock::exited(0, "", "ok"), &param);
        assert_eq!(solution_verdict(&user, &judge, 1000, 256), Some(Status::TimeLimitExceeded));
        assert_eq!(solution_verdict(&user, &judge, 2000, 256), None);
    }
}
