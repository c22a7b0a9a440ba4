//! Communication problems
//!
//! A manager talks to `num_processes` copies of the solution. Copy `i` gets
//! `i` as its only argument; the manager receives, for every copy, the
//! descriptor it reads from and the one it writes to
//! (`/proc/self/fd/{2i+3}` and `/proc/self/fd/{2i+4}`). The manager prints the
//! score ratio on stdout.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{runtime_message, src, CaseResult, CaseRunner, JudgeContext, Strategy};
use crate::config::DetailLevel;
use crate::core::message::Message;
use crate::core::status::Status;
use crate::engine::compiler::Execute;
use crate::engine::executer::{self, Parameter, RunOutcome};
use crate::engine::sandbox::PipeMap;
use crate::error::{JudgeError, Result};
use crate::jobs::testdata::{Case, ProblemKind, Subtask};

const BROKEN_PIPE: i32 = 13;

pub struct Communication;

struct CommunicationRunner {
    execute: Arc<Execute>,
    manager: Arc<Execute>,
    processes: u32,
}

/// Commands and pipes for one case; the manager is command 0
fn wiring(
    ctx: &JudgeContext,
    execute: &Execute,
    manager: &Execute,
    processes: u32,
    case: &Case,
) -> (Vec<Parameter>, Vec<PipeMap>) {
    let lang = &execute.lang;
    let mut manager = manager
        .param()
        .with_copy_in(&ctx.judge_copy_in())
        .with_stdin(src(&case.input))
        .with_limits(case.time_ms * 2, case.memory_mb * 2)
        .with_env(&ctx.case_env(case.id));
    let mut params = Vec::with_capacity(processes as usize + 1);
    let mut pipes = Vec::with_capacity(processes as usize * 2);

    for i in 0..processes as usize {
        manager = manager.with_args([
            format!("/proc/self/fd/{}", i * 2 + 3),
            format!("/proc/self/fd/{}", i * 2 + 4),
        ]);
        params.push(
            execute
                .param()
                .with_args([i.to_string()])
                .with_limits(case.time_ms, case.memory_mb)
                .with_process_limit(lang.process_limit.unwrap_or(ctx.settings.process_limit)),
        );
        pipes.push(PipeMap::new((i + 1, 1), (0, i * 2 + 3)).named(format!("sol2mgr[{}]", i)));
        pipes.push(PipeMap::new((0, i * 2 + 4), (i + 1, 0)).named(format!("mgr2sol[{}]", i)));
    }
    params.insert(0, manager);
    (params, pipes)
}

/// Fold the solutions into one verdict, reporting the last failing copy
fn judge_solutions(
    solutions: &[RunOutcome],
    manager: &RunOutcome,
    case: &Case,
    detail: bool,
) -> (Status, f64, f64, Message) {
    let mut status = Status::Accepted;
    let (mut time, mut memory) = (0.0, 0.0_f64);
    let mut message = Message::default();
    for solution in solutions {
        time += solution.time_ms;
        memory = memory.max(solution.memory_kb);
        if solution.time_ms > case.time_ms as f64 {
            status = Status::TimeLimitExceeded;
        } else if solution.memory_kb > (case.memory_mb * 1024) as f64 {
            status = Status::MemoryLimitExceeded;
        } else if (solution.code != 0 && solution.code != BROKEN_PIPE)
            || (solution.code == BROKEN_PIPE && manager.code == 0)
        {
            status = Status::RuntimeError;
            if detail {
                message = runtime_message(solution);
            }
        } else if solution.status > Status::Accepted && solution.code == 0 {
            status = solution.status;
        }
    }
    (status, time, memory, message)
}

#[async_trait]
impl CaseRunner for CommunicationRunner {
    async fn judge_case(
        &self,
        ctx: &JudgeContext,
        subtask: &Subtask,
        case: &Case,
    ) -> Result<CaseResult> {
        let (params, pipes) = wiring(ctx, &self.execute, &self.manager, self.processes, case);
        let mut outcomes = executer::run_piped(ctx.sandbox.as_ref(), params, pipes).await?;
        if outcomes.is_empty() {
            return Err(JudgeError::system("Communication run returned no results."));
        }
        let manager = outcomes.remove(0);
        debug!(
            "Case {} of {}: manager {} ({})",
            case.id, ctx.rid, manager.status, manager.code
        );

        let detail = ctx.config.detail == DetailLevel::Full;
        let (status, time, memory, message) = judge_solutions(&outcomes, &manager, case, detail);
        let result = CaseResult::new(case, subtask, status)
            .with_usage(time, memory)
            .with_message(message);
        if status != Status::Accepted {
            return Ok(result);
        }

        let ratio = manager.stdout.trim().parse::<f64>().unwrap_or(0.0).clamp(0.0, 1.0);
        let mut message = manager.stderr.trim().to_string();
        if manager.code != 0 {
            message.push_str(&format!(" (Manager exited with code {})", manager.code));
        }
        Ok(CaseResult {
            status: if ratio >= 1.0 {
                Status::Accepted
            } else {
                Status::WrongAnswer
            },
            score: case.score * ratio,
            ..result
        }
        .with_message(message))
    }
}

#[async_trait]
impl Strategy for Communication {
    fn name(&self) -> &'static str {
        "communication"
    }

    async fn prepare(&self, ctx: &JudgeContext) -> Result<Arc<dyn CaseRunner>> {
        let (path, processes) = match &ctx.config.kind {
            ProblemKind::Communication {
                manager,
                num_processes,
            } => (manager.clone(), (*num_processes).max(1)),
            _ => return Err(JudgeError::format("You did not specify a manager.")),
        };
        let (execute, manager) = tokio::try_join!(ctx.compile_user(), ctx.compile_aux(&path))?;
        Ok(Arc::new(CommunicationRunner {
            execute,
            manager,
            processes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::engine::sandbox::mock;
    use crate::judge::testing::Fixture;

    const CONFIG: &str = r#"
type: communication
manager: manager.cc
num_processes: 2
subtasks:
  - score: 50
    type: sum
    cases:
      - {input: 1.in, output: 1.out, score: 50}
"#;

    fn fixture(manager_stdout: &'static str, solution_code: i32) -> Fixture {
        let fixture = Fixture::new(move |call| {
            if call.program() == "/usr/bin/g++" {
                mock::ok("")
            } else if call.arg(1).is_some_and(|a| a.starts_with("/proc/self/fd/")) {
                mock::exited(0, manager_stdout, "looks fine")
            } else {
                let mut result = mock::exited(solution_code, "", "");
                result.time = 30_000_000;
                result.memory = 2 * 1024 * 1024;
                result
            }
        });
        fixture.write("manager.cc", "int main(){}");
        fixture.write("1.in", "3\n");
        fixture.write("1.out", "");
        fixture
    }

    #[tokio::test]
    async fn test_wiring() {
        let fixture = fixture("1\n", 0);
        let ctx = fixture.judging("cpp", "int main(){}", CONFIG).await;
        Communication.judge(&ctx).await.unwrap();

        let request = fixture.mock.requests().pop().unwrap();
        assert_eq!(request.cmd.len(), 3);
        assert_eq!(
            &request.cmd[0].args[1..],
            ["/proc/self/fd/3", "/proc/self/fd/4", "/proc/self/fd/5", "/proc/self/fd/6"]
        );
        assert_eq!(request.cmd[2].args.last().unwrap(), "1");
        let ends: Vec<_> = request
            .pipe_mapping
            .iter()
            .map(|p| (p.input.index, p.input.fd, p.output.index, p.output.fd))
            .collect();
        assert_eq!(ends, vec![(1, 1, 0, 3), (0, 4, 1, 0), (2, 1, 0, 5), (0, 6, 2, 0)]);
    }

    #[tokio::test]
    async fn test_ratio_scores_case() {
        let fixture = fixture("1\n", 0);
        let ctx = fixture.judging("cpp", "int main(){}", CONFIG).await;
        Communication.judge(&ctx).await.unwrap();
        let case = &fixture.reporter.cases()[0];
        assert_eq!(case.status, Status::Accepted);
        assert_eq!(case.score, 50.0);
        assert_eq!(case.time, 60.0);
        assert_eq!(case.memory, 2048.0);
        assert_eq!(case.message.render(), "looks fine");

        let fixture = self::fixture("0.5\n", 0);
        let ctx = fixture.judging("cpp", "int main(){}", CONFIG).await;
        Communication.judge(&ctx).await.unwrap();
        let case = &fixture.reporter.cases()[0];
        assert_eq!(case.status, Status::WrongAnswer);
        assert_eq!(case.score, 25.0);
        assert_eq!(fixture.reporter.last_end().score, 25.0);
    }

    #[tokio::test]
    async fn test_broken_pipe_after_clean_manager_exit() {
        let fixture = fixture("1\n", BROKEN_PIPE);
        let ctx = fixture.judging("cpp", "int main(){}", CONFIG).await;
        Communication.judge(&ctx).await.unwrap();
        let case = &fixture.reporter.cases()[0];
        assert_eq!(case.status, Status::RuntimeError);
        assert_eq!(case.score, 0.0);
        assert_eq!(case.message.render(), "Your program returned 13.");
    }
}
