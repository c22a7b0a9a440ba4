//! Standard input/output problems

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::analysis::analyze;
use super::{classify, runtime_message, src, verify, CaseResult, CaseRunner, JudgeContext, Strategy};
use crate::core::status::Status;
use crate::engine::compiler::Execute;
use crate::engine::executer::{self, Parameter};
use crate::engine::sandbox::CopyInFile;
use crate::error::Result;
use crate::jobs::testdata::{Case, Subtask};

pub struct Default;

pub(crate) struct DefaultRunner {
    pub execute: Arc<Execute>,
    pub checker: Option<Arc<Execute>>,
}

/// Solution command for one case, with language-scaled limits
pub(crate) fn solution_param(
    ctx: &JudgeContext,
    execute: &Execute,
    input: CopyInFile,
    time_ms: u64,
    memory_mb: u64,
) -> Parameter {
    let lang = &execute.lang;
    let param = execute
        .param()
        .with_limits(
            lang.calculate_time_limit(time_ms),
            lang.calculate_memory_limit(memory_mb),
        )
        .with_process_limit(lang.process_limit.unwrap_or(ctx.settings.process_limit));
    match ctx.config.filename.as_deref() {
        Some(name) => param
            .with_file(format!("{}.in", name), input)
            .with_copy_out(format!("{}.out?", name)),
        None => param.with_stdin(input),
    }
}

/// What the solution wrote: its stdout, or the named output file
pub(crate) fn user_output(ctx: &JudgeContext, outcome: &executer::RunOutcome) -> CopyInFile {
    match ctx.config.filename.as_deref() {
        Some(name) => CopyInFile::content(
            outcome
                .files
                .get(&format!("{}.out", name))
                .cloned()
                .unwrap_or_default(),
        ),
        None => CopyInFile::content(outcome.stdout.clone()),
    }
}

#[async_trait]
impl CaseRunner for DefaultRunner {
    async fn judge_case(
        &self,
        ctx: &JudgeContext,
        subtask: &Subtask,
        case: &Case,
    ) -> Result<CaseResult> {
        let param = solution_param(
            ctx,
            &self.execute,
            src(&case.input),
            case.time_ms,
            case.memory_mb,
        );
        let outcome = executer::run(ctx.sandbox.as_ref(), param.clone()).await?;
        let status = classify(&outcome, param.time_ms, param.memory_mb);
        debug!(
            "Case {} of {}: {} in {:.1}ms",
            case.id, ctx.rid, status, outcome.time_ms
        );

        let result =
            CaseResult::new(case, subtask, status).with_usage(outcome.time_ms, outcome.memory_kb);
        let result = match status {
            Status::Accepted => {
                let config = ctx.check_config(
                    self.checker.clone(),
                    case,
                    user_output(ctx, &outcome),
                    case.score,
                );
                let (check, evidence) = verify(ctx, &config).await?;
                let mut result = result.with_check(check);
                result.evidence = evidence;
                result
            }
            Status::RuntimeError => result.with_message(runtime_message(&outcome)),
            _ => result,
        };

        if matches!(result.status, Status::WrongAnswer | Status::RuntimeError) {
            analyze(ctx, param, case.id).await;
        }
        Ok(result)
    }
}

#[async_trait]
impl Strategy for Default {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn prepare(&self, ctx: &JudgeContext) -> Result<Arc<dyn CaseRunner>> {
        let (execute, checker) = tokio::try_join!(ctx.compile_user(), ctx.compile_checker())?;
        Ok(Arc::new(DefaultRunner { execute, checker }))
    }
}
