//! Judging strategies
//!
//! A [`Strategy`] judges one kind of problem. Most strategies only know how to
//! prepare their programs and judge a single case ([`CaseRunner`]); the flow
//! engine in [`flow`] schedules the cases and aggregates their scores. The
//! others (hack, generate, objective, run) drive the whole run themselves and
//! override [`Strategy::judge`].

pub mod analysis;
pub mod communication;
pub mod context;
pub mod default;
pub mod flow;
pub mod generate;
pub mod hack;
pub mod interactive;
pub mod objective;
pub mod run;
pub mod submit_answer;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::Serialize;

use crate::components::checker::excerpt::{self, Evidence};
use crate::components::checker::{self, CheckConfig, CheckResult};
use crate::core::message::Message;
use crate::core::status::Status;
use crate::core::utils::signal_name;
use crate::engine::executer::RunOutcome;
use crate::engine::sandbox::CopyInFile;
use crate::error::{JudgeError, Result};
use crate::jobs::testdata::{Case, Subtask};

pub use context::JudgeContext;

/// Outcome of one case
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    pub id: u32,
    pub subtask_id: u32,
    pub status: Status,
    pub score: f64,
    /// Milliseconds
    pub time: f64,
    /// KB
    pub memory: f64,
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

impl CaseResult {
    pub fn new(case: &Case, subtask: &Subtask, status: Status) -> Self {
        Self {
            id: case.id,
            subtask_id: subtask.id,
            status,
            score: 0.0,
            time: 0.0,
            memory: 0.0,
            message: Message::default(),
            evidence: None,
        }
    }

    /// Skipped case; contributes nothing
    pub fn canceled(case: &Case, subtask: &Subtask) -> Self {
        Self::new(case, subtask, Status::Canceled)
    }

    pub fn with_usage(mut self, time: f64, memory: f64) -> Self {
        self.time = time;
        self.memory = memory;
        self
    }

    pub fn with_check(mut self, check: CheckResult) -> Self {
        self.status = check.status;
        self.score = check.score;
        self.message = check.message;
        self
    }

    pub fn with_message(mut self, message: impl Into<Message>) -> Self {
        self.message = message.into();
        self
    }
}

/// Judges single cases once the programs are ready
#[async_trait]
pub trait CaseRunner: Send + Sync {
    async fn judge_case(
        &self,
        ctx: &JudgeContext,
        subtask: &Subtask,
        case: &Case,
    ) -> Result<CaseResult>;
}

/// Judging procedure of one problem or job kind
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compile the solution and auxiliary programs
    async fn prepare(&self, _ctx: &JudgeContext) -> Result<Arc<dyn CaseRunner>> {
        Err(JudgeError::system_with(
            "Strategy {0} does not judge cases.",
            vec![self.name().to_string()],
        ))
    }

    /// Judge the whole run and send its end event
    async fn judge(&self, ctx: &JudgeContext) -> Result<()> {
        flow::run(ctx, self).await
    }
}

static STRATEGIES: OnceLock<HashMap<&'static str, &'static dyn Strategy>> = OnceLock::new();

fn registry() -> &'static HashMap<&'static str, &'static dyn Strategy> {
    STRATEGIES.get_or_init(|| {
        let strategies: [&'static dyn Strategy; 8] = [
            &default::Default,
            &interactive::Interactive,
            &communication::Communication,
            &submit_answer::SubmitAnswer,
            &objective::Objective,
            &hack::Hack,
            &generate::Generate,
            &run::Run,
        ];
        strategies.into_iter().map(|s| (s.name(), s)).collect()
    })
}

/// Look up a strategy by name
pub fn get_strategy(name: &str) -> Result<&'static dyn Strategy> {
    registry()
        .get(name)
        .copied()
        .ok_or_else(|| JudgeError::format_with("Unrecognized problemType: {0}", vec![name.into()]))
}

pub(crate) fn src(path: &Path) -> CopyInFile {
    CopyInFile::src(path.to_string_lossy().into_owned())
}

/// Message for a solution that did not exit cleanly
pub fn runtime_message(outcome: &RunOutcome) -> Message {
    match signal_name(outcome.code).filter(|_| outcome.signalled) {
        Some(name) => Message::new(name),
        None => Message::with_params("Your program returned {0}.", vec![outcome.code.to_string()]),
    }
}

/// Status of a finished solution run measured against the case limits
pub fn classify(outcome: &RunOutcome, time_ms: u64, memory_mb: u64) -> Status {
    match outcome.status {
        Status::Accepted if outcome.time_ms > time_ms as f64 => Status::TimeLimitExceeded,
        Status::Accepted if outcome.memory_kb > (memory_mb * 1024) as f64 => {
            Status::MemoryLimitExceeded
        }
        status => status,
    }
}

/// Run the configured checker and attach an excerpt when it located a fault
pub async fn verify(ctx: &JudgeContext, config: &CheckConfig) -> Result<(CheckResult, Option<Evidence>)> {
    let result = checker::check(ctx.sandbox.as_ref(), &ctx.config.checker_type, config).await?;
    let evidence = match (&result.locator, result.status) {
        (Some(locator), status) if !status.is_accepted() => {
            excerpt::evidence(ctx.sandbox.as_ref(), locator, config).await
        }
        _ => None,
    };
    Ok((result, evidence))
}

#[cfg(test)]
pub(crate) mod testing;
