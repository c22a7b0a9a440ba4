//! Checker protocol adapters
//!
//! A checker decides whether a solution's output is right. Conventions differ
//! between judges: some report through the exit code, some through a prefix
//! on stderr, some through a JSON document or side files. Each adapter knows
//! how to invoke one convention ([`CheckerAdapter::command`]) and how to read
//! its verdict back ([`CheckerAdapter::parse`]) into a [`CheckResult`].
//!
//! Parsing is kept free of I/O so every convention can be tested from
//! captured output alone.

pub mod cplib;
pub mod diff;
pub mod excerpt;
pub mod legacy;
pub mod testlib;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::message::Message;
use crate::core::status::Status;
use crate::engine::compiler::Execute;
use crate::engine::executer::{self, Parameter, RunOutcome};
use crate::engine::sandbox::{CopyIn, CopyInFile, Sandbox};
use crate::error::{JudgeError, Result};

/// Default time limit for checker processes
pub const CHECKER_TIME_LIMIT_MS: u64 = 10_000;

/// Default memory limit for checker processes
pub const CHECKER_MEMORY_LIMIT_MB: u64 = 1024;

/// Messages longer than this are dropped to bound report size
pub const MESSAGE_MAX: usize = 1_024_000;

/// One of the three streams a checker compares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Input,
    UserOutput,
    Answer,
}

/// Position inside a compared stream, reported by tracing checkers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceLocator {
    pub stream: StreamKind,
    pub line: u64,
    pub col: u64,
    pub byte: u64,
}

/// Normalized verifier outcome
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub status: Status,
    /// Score in case points
    pub score: f64,
    /// Score as a fraction of full credit, when the checker reported one
    pub scaled_score: Option<f64>,
    pub message: Message,
    pub locator: Option<TraceLocator>,
}

impl CheckResult {
    pub fn new(status: Status, score: f64, message: impl Into<Message>) -> Self {
        Self {
            status,
            score,
            scaled_score: None,
            message: message.into(),
            locator: None,
        }
    }

    pub fn accepted(score: f64) -> Self {
        Self::new(Status::Accepted, score, Message::default())
    }

    pub fn wrong_answer(message: impl Into<Message>) -> Self {
        Self::new(Status::WrongAnswer, 0.0, message)
    }

    pub fn system_error(message: impl Into<Message>) -> Self {
        Self::new(Status::SystemError, 0.0, message)
    }

    /// Accepted with full score, or wrong answer with nothing
    pub fn from_pass(pass: bool, full_score: f64, message: impl Into<Message>) -> Self {
        if pass {
            Self::new(Status::Accepted, full_score, message)
        } else {
            Self::wrong_answer(message)
        }
    }
}

/// Everything a checker may need for one case
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Compiled checker; diff-based checkers have none
    pub execute: Option<Arc<Execute>>,
    pub input: CopyInFile,
    pub answer: CopyInFile,
    pub user_stdout: CopyInFile,
    pub user_stderr: CopyInFile,
    /// Extra judge files staged next to the checker
    pub copy_in: CopyIn,
    /// Full credit for the case
    pub score: f64,
    /// Produce detailed messages
    pub detail: bool,
    pub env: BTreeMap<String, String>,
}

impl CheckConfig {
    pub fn new(input: CopyInFile, answer: CopyInFile, user_stdout: CopyInFile, score: f64) -> Self {
        Self {
            execute: None,
            input,
            answer,
            user_stdout,
            user_stderr: CopyInFile::empty(),
            copy_in: CopyIn::new(),
            score,
            detail: true,
            env: BTreeMap::new(),
        }
    }

    pub fn with_execute(mut self, execute: Option<Arc<Execute>>) -> Self {
        self.execute = execute;
        self
    }

    pub fn with_copy_in(mut self, copy_in: CopyIn) -> Self {
        self.copy_in = copy_in;
        self
    }

    pub fn with_detail(mut self, detail: bool) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// The compiled checker with `args` appended, limits and env applied
    pub fn program<I, S>(&self, args: I) -> Result<Parameter>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let execute = self
            .execute
            .as_ref()
            .ok_or_else(|| JudgeError::format("You did not specify a checker."))?;
        Ok(execute
            .param()
            .with_args(args)
            .with_copy_in(&self.copy_in)
            .with_limits(CHECKER_TIME_LIMIT_MS, CHECKER_MEMORY_LIMIT_MB)
            .with_env(&self.env))
    }
}

/// One verifier convention
pub trait CheckerAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a compiled checker program is required
    fn needs_program(&self) -> bool {
        true
    }

    /// Sandbox command running the checker
    fn command(&self, config: &CheckConfig) -> Result<Parameter>;

    /// Interpret the finished checker process
    fn parse(&self, outcome: &RunOutcome, config: &CheckConfig) -> Result<CheckResult>;
}

static REGISTRY: OnceLock<HashMap<&'static str, &'static dyn CheckerAdapter>> = OnceLock::new();

fn registry() -> &'static HashMap<&'static str, &'static dyn CheckerAdapter> {
    REGISTRY.get_or_init(|| {
        let adapters: [&'static dyn CheckerAdapter; 8] = [
            &diff::DEFAULT,
            &diff::STRICT,
            &testlib::Testlib,
            &cplib::Cplib,
            &legacy::Hustoj,
            &legacy::Lemon,
            &legacy::Qduoj,
            &legacy::Syzoj,
        ];
        adapters.into_iter().map(|a| (a.name(), a)).collect()
    })
}

/// Look up an adapter by its configured type
pub fn get_checker(checker_type: &str) -> Result<&'static dyn CheckerAdapter> {
    registry()
        .get(checker_type)
        .copied()
        .ok_or_else(|| JudgeError::format_with("Unknown checker type {0}", vec![checker_type.into()]))
}

/// Supported checker type names
pub fn checker_types() -> Vec<&'static str> {
    let mut names: Vec<_> = registry().keys().copied().collect();
    names.sort_unstable();
    names
}

/// Run a checker and normalize its verdict
pub async fn check(
    sandbox: &dyn Sandbox,
    checker_type: &str,
    config: &CheckConfig,
) -> Result<CheckResult> {
    let adapter = get_checker(checker_type)?;
    let param = adapter.command(config)?;
    let outcome = executer::run(sandbox, param).await?;
    debug!(
        "Checker {} finished: status={}, code={}",
        checker_type, outcome.status, outcome.code
    );

    let mut result = adapter.parse(&outcome, config)?;
    if !config.detail || result.message.render().len() > MESSAGE_MAX {
        result.message = Message::default();
    }
    Ok(result)
}
