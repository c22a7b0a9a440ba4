//! testlib.h checkers
//!
//! The verdict is the prefix of the first stderr line (`ok`, `wrong answer`,
//! `points`, `partially correct (n)`, ...). The exit code is only consulted
//! when stderr carries no recognizable prefix.
//! Reference: https://github.com/MikeMirzayanov/testlib

use tracing::warn;

use super::{CheckConfig, CheckResult, CheckerAdapter};
use crate::core::message::Message;
use crate::core::status::Status;
use crate::engine::executer::{Parameter, RunOutcome};
use crate::error::Result;

/// testlib.h exit codes
mod testlib_exit_codes {
    pub const OK: i32 = 0; // _ok
    pub const WRONG_ANSWER: i32 = 1; // _wa
    pub const PRESENTATION_ERROR: i32 = 2; // _pe
    pub const FAIL: i32 = 3; // _fail (checker bug or internal error)
    pub const DIRT: i32 = 4; // _dirt (extra output in user file)
    pub const POINTS: i32 = 5; // _points
    pub const UNEXPECTED_EOF: i32 = 8; // _unexpected_eof
    pub const PARTIALLY: i32 = 16; // _pc(0)
}

/// Convert testlib exit code to status
fn exit_code_to_status(exit_code: i32) -> Status {
    use testlib_exit_codes::*;
    match exit_code {
        OK => Status::Accepted,
        WRONG_ANSWER | PRESENTATION_ERROR | DIRT | UNEXPECTED_EOF | POINTS => Status::WrongAnswer,
        FAIL => Status::SystemError,
        code if code >= PARTIALLY && code <= PARTIALLY + 200 => Status::WrongAnswer,
        _ => {
            warn!("Unknown checker exit code: {}", exit_code);
            if !(0..=127).contains(&exit_code) {
                Status::SystemError
            } else {
                Status::WrongAnswer
            }
        }
    }
}

fn scaled(status_if_full: Status, ratio: f64, full_score: f64, message: &str) -> CheckResult {
    let ratio = ratio.clamp(0.0, 1.0);
    let status = if ratio >= 1.0 {
        status_if_full
    } else {
        Status::WrongAnswer
    };
    CheckResult {
        status,
        score: full_score * ratio,
        scaled_score: Some(ratio),
        message: Message::new(message.trim()),
        locator: None,
    }
}

/// Leading number of `rest` and whatever follows it
fn split_number(rest: &str) -> Option<(f64, &str)> {
    let rest = rest.trim_start();
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let value = rest[..end].parse::<f64>().ok()?;
    Some((value, &rest[end..]))
}

/// Parse a testlib report; `None` when the output carries no known prefix
pub fn parse_report(output: &str, full_score: f64) -> Option<CheckResult> {
    let output = output.trim_start();
    let first = |prefix: &str| {
        output
            .strip_prefix(prefix)
            .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
    };

    if let Some(rest) = first("ok") {
        return Some(CheckResult::new(Status::Accepted, full_score, rest.trim()));
    }
    if let Some(rest) = first("wrong answer") {
        return Some(CheckResult::wrong_answer(rest.trim()));
    }
    if let Some(rest) = first("wrong output format") {
        return Some(CheckResult::wrong_answer(
            Message::with_params("Presentation error: {0}", vec![rest.trim().to_string()]),
        ));
    }
    if let Some(rest) = first("unexpected eof") {
        return Some(CheckResult::wrong_answer(rest.trim()));
    }
    if let Some(rest) = first("FAIL") {
        return Some(CheckResult::system_error(rest.trim()));
    }
    if let Some(rest) = first("points") {
        let (points, message) = split_number(rest).unwrap_or((0.0, rest));
        return Some(scaled(Status::Accepted, points, full_score, message));
    }
    if let Some(rest) = output.strip_prefix("partially correct (") {
        let (value, message) = rest.split_once(')')?;
        let percent = value.trim().parse::<f64>().ok()?;
        return Some(scaled(Status::Accepted, percent / 100.0, full_score, message));
    }
    None
}

/// Parse a testlib report, treating unknown output as a wrong answer
pub fn parse(output: &str, full_score: f64) -> CheckResult {
    parse_report(output, full_score)
        .unwrap_or_else(|| CheckResult::wrong_answer(output.trim().to_string()))
}

/// Interpret a finished testlib process (checker or interactor)
pub fn judge_process(outcome: &RunOutcome, full_score: f64, role: &str) -> CheckResult {
    match outcome.status {
        Status::TimeLimitExceeded => {
            return CheckResult::system_error(Message::with_params(
                "{0} Time Limit Exceeded",
                vec![role.to_string()],
            ))
        }
        Status::MemoryLimitExceeded => {
            return CheckResult::system_error(Message::with_params(
                "{0} Memory Limit Exceeded",
                vec![role.to_string()],
            ))
        }
        Status::SystemError => {
            return CheckResult::system_error(
                outcome.error.clone().unwrap_or_else(|| outcome.stderr.clone()),
            )
        }
        _ => {}
    }
    if outcome.stderr.trim().is_empty() && outcome.status == Status::RuntimeError {
        return CheckResult::system_error(Message::with_params(
            "{0} exited with code {1}",
            vec![role.to_string(), outcome.code.to_string()],
        ));
    }

    parse_report(&outcome.stderr, full_score).unwrap_or_else(|| {
        let status = exit_code_to_status(outcome.code);
        let score = if status == Status::Accepted { full_score } else { 0.0 };
        CheckResult::new(status, score, outcome.stderr.trim().to_string())
    })
}

pub struct Testlib;

impl CheckerAdapter for Testlib {
    fn name(&self) -> &'static str {
        "testlib"
    }

    fn command(&self, config: &CheckConfig) -> Result<Parameter> {
        Ok(config
            .program(["/w/in", "/w/user_out", "/w/answer"])?
            .with_file("in", config.input.clone())
            .with_file("user_out", config.user_stdout.clone())
            .with_file("answer", config.answer.clone()))
    }

    fn parse(&self, outcome: &RunOutcome, config: &CheckConfig) -> Result<CheckResult> {
        Ok(judge_process(outcome, config.score, "Checker"))
    }
}
