//! CPLib checkers reporting JSON on stderr (`--report-format=json`)
//!
//! Besides a status and a scaled score, a report may carry the reader trace
//! stack at the point of failure. Its innermost frame locates the offending
//! token in one of the compared streams.

use serde::Deserialize;

use super::{CheckConfig, CheckResult, CheckerAdapter, StreamKind, TraceLocator};
use crate::core::message::Message;
use crate::core::status::Status;
use crate::engine::executer::{Parameter, RunOutcome};
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct IncompleteTrace {
    line_num: u64,
    col_num: u64,
    byte_num: u64,
}

#[derive(Debug, Deserialize)]
struct TraceStack {
    stream_name: String,
    #[serde(default)]
    stack: Vec<IncompleteTrace>,
}

#[derive(Debug, Deserialize)]
struct CheckerReport {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    reader_trace_stack: Option<TraceStack>,
}

fn stream_kind(name: &str) -> Option<StreamKind> {
    match name {
        "inf" | "input" => Some(StreamKind::Input),
        "ouf" | "output" | "user_output" => Some(StreamKind::UserOutput),
        "ans" | "answer" => Some(StreamKind::Answer),
        _ => None,
    }
}

fn locate(stack: &TraceStack) -> Option<TraceLocator> {
    let frame = stack.stack.last()?;
    Some(TraceLocator {
        stream: stream_kind(&stack.stream_name)?,
        line: frame.line_num,
        col: frame.col_num,
        byte: frame.byte_num,
    })
}

/// Parse a JSON checker report
pub fn parse(output: &str, full_score: f64) -> CheckResult {
    let report: CheckerReport = match serde_json::from_str(output.trim()) {
        Ok(report) => report,
        Err(e) => {
            return CheckResult::system_error(Message::with_params(
                "Invalid checker report: {0}",
                vec![e.to_string()],
            ))
        }
    };

    let status = match report.status.as_str() {
        "internal_error" => Status::SystemError,
        "accepted" => Status::Accepted,
        "wrong_answer" | "partially_correct" => Status::WrongAnswer,
        other => {
            return CheckResult::system_error(Message::with_params(
                "Invalid checker status {0}",
                vec![other.to_string()],
            ))
        }
    };
    let scaled = report.score.unwrap_or(0.0);

    CheckResult {
        status,
        score: scaled * full_score,
        scaled_score: Some(scaled),
        message: Message::new(report.message.unwrap_or_default()),
        locator: report.reader_trace_stack.as_ref().and_then(locate),
    }
}

pub struct Cplib;

impl CheckerAdapter for Cplib {
    fn name(&self) -> &'static str {
        "cplib"
    }

    fn command(&self, config: &CheckConfig) -> Result<Parameter> {
        Ok(config
            .program(["/w/in", "/w/user_out", "/w/answer", "--report-format=json"])?
            .with_file("in", config.input.clone())
            .with_file("user_out", config.user_stdout.clone())
            .with_file("answer", config.answer.clone()))
    }

    fn parse(&self, outcome: &RunOutcome, config: &CheckConfig) -> Result<CheckResult> {
        Ok(match outcome.status {
            Status::TimeLimitExceeded => CheckResult::system_error("Checker Time Limit Exceeded"),
            Status::MemoryLimitExceeded => CheckResult::system_error("Checker Memory Limit Exceeded"),
            _ => parse(&outcome.stderr, config.score),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const REPORT: &str = r#"{
        "status": "wrong_answer",
        "message": "expected 3, found 4",
        "score": 0.0,
        "reader_trace_stack": {
            "stream_name": "ouf",
            "stack": [
                {"var_name": "n", "line_num": 0, "col_num": 0, "byte_num": 0},
                {"var_name": "a[2]", "line_num": 1, "col_num": 4, "byte_num": 12}
            ]
        }
    }"#;

    #[test]
    fn test_parse_with_trace() {
        let result = parse(REPORT, 10.0);
        assert_eq!(result.status, Status::WrongAnswer);
        assert_eq!(result.message.render(), "expected 3, found 4");
        assert_eq!(
            result.locator,
            Some(TraceLocator {
                stream: StreamKind::UserOutput,
                line: 1,
                col: 4,
                byte: 12,
            })
        );
    }

    #[test]
    fn test_parse_is_idempotent() {
        assert_eq!(parse(REPORT, 10.0), parse(REPORT, 10.0));
    }

    #[test]
    fn test_partial_score_scaled() {
        let result = parse(r#"{"status": "partially_correct", "score": 0.5}"#, 20.0);
        assert_eq!(result.status, Status::WrongAnswer);
        assert_eq!(result.score, 10.0);
        assert_eq!(result.scaled_score, Some(0.5));
        assert!(result.locator.is_none());
    }

    #[test]
    fn test_invalid_reports() {
        assert_eq!(parse("not json", 1.0).status, Status::SystemError);
        let unknown = parse(r#"{"status": "maybe", "score": 1}"#, 1.0);
        assert_eq!(unknown.status, Status::SystemError);
        assert_eq!(unknown.message.render(), "Invalid checker status maybe");
    }
}
