//! Line/token comparison through `diff`
//!
//! `default` ignores blank lines and trailing whitespace (`diff -BZ`),
//! `strict` compares byte for byte. Only the first hunk of the diff is
//! turned into a message.

use std::sync::OnceLock;

use regex::Regex;

use super::{CheckConfig, CheckResult, CheckerAdapter, CHECKER_MEMORY_LIMIT_MB, CHECKER_TIME_LIMIT_MS};
use crate::core::message::Message;
use crate::core::status::Status;
use crate::engine::executer::{Parameter, RunOutcome};
use crate::error::Result;

const DIFF: &str = "/usr/bin/diff";

/// Tokens longer than this are shortened in messages
const TOKEN_MAX: usize = 20;

const USER_LONGER: &str = "User output longer than standard answer.";
const ANSWER_LONGER: &str = "Standard answer longer than user output.";

pub struct DiffChecker {
    name: &'static str,
    strict: bool,
}

pub static DEFAULT: DiffChecker = DiffChecker {
    name: "default",
    strict: false,
};

pub static STRICT: DiffChecker = DiffChecker {
    name: "strict",
    strict: true,
};

impl CheckerAdapter for DiffChecker {
    fn name(&self) -> &'static str {
        self.name
    }

    fn needs_program(&self) -> bool {
        false
    }

    fn command(&self, config: &CheckConfig) -> Result<Parameter> {
        let mut args = vec![DIFF.to_string()];
        if !self.strict {
            args.push("-BZ".into());
        }
        args.extend(["usrout".to_string(), "answer".to_string()]);

        Ok(Parameter::new(args)
            .with_copy_in(&config.copy_in)
            .with_file("usrout", config.user_stdout.clone())
            .with_file("answer", config.answer.clone())
            .with_limits(CHECKER_TIME_LIMIT_MS, CHECKER_MEMORY_LIMIT_MB))
    }

    fn parse(&self, outcome: &RunOutcome, config: &CheckConfig) -> Result<CheckResult> {
        // diff exits 1 on difference, anything else means it could not compare
        let compared = matches!(outcome.status, Status::Accepted | Status::RuntimeError)
            && !outcome.signalled
            && outcome.code <= 1;
        if !compared {
            return Ok(CheckResult::system_error(Message::with_params(
                "Comparator failed: {0}",
                vec![outcome.error.clone().unwrap_or_else(|| outcome.stderr.trim().to_string())],
            )));
        }

        if outcome.stdout.is_empty() {
            return Ok(CheckResult::accepted(config.score));
        }
        let message = if config.detail && !self.strict {
            parse_diff_message(&outcome.stdout)
        } else {
            Message::default()
        };
        Ok(CheckResult::wrong_answer(message))
    }
}

fn shorten(token: &str) -> String {
    if token.chars().count() > TOKEN_MAX {
        format!("{}...", token.chars().take(16).collect::<String>())
    } else {
        token.to_string()
    }
}

fn is_number(token: &str) -> bool {
    token.parse::<f64>().is_ok()
}

/// Describe the first hunk of a normal-format diff
///
/// Falls back to the first 30 characters of the raw diff when the hunk
/// cannot be explained token by token.
pub fn parse_diff_message(diff: &str) -> Message {
    explain_hunk(diff).unwrap_or_else(|| {
        let raw = diff.strip_suffix('\n').unwrap_or(diff);
        Message::new(raw.chars().take(30).collect::<String>())
    })
}

fn hunk_header() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"^(\d+)(?:,\d+)?([acd])\d+(?:,\d+)?$").expect("valid hunk header pattern")
    })
}

fn explain_hunk(diff: &str) -> Option<Message> {
    let captures = hunk_header().captures(diff.lines().next()?)?;
    match &captures[2] {
        "d" => return Some(Message::new(USER_LONGER)),
        "a" => return Some(Message::new(ANSWER_LONGER)),
        _ => {}
    }
    // 1-based, as numbered in the hunk header
    let line: u64 = captures[1].parse().ok()?;

    let (user_part, answer_part) = diff.split_once("\n---\n")?;
    let user_line = user_part.lines().nth(1)?.get(2..).unwrap_or_default();
    let answer_line = answer_part.lines().next()?.get(2..).unwrap_or_default();

    let user: Vec<&str> = user_line.split_whitespace().collect();
    let answer: Vec<&str> = answer_line.split_whitespace().collect();

    if answer.iter().all(|t| is_number(t)) {
        if user.len() > answer.len() {
            return Some(Message::new(USER_LONGER));
        }
        if user.len() < answer.len() {
            return Some(Message::new(ANSWER_LONGER));
        }
    }

    for (i, token) in user.iter().enumerate() {
        match answer.get(i) {
            Some(expected) if expected == token => continue,
            Some(expected) => {
                return Some(Message::with_params(
                    "On line {0}: read {1}, expect {2}.",
                    vec![line.to_string(), shorten(token), shorten(expected)],
                ))
            }
            None => return Some(Message::new(USER_LONGER)),
        }
    }
    (user.len() < answer.len()).then(|| Message::new(ANSWER_LONGER))
}
