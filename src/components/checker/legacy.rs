//! Checker conventions of other judges
//!
//! | type   | arguments                                      | verdict            |
//! |--------|------------------------------------------------|--------------------|
//! | hustoj | `input answer usrout`                          | exit code          |
//! | lemon  | `input usrout answer <score> score message`    | `score` side file  |
//! | qduoj  | `input usrout`                                 | process status     |
//! | syzoj  | none, files `input user_out answer code`       | stdout, 0 to 100   |

use super::{CheckConfig, CheckResult, CheckerAdapter};
use crate::core::message::Message;
use crate::core::status::Status;
use crate::engine::executer::{Parameter, RunOutcome};
use crate::engine::sandbox::CopyInFile;
use crate::error::Result;

/// Checker runs that did not finish on their own
fn crashed(outcome: &RunOutcome) -> Option<CheckResult> {
    match outcome.status {
        Status::Accepted | Status::RuntimeError => None,
        status => Some(CheckResult::system_error(Message::with_params(
            "Checker returned {0}.",
            vec![status.to_string()],
        ))),
    }
}

pub struct Hustoj;

impl CheckerAdapter for Hustoj {
    fn name(&self) -> &'static str {
        "hustoj"
    }

    fn command(&self, config: &CheckConfig) -> Result<Parameter> {
        Ok(config
            .program(["input", "answer", "usrout"])?
            .with_file("input", config.input.clone())
            .with_file("answer", config.answer.clone())
            .with_file("usrout", config.user_stdout.clone()))
    }

    fn parse(&self, outcome: &RunOutcome, config: &CheckConfig) -> Result<CheckResult> {
        Ok(crashed(outcome).unwrap_or_else(|| {
            CheckResult::from_pass(outcome.code == 0, config.score, outcome.stdout.clone())
        }))
    }
}

pub struct Lemon;

impl CheckerAdapter for Lemon {
    fn name(&self) -> &'static str {
        "lemon"
    }

    fn command(&self, config: &CheckConfig) -> Result<Parameter> {
        Ok(config
            .program([
                "input".to_string(),
                "usrout".to_string(),
                "answer".to_string(),
                config.score.to_string(),
                "score".to_string(),
                "message".to_string(),
            ])?
            .with_file("input", config.input.clone())
            .with_file("usrout", config.user_stdout.clone())
            .with_file("answer", config.answer.clone())
            .with_copy_out("score?")
            .with_copy_out("message?"))
    }

    fn parse(&self, outcome: &RunOutcome, config: &CheckConfig) -> Result<CheckResult> {
        if let Some(result) = crashed(outcome) {
            return Ok(result);
        }
        if outcome.code != 0 {
            return Ok(CheckResult::system_error(Message::with_params(
                "Checker returned with status {0}",
                vec![outcome.code.to_string()],
            )));
        }

        let score = outcome
            .files
            .get("score")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|s| s.is_finite())
            .unwrap_or(0.0);
        let message = outcome.files.get("message").cloned().unwrap_or_default();
        let status = if score == config.score {
            Status::Accepted
        } else {
            Status::WrongAnswer
        };
        Ok(CheckResult::new(status, score, message))
    }
}

pub struct Qduoj;

impl CheckerAdapter for Qduoj {
    fn name(&self) -> &'static str {
        "qduoj"
    }

    fn command(&self, config: &CheckConfig) -> Result<Parameter> {
        Ok(config
            .program(["input", "usrout"])?
            .with_file("input", config.input.clone())
            .with_file("usrout", config.user_stdout.clone()))
    }

    fn parse(&self, outcome: &RunOutcome, config: &CheckConfig) -> Result<CheckResult> {
        Ok(CheckResult::from_pass(
            outcome.status == Status::Accepted,
            config.score,
            outcome.stdout.clone(),
        ))
    }
}

pub struct Syzoj;

impl CheckerAdapter for Syzoj {
    fn name(&self) -> &'static str {
        "syzoj"
    }

    fn command(&self, config: &CheckConfig) -> Result<Parameter> {
        Ok(config
            .program(std::iter::empty::<String>())?
            .with_file("input", config.input.clone())
            .with_file("user_out", config.user_stdout.clone())
            .with_file("answer", config.answer.clone())
            .with_file("code", CopyInFile::empty()))
    }

    fn parse(&self, outcome: &RunOutcome, config: &CheckConfig) -> Result<CheckResult> {
        if outcome.status != Status::Accepted {
            return Ok(CheckResult::system_error(Message::with_params(
                "Checker returned {0}.",
                vec![outcome.status.to_string()],
            )));
        }
        let percent = outcome
            .stdout
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|p| p.is_finite())
            .unwrap_or(0.0);
        let status = if percent == 100.0 {
            Status::Accepted
        } else {
            Status::WrongAnswer
        };
        Ok(CheckResult::new(
            status,
            percent * config.score / 100.0,
            outcome.stderr.clone(),
        ))
    }
}
