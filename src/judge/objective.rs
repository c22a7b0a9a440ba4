//! Objective problems: fixed answers, no program runs
//!
//! The submission is a YAML mapping from item key to answer. Keys look like
//! `subtask-case`; each one is scored against the configured standard answer.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_yaml::Value;
use tracing::debug;

use super::flow::round_score;
use super::{CaseResult, JudgeContext, Strategy};
use crate::core::status::Status;
use crate::engine::sandbox::CopyInFile;
use crate::error::{JudgeError, Result};
use crate::jobs::report::{EndEvent, NextEvent, SubtaskInfo};
use crate::jobs::testdata::{ProblemKind, StandardAnswer, SubtaskKind};

pub struct Objective;

/// Scalar answer as text; sequences and mappings have none
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn answer_set(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(text).collect(),
        other => text(other).into_iter().collect(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Sequence(items) => items.is_empty(),
        _ => false,
    }
}

/// Grade one item: status, score and message
fn grade(standard: &StandardAnswer, answer: Option<&Value>) -> (Status, f64, &'static str) {
    let answer = match answer.filter(|a| !is_blank(a)) {
        Some(answer) => answer,
        None => return (Status::WrongAnswer, 0.0, "No answer"),
    };
    let incorrect = (Status::WrongAnswer, 0.0, "Incorrect");
    match standard {
        StandardAnswer::Scored(Value::Sequence(expected), full) => {
            let expected: BTreeSet<String> = expected.iter().filter_map(text).collect();
            let given = answer_set(answer);
            if given == expected {
                (Status::Accepted, *full, "Correct")
            } else if !given.is_empty() && given.is_subset(&expected) {
                (Status::WrongAnswer, full / 2.0, "Partially Correct")
            } else {
                incorrect
            }
        }
        StandardAnswer::Scored(expected, full) => match (text(expected), text(answer)) {
            (Some(expected), Some(given)) if expected == given => (Status::Accepted, *full, "Correct"),
            _ => incorrect,
        },
        StandardAnswer::Options(options) => match text(answer).and_then(|a| options.get(&a)) {
            Some(score) if *score > 0.0 => (Status::Accepted, *score, "Correct"),
            _ => incorrect,
        },
    }
}

/// `subtask-case` item key; missing parts are 0
fn item_ids(key: &str) -> (u32, u32) {
    let mut parts = key.split('-').map(|p| p.trim().parse::<u32>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

async fn read_code(code: &CopyInFile) -> Result<String> {
    Ok(match code {
        CopyInFile::Content { content } => content.replace('\r', ""),
        CopyInFile::Src { src } => tokio::fs::read_to_string(src).await?,
        _ => String::new(),
    })
}

#[async_trait]
impl Strategy for Objective {
    fn name(&self) -> &'static str {
        "objective"
    }

    async fn judge(&self, ctx: &JudgeContext) -> Result<()> {
        ctx.next(NextEvent::progress(Status::Judging, 0.0));
        let standard = match &ctx.config.kind {
            ProblemKind::Objective { answers } if !answers.is_empty() => answers,
            _ => return Err(JudgeError::format("Invalid standard answer.")),
        };

        let code = read_code(&ctx.code).await?;
        let answers = match serde_yaml::from_str::<Value>(&code) {
            Ok(Value::Mapping(answers)) => answers,
            parsed => {
                debug!("Unparsable objective answer for {}: {:?}", ctx.rid, parsed.err());
                ctx.end(EndEvent::new(Status::WrongAnswer, 0.0).with_message("Unable to parse answer."));
                return Ok(());
            }
        };

        let mut total = 0.0;
        let mut status = Status::Waiting;
        let mut subtasks: BTreeMap<u32, SubtaskInfo> = BTreeMap::new();
        for (key, expected) in standard {
            let (item_status, score, message) = grade(expected, answers.get(key.as_str()));
            let (subtask_id, case_id) = item_ids(key);
            total += score;
            status = status.worst(item_status);
            let info = subtasks.entry(subtask_id).or_insert(SubtaskInfo {
                kind: SubtaskKind::Sum,
                score: 0.0,
                status: Status::Waiting,
            });
            info.score += score;
            info.status = info.status.worst(item_status);

            ctx.next(NextEvent::case(CaseResult {
                id: case_id,
                subtask_id,
                status: item_status,
                score,
                time: 0.0,
                memory: 0.0,
                message: message.into(),
                evidence: None,
            }));
        }

        let mut end = EndEvent::new(status, round_score(total));
        end.subtasks = subtasks;
        ctx.end(end);
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
type: objective
answers:
  1-1: [B, 10]
  1-2: [[A, C], 20]
  2-1: {yes: 5, maybe: 2}
"#;

    async fn submit(answer: &str) -> (Fixture, EndEvent) {
        let fixture = Fixture::new(|_| mock::ok(""));
        let ctx = fixture.judging("objective", answer, CONFIG).await;
        Objective.judge(&ctx).await.unwrap();
        let end = fixture.reporter.last_end();
        (fixture, end)
    }

    #[test]
    fn test_grade_sets() {
        let standard = StandardAnswer::Scored(serde_yaml::from_str("[A, C]").unwrap(), 20.0);
        let grade_of = |yaml: &str| grade(&standard, Some(&serde_yaml::from_str(yaml).unwrap()));
        assert_eq!(grade_of("[C, A]"), (Status::Accepted, 20.0, "Correct"));
        assert_eq!(grade_of("A"), (Status::WrongAnswer, 10.0, "Partially Correct"));
        assert_eq!(grade_of("[A, B]"), (Status::WrongAnswer, 0.0, "Incorrect"));
        assert_eq!(grade(&standard, None), (Status::WrongAnswer, 0.0, "No answer"));
    }

    #[tokio::test]
    async fn test_all_correct() {
        let (fixture, end) = submit("1-1: B\n1-2: [A, C]\n2-1: yes\n").await;
        assert_eq!(end.status, Status::Accepted);
        assert_eq!(end.score, 35.0);
        assert_eq!(end.subtasks[&1].score, 30.0);
        assert_eq!(end.subtasks[&2].score, 5.0);
        let cases = fixture.reporter.cases();
        assert_eq!(cases.len(), 3);
        assert_eq!((cases[1].subtask_id, cases[1].id), (1, 2));
        assert!(fixture.mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_partial_and_missing() {
        let (fixture, end) = submit("1-2: [C]\n2-1: maybe\n").await;
        assert_eq!(end.status, Status::WrongAnswer);
        assert_eq!(end.score, 12.0);
        let messages: Vec<_> = fixture
            .reporter
            .cases()
            .iter()
            .map(|c| c.message.render())
            .collect();
        assert_eq!(messages, vec!["No answer", "Partially Correct", "Correct"]);
    }

    #[tokio::test]
    async fn test_unparsable_answer() {
        let (fixture, end) = submit("just text").await;
        assert_eq!(end.status, Status::WrongAnswer);
        assert_eq!(end.message.unwrap().render(), "Unable to parse answer.");
        assert!(fixture.reporter.cases().is_empty());
    }
}
