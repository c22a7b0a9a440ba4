//! Progress and final events sent to the reporting side

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::message::Message;
use crate::core::status::Status;
use crate::error::Result;
use crate::jobs::testdata::SubtaskKind;
use crate::judge::CaseResult;

/// Incremental progress
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<CaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_text: Option<String>,
}

impl NextEvent {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(status: Status, progress: f64) -> Self {
        Self {
            status: Some(status),
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn case(case: CaseResult) -> Self {
        Self {
            case: Some(case),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<Message>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn compiler_text(text: impl Into<String>) -> Self {
        Self {
            compiler_text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_add_progress(mut self, add_progress: f64) -> Self {
        self.add_progress = Some(add_progress);
        self
    }
}

/// Aggregate of one subtask in the final event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtaskInfo {
    #[serde(rename = "type")]
    pub kind: SubtaskKind,
    pub score: f64,
    pub status: Status,
}

/// Terminal event of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndEvent {
    pub status: Status,
    pub score: f64,
    /// Total time in milliseconds
    pub time: f64,
    /// Peak memory in KB
    pub memory: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub subtasks: BTreeMap<u32, SubtaskInfo>,
    /// Nothing changed; the caller keeps its previous result
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nop: bool,
}

impl EndEvent {
    pub fn new(status: Status, score: f64) -> Self {
        Self {
            status,
            score,
            ..Default::default()
        }
    }

    pub fn nop() -> Self {
        Self {
            nop: true,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, time: f64, memory: f64) -> Self {
        self.time = time;
        self.memory = memory;
        self
    }

    pub fn with_message(mut self, message: impl Into<Message>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Receiver of judging events
#[async_trait]
pub trait Reporter: Send + Sync {
    fn next(&self, event: NextEvent);

    fn end(&self, event: EndEvent);

    /// Publish a produced file (generated test data)
    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<()>;
}

/// Event sink of one run; the terminal event goes out at most once
pub struct Events {
    reporter: Arc<dyn Reporter>,
    rid: String,
    ended: AtomicBool,
}

impl Events {
    pub fn new(rid: impl Into<String>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            reporter,
            rid: rid.into(),
            ended: AtomicBool::new(false),
        }
    }

    pub fn next(&self, event: NextEvent) {
        if self.has_ended() {
            debug!("Dropping progress of {} after its end event", self.rid);
            return;
        }
        self.reporter.next(event);
    }

    pub fn end(&self, event: EndEvent) {
        if self.ended.swap(true, Ordering::AcqRel) {
            warn!("Submission {} ended twice, ignoring {:?}", self.rid, event.status);
            return;
        }
        info!(
            "Submission {} finished: status={}, score={}",
            self.rid, event.status, event.score
        );
        self.reporter.end(event);
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub async fn upload(&self, name: &str, content: Vec<u8>) -> Result<()> {
        self.reporter.upload(name, content).await
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Line<'a> {
    Next {
        rid: &'a str,
        #[serde(flatten)]
        body: &'a NextEvent,
    },
    End {
        rid: &'a str,
        #[serde(flatten)]
        body: &'a EndEvent,
    },
    Upload {
        rid: &'a str,
        name: &'a str,
        path: String,
    },
}

/// Writes every event as one JSON line on stdout
pub struct JsonLinesReporter {
    rid: String,
    upload_dir: PathBuf,
    out: Mutex<std::io::Stdout>,
}

impl JsonLinesReporter {
    pub fn new(rid: impl Into<String>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            rid: rid.into(),
            upload_dir: upload_dir.into(),
            out: Mutex::new(std::io::stdout()),
        }
    }

    fn emit(&self, line: &Line<'_>) {
        let json = match serde_json::to_string(line) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize event: {}", e);
                return;
            }
        };
        if let Ok(mut out) = self.out.lock() {
            if let Err(e) = writeln!(out, "{}", json).and_then(|_| out.flush()) {
                warn!("Failed to write event: {}", e);
            }
        }
    }
}

#[async_trait]
impl Reporter for JsonLinesReporter {
    fn next(&self, event: NextEvent) {
        self.emit(&Line::Next {
            rid: &self.rid,
            body: &event,
        });
    }

    fn end(&self, event: EndEvent) {
        self.emit(&Line::End {
            rid: &self.rid,
            body: &event,
        });
    }

    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let path = self
            .upload_dir
            .join(format!("{}-{}", self.rid, crate::core::utils::file_name(name)));
        tokio::fs::write(&path, content).await?;
        self.emit(&Line::Upload {
            rid: &self.rid,
            name,
            path: path.display().to_string(),
        });
        Ok(())
    }
}

/// Keeps every event in memory
#[cfg(test)]
#[derive(Default)]
pub struct RecordingReporter {
    pub nexts: Mutex<Vec<NextEvent>>,
    pub ends: Mutex<Vec<EndEvent>>,
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub fn cases(&self) -> Vec<CaseResult> {
        self.nexts
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.case.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.nexts
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.message.as_ref().map(Message::render))
            .collect()
    }

    pub fn last_end(&self) -> EndEvent {
        self.ends.lock().unwrap().last().cloned().expect("run ended")
    }
}

#[cfg(test)]
#[async_trait]
impl Reporter for RecordingReporter {
    fn next(&self, event: NextEvent) {
        self.nexts.lock().unwrap().push(event);
    }

    fn end(&self, event: EndEvent) {
        self.ends.lock().unwrap().push(event);
    }

    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<()> {
        self.uploads.lock().unwrap().push((name.to_string(), content));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_end_only_once() {
        let recorder = Arc::new(RecordingReporter::default());
        let events = Events::new("r1", recorder.clone());
        events.next(NextEvent::status(Status::Compiling));
        events.end(EndEvent::new(Status::Accepted, 100.0));
        events.end(EndEvent::new(Status::SystemError, 0.0));
        events.next(NextEvent::message("late"));

        assert_eq!(recorder.ends.lock().unwrap().len(), 1);
        assert_eq!(recorder.last_end().status, Status::Accepted);
        assert_eq!(recorder.nexts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_line_shape() {
        let event = NextEvent::progress(Status::Judging, 0.0);
        let line = Line::Next {
            rid: "r1",
            body: &event,
        };
        assert_eq!(
            serde_json::to_value(&line).unwrap(),
            json!({"event": "next", "rid": "r1", "status": "judging", "progress": 0.0})
        );

        let end = EndEvent::nop();
        let value = serde_json::to_value(&Line::End {
            rid: "r1",
            body: &end,
        })
        .unwrap();
        assert_eq!(value["nop"], json!(true));
        assert!(value.get("subtasks").is_none());
    }
}
