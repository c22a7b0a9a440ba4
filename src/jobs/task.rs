//! Job façade: one submission in, one end event out
//!
//! A [`JudgeJob`] names the code, the test data and the kind of run. The task
//! stages both on disk, picks the strategy and turns every error into the
//! matching terminal event, so the caller never has to inspect a failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::JudgeConfig;
use crate::core::message::Message;
use crate::core::status::Status;
use crate::core::utils::{compiler_text, extract_zip};
use crate::engine::cleanup::TeardownCollector;
use crate::engine::compiler::ArtifactCache;
use crate::engine::sandbox::{CopyInFile, Sandbox};
use crate::error::{JudgeError, Result};
use crate::jobs::report::{EndEvent, Events, NextEvent, Reporter};
use crate::jobs::testdata::read_config;
use crate::judge::context::JudgeMeta;
use crate::judge::{get_strategy, JudgeContext};

/// What the submission asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    #[default]
    Judge,
    Hack,
    Generate,
    Run,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobMeta {
    pub is_rejudge: bool,
    pub problem_owner: Option<String>,
    pub user: Option<String>,
    pub submission_type: JobKind,
    /// Input file suffix of the case a successful hack added
    pub hack_rejudge: Option<String>,
}

/// Job received from the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeJob {
    pub submission_id: String,
    pub language: String,
    /// Inline source code
    #[serde(default)]
    pub code: Option<String>,
    /// `code` holds base64 bytes (archives, binaries)
    #[serde(default)]
    pub code_base64: bool,
    /// Source code already on disk
    #[serde(default)]
    pub code_ref: Option<PathBuf>,
    /// Stdin of an ad hoc run
    #[serde(default)]
    pub input: Option<String>,
    /// Hack input content
    #[serde(default)]
    pub hack: Option<String>,
    #[serde(default)]
    pub hack_ref: Option<PathBuf>,
    /// Test-data folder or zip archive
    #[serde(default)]
    pub test_data_ref: Option<PathBuf>,
    /// Keys merged over `config.yaml`
    #[serde(default)]
    pub config_overrides: serde_json::Value,
    #[serde(default)]
    pub meta: JobMeta,
}

pub struct JudgeTask {
    job: JudgeJob,
    settings: Arc<JudgeConfig>,
    sandbox: Arc<dyn Sandbox>,
    cache: Arc<ArtifactCache>,
    events: Arc<Events>,
}

impl JudgeTask {
    pub fn new(
        job: JudgeJob,
        settings: Arc<JudgeConfig>,
        sandbox: Arc<dyn Sandbox>,
        cache: Arc<ArtifactCache>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let events = Arc::new(Events::new(job.submission_id.clone(), reporter));
        Self {
            job,
            settings,
            sandbox,
            cache,
            events,
        }
    }

    /// Judge the job; the reporter always receives exactly one end event
    pub async fn handle(&self) {
        let rid = &self.job.submission_id;
        info!(
            "Handling submission {}: language={}, type={:?}",
            rid, self.job.language, self.job.meta.submission_type
        );
        let cleanup = Arc::new(TeardownCollector::new());
        let limit = Duration::from_secs(self.settings.task_timeout_secs);

        match tokio::time::timeout(limit, self.judge(cleanup.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report_error(e),
            Err(_) => {
                error!("Submission {} timed out after {:?}", rid, limit);
                self.events
                    .end(EndEvent::new(Status::SystemError, 0.0).with_message("Judge timed out."));
            }
        }
        cleanup.teardown_all().await;

        if !self.events.has_ended() {
            warn!("Submission {} finished without an end event", rid);
            self.events.end(
                EndEvent::new(Status::SystemError, 0.0).with_message("Judge ended without a result."),
            );
        }
    }

    async fn judge(&self, cleanup: Arc<TeardownCollector>) -> Result<()> {
        let job = &self.job;
        tokio::fs::create_dir_all(&self.settings.tmp_dir).await?;
        let tmp = tempfile::Builder::new()
            .prefix("judge-")
            .tempdir_in(&self.settings.tmp_dir)?;

        let code = self.stage_code(tmp.path()).await?;
        let folder = self.stage_test_data(tmp.path()).await?;
        let config = read_config(&folder, &job.config_overrides, &self.settings).await?;

        let is_owner = job.meta.user.is_some() && job.meta.user == job.meta.problem_owner;
        if config.auto_detected && is_owner {
            self.events.next(NextEvent::message(Message::with_params(
                "Found {0} testcases.",
                vec![config.count.to_string()],
            )));
        }

        let strategy = match job.meta.submission_type {
            _ if job.input.is_some() => "run",
            JobKind::Run => "run",
            JobKind::Hack => "hack",
            JobKind::Generate => "generate",
            JobKind::Judge => config.kind.strategy(),
        };
        let strategy = get_strategy(strategy)?;
        info!("Submission {} judged by {}", job.submission_id, strategy.name());

        let hack_input = match (&job.hack, &job.hack_ref) {
            (Some(content), _) => Some(CopyInFile::content(content.clone())),
            (None, Some(path)) => Some(CopyInFile::src(path.to_string_lossy().into_owned())),
            (None, None) => None,
        };

        let ctx = JudgeContext::new(
            job.submission_id.clone(),
            self.settings.clone(),
            self.sandbox.clone(),
            self.events.clone(),
        )
        .with_code(job.language.clone(), code)
        .with_config(config, folder)
        .with_cache(self.cache.clone())
        .with_meta(JudgeMeta {
            is_rejudge: job.meta.is_rejudge,
            hack_rejudge: job.meta.hack_rejudge.clone(),
            user: job.meta.user.clone(),
        })
        .with_input(job.input.clone())
        .with_hack_input(hack_input)
        .with_cleanup(cleanup);

        strategy.judge(&ctx).await
    }

    async fn stage_code(&self, tmp: &Path) -> Result<CopyInFile> {
        let job = &self.job;
        match (&job.code, &job.code_ref) {
            (Some(code), _) if job.code_base64 => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(code.trim())
                    .map_err(|e| JudgeError::system_with("Invalid base64 code: {0}", vec![e.to_string()]))?;
                let path = tmp.join("code");
                tokio::fs::write(&path, bytes).await?;
                Ok(CopyInFile::src(path.to_string_lossy().into_owned()))
            }
            (Some(code), _) => Ok(CopyInFile::content(code.clone())),
            (None, Some(path)) => Ok(CopyInFile::src(path.to_string_lossy().into_owned())),
            (None, None) => Ok(CopyInFile::content("")),
        }
    }

    /// Folder holding `config.yaml` (or the detectable case files)
    async fn stage_test_data(&self, tmp: &Path) -> Result<PathBuf> {
        let source = match &self.job.test_data_ref {
            Some(path) => path.clone(),
            None => {
                let empty = tmp.join("data");
                tokio::fs::create_dir_all(&empty).await?;
                return Ok(empty);
            }
        };
        if source.is_dir() {
            return Ok(source);
        }
        if !source.is_file() {
            return Err(JudgeError::system_with(
                "Test data {0} not found.",
                vec![source.display().to_string()],
            ));
        }

        let dest = tmp.join("data");
        let archive = std::fs::File::open(&source)?;
        let unpack_to = dest.clone();
        tokio::task::spawn_blocking(move || extract_zip(archive, &unpack_to))
            .await
            .map_err(|e| JudgeError::system_with("Unpack task failed: {0}", vec![e.to_string()]))??;
        single_directory(&dest).await
    }

    fn report_error(&self, err: JudgeError) {
        if self.events.has_ended() {
            warn!("Submission {} failed after its end event: {}", self.job.submission_id, err);
            return;
        }
        let end = match err {
            JudgeError::Compile {
                stdout,
                stderr,
                message,
            } => {
                let text = compiler_text(&stdout, &stderr);
                let text = if text.is_empty() {
                    message.clone().unwrap_or_default()
                } else {
                    text
                };
                self.events.next(NextEvent::compiler_text(text));
                let end = EndEvent::new(Status::CompileError, 0.0);
                match message {
                    Some(message) => end.with_message(message),
                    None => end,
                }
            }
            JudgeError::Format(message) => {
                warn!("Submission {} has broken test data: {}", self.job.submission_id, message.render());
                self.events.next(NextEvent::message("Testdata configuration incorrect."));
                EndEvent::new(Status::FormatError, 0.0).with_message(message)
            }
            JudgeError::System(message) => {
                error!("System error on {}: {}", self.job.submission_id, message.render());
                EndEvent::new(Status::SystemError, 0.0).with_message("System error.")
            }
            err @ JudgeError::Sandbox(_) => {
                error!("Sandbox failure on {}: {:#}", self.job.submission_id, err);
                EndEvent::new(Status::SystemError, 0.0).with_message("Sandbox service unavailable.")
            }
        };
        self.events.end(end);
    }
}

/// Archives often wrap everything in one top-level directory
async fn single_directory(dest: &Path) -> Result<PathBuf> {
    if dest.join("config.yaml").is_file() {
        return Ok(dest.to_path_buf());
    }
    let mut entries = tokio::fs::read_dir(dest).await?;
    let mut only = None;
    while let Some(entry) = entries.next_entry().await? {
        if only.is_some() {
            return Ok(dest.to_path_buf());
        }
        only = Some(entry);
    }
    match only {
        Some(entry) if entry.file_type().await?.is_dir() => Ok(entry.path()),
        _ => Ok(dest.to_path_buf()),
    }
}
