//! Per-run judging context

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::src;
use crate::components::checker::{get_checker, CheckConfig};
use crate::config::{DetailLevel, JudgeConfig};
use crate::core::languages::{language_of_file, require_language};
use crate::core::utils::file_name;
use crate::engine::cleanup::TeardownCollector;
use crate::engine::compiler::{compile, ArtifactCache, Execute};
use crate::engine::sandbox::{CopyIn, CopyInFile, Sandbox};
use crate::error::{JudgeError, Result};
use crate::jobs::report::{EndEvent, Events, NextEvent};
use crate::jobs::testdata::{Case, ParsedConfig};

/// Flags of the submission being judged
#[derive(Debug, Clone, Default)]
pub struct JudgeMeta {
    pub is_rejudge: bool,
    /// Only judge the case whose input ends with this suffix
    pub hack_rejudge: Option<String>,
    pub user: Option<String>,
}

/// Everything one judging run needs
///
/// Created by the task façade, borrowed by the strategy and the flow engine,
/// dropped after the cleanup collector has run.
pub struct JudgeContext {
    pub rid: String,
    pub lang: String,
    pub code: CopyInFile,
    /// Stdin of an ad hoc run
    pub input: Option<String>,
    /// Input submitted by a hacker
    pub hack_input: Option<CopyInFile>,
    pub config: ParsedConfig,
    pub settings: Arc<JudgeConfig>,
    pub sandbox: Arc<dyn Sandbox>,
    pub cache: Arc<ArtifactCache>,
    pub events: Arc<Events>,
    pub meta: JudgeMeta,
    /// Test-data folder
    pub folder: PathBuf,
    pub cleanup: Arc<TeardownCollector>,
    env: BTreeMap<String, String>,
    rerun: AtomicU32,
    errored: AtomicBool,
    analyzed: AtomicBool,
}

impl JudgeContext {
    pub fn new(
        rid: impl Into<String>,
        settings: Arc<JudgeConfig>,
        sandbox: Arc<dyn Sandbox>,
        events: Arc<Events>,
    ) -> Self {
        let rerun = settings.rerun;
        Self {
            rid: rid.into(),
            lang: String::new(),
            code: CopyInFile::empty(),
            input: None,
            hack_input: None,
            config: ParsedConfig::default(),
            settings,
            sandbox,
            cache: Arc::new(ArtifactCache::new()),
            events,
            meta: JudgeMeta::default(),
            folder: PathBuf::new(),
            cleanup: Arc::new(TeardownCollector::new()),
            env: BTreeMap::new(),
            rerun: AtomicU32::new(rerun),
            errored: AtomicBool::new(false),
            analyzed: AtomicBool::new(false),
        }
    }

    pub fn with_code(mut self, lang: impl Into<String>, code: CopyInFile) -> Self {
        self.lang = lang.into();
        self.code = code;
        self
    }

    pub fn with_config(mut self, config: ParsedConfig, folder: impl Into<PathBuf>) -> Self {
        self.config = config;
        self.folder = folder.into();
        self
    }

    pub fn with_cache(mut self, cache: Arc<ArtifactCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_meta(mut self, meta: JudgeMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_input(mut self, input: Option<String>) -> Self {
        self.input = input;
        self
    }

    pub fn with_hack_input(mut self, input: Option<CopyInFile>) -> Self {
        self.hack_input = input;
        self
    }

    pub fn with_cleanup(mut self, cleanup: Arc<TeardownCollector>) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn next(&self, event: NextEvent) {
        self.events.next(event);
    }

    pub fn end(&self, event: EndEvent) {
        self.events.end(event);
    }

    /// Consume one TLE rerun if any is left
    pub fn take_rerun(&self) -> bool {
        self.rerun
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok()
    }

    pub fn mark_errored(&self) {
        self.errored.store(true, Ordering::Release);
    }

    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// True for the first caller only
    pub fn claim_analysis(&self) -> bool {
        !self.analyzed.swap(true, Ordering::AcqRel)
    }

    /// Environment of auxiliary processes
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.insert("JUDGE_RECORD".into(), self.rid.clone());
        env.insert("JUDGE_LANG".into(), self.lang.clone());
        if let Some(user) = &self.meta.user {
            env.insert("JUDGE_USER".into(), user.clone());
        }
        env
    }

    pub fn case_env(&self, case_id: u32) -> BTreeMap<String, String> {
        let mut env = self.env();
        env.insert("JUDGE_TESTCASE".into(), case_id.to_string());
        env
    }

    fn extra_files(files: &[PathBuf]) -> CopyIn {
        files
            .iter()
            .map(|f| {
                let path = f.to_string_lossy();
                (file_name(&path).to_string(), src(f))
            })
            .collect()
    }

    /// Judge-side files staged next to auxiliary programs
    pub fn judge_copy_in(&self) -> CopyIn {
        let mut copy_in = Self::extra_files(&self.config.judge_extra_files);
        if let Some(testlib) = &self.settings.testlib_path {
            copy_in.insert("testlib.h".into(), src(testlib));
        }
        copy_in
    }

    async fn wrapped_code(&self) -> Result<CopyInFile> {
        if self.config.template.is_empty() {
            return Ok(self.code.clone());
        }
        let (prefix, suffix) = self
            .config
            .template
            .get(&self.lang)
            .ok_or_else(|| JudgeError::compile_message("Language not supported by provided templates"))?;
        let code = match &self.code {
            CopyInFile::Content { content } => content.clone(),
            CopyInFile::Src { src } => tokio::fs::read_to_string(src).await?,
            other => {
                return Err(JudgeError::system_with(
                    "Cannot apply template to {0}.",
                    vec![format!("{:?}", other)],
                ))
            }
        };
        Ok(CopyInFile::content(format!("{}{}{}", prefix, code, suffix)))
    }

    /// Compile the submission; the artifact lives until the run is cleaned up
    pub async fn compile_user(&self) -> Result<Arc<Execute>> {
        let lang = require_language(&self.lang)?;
        let code = self.wrapped_code().await?;
        let copy_in = Self::extra_files(&self.config.user_extra_files);
        let execute = Arc::new(compile(&self.sandbox, &self.settings, &lang, code, copy_in).await?);
        self.cleanup.add(execute.clone());

        if let Some(text) = &execute.compiler_text {
            self.next(NextEvent::compiler_text(text.clone()));
        }
        info!("Submission {} compiled as {}", self.rid, lang.key);
        Ok(execute)
    }

    /// Compile a test-data program through the shared cache
    pub async fn compile_aux(&self, path: &Path) -> Result<Arc<Execute>> {
        let lang = language_of_file(&path.to_string_lossy())?;
        debug!("Compiling auxiliary program {} for {}", path.display(), self.rid);
        self.cache
            .get_or_compile(&self.sandbox, &self.settings, &lang, src(path), self.judge_copy_in())
            .await
    }

    /// Checker program, when the configured checker type needs one
    pub async fn compile_checker(&self) -> Result<Option<Arc<Execute>>> {
        if !get_checker(&self.config.checker_type)?.needs_program() {
            return Ok(None);
        }
        let checker = self
            .config
            .checker
            .as_deref()
            .ok_or_else(|| JudgeError::format("You did not specify a checker."))?;
        Ok(Some(self.compile_aux(checker).await?))
    }

    /// Checker inputs for one case
    pub fn check_config(
        &self,
        checker: Option<Arc<Execute>>,
        case: &Case,
        user_stdout: CopyInFile,
        score: f64,
    ) -> CheckConfig {
        CheckConfig::new(src(&case.input), src(&case.output), user_stdout, score)
            .with_execute(checker)
            .with_copy_in(self.judge_copy_in())
            .with_detail(self.config.detail == DetailLevel::Full)
            .with_env(self.case_env(case.id))
    }
}
