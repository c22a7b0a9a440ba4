//! Compiler module - source compilation inside the sandbox
//!
//! A successful compile leaves the target binary in the sandbox as a cached
//! artifact. The returned [`Execute`] references it by id and deletes it
//! exactly once through [`Execute::clean`], or from its drop guard when a
//! run unwinds without cleaning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::JudgeConfig;
use crate::core::languages::LanguageConfig;
use crate::core::status::Status;
use crate::core::utils::compiler_text;
use crate::engine::cleanup::AsyncTeardown;
use crate::engine::executer::{self, Parameter};
use crate::engine::sandbox::{CopyIn, CopyInFile, Sandbox};
use crate::error::{JudgeError, Result};

struct Artifact {
    sandbox: Arc<dyn Sandbox>,
    file_id: String,
    released: AtomicBool,
}

impl Artifact {
    async fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Deleting compiled artifact {}", self.file_id);
        if let Err(e) = self.sandbox.delete_file(&self.file_id).await {
            warn!("Failed to delete compiled artifact {}: {}", self.file_id, e);
        }
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if self.released.load(Ordering::Acquire) {
            return;
        }
        let sandbox = self.sandbox.clone();
        let file_id = std::mem::take(&mut self.file_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sandbox.delete_file(&file_id).await {
                        warn!("Failed to delete leaked artifact {}: {}", file_id, e);
                    }
                });
            }
            Err(_) => warn!("Artifact {} leaked outside of a runtime", file_id),
        }
    }
}

/// A runnable program: command line, files to stage, and its artifact
pub struct Execute {
    pub execute: Vec<String>,
    pub copy_in: CopyIn,
    pub lang: LanguageConfig,
    /// Compiler diagnostics of a successful compile
    pub compiler_text: Option<String>,
    artifact: Option<Artifact>,
}

impl std::fmt::Debug for Execute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execute")
            .field("execute", &self.execute)
            .field("copy_in", &self.copy_in)
            .field("lang", &self.lang.key)
            .field("artifact", &self.artifact_id())
            .finish()
    }
}

impl Execute {
    /// Program that needs no artifact (interpreted, or a system binary)
    pub fn plain(execute: Vec<String>, copy_in: CopyIn, lang: LanguageConfig) -> Self {
        Self {
            execute,
            copy_in,
            lang,
            compiler_text: None,
            artifact: None,
        }
    }

    pub fn artifact_id(&self) -> Option<&str> {
        self.artifact.as_ref().map(|a| a.file_id.as_str())
    }

    /// Base parameter for running this program
    pub fn param(&self) -> Parameter {
        Parameter::new(self.execute.iter().cloned())
            .with_copy_in(&self.copy_in)
            .with_address_space_limit(self.lang.address_space_limit)
    }

    /// Release the artifact; only the first call has an effect
    pub async fn clean(&self) {
        if let Some(artifact) = &self.artifact {
            artifact.release().await;
        }
    }
}

#[async_trait]
impl AsyncTeardown for Execute {
    async fn teardown(&self) {
        self.clean().await;
    }
}

/// Compile `source` with `lang`; `copy_in` is staged for compile and run
pub async fn compile(
    sandbox: &Arc<dyn Sandbox>,
    settings: &JudgeConfig,
    lang: &LanguageConfig,
    source: CopyInFile,
    copy_in: CopyIn,
) -> Result<Execute> {
    let (compile_command, target) = match (&lang.compile_command, &lang.target) {
        (Some(cmd), Some(target)) => (cmd, target),
        _ => {
            let mut copy_in = copy_in;
            copy_in.insert(lang.source_file.clone(), source);
            return Ok(Execute::plain(lang.run_command.clone(), copy_in, lang.clone()));
        }
    };

    debug!("Compiling {} with {:?}", lang.key, compile_command);

    let param = Parameter::new(compile_command.iter().cloned())
        .with_copy_in(&copy_in)
        .with_file(lang.source_file.clone(), source)
        .with_copy_out_cached(target.clone())
        .with_limits(settings.compile_time_limit_ms, settings.compile_memory_limit_mb)
        .with_process_limit(settings.process_limit);

    let outcome = executer::run(sandbox.as_ref(), param).await?;

    let message = match outcome.status {
        Status::Accepted => None,
        Status::TimeLimitExceeded => Some("Compile timeout.".to_string()),
        Status::MemoryLimitExceeded => Some("Compile memory limit exceeded.".to_string()),
        _ => {
            if let Some(error) = &outcome.error {
                debug!("Compiler reported: {}", error);
            }
            None
        }
    };

    let file_id = match (outcome.status, outcome.file_ids.get(target)) {
        (Status::Accepted, Some(id)) => id.clone(),
        (status, _) => {
            outcome.release(sandbox.as_ref()).await;
            let message = match (status, message) {
                (_, Some(m)) => Some(m),
                (Status::Accepted, None) => Some("Compiled file not found.".to_string()),
                (_, None) => None,
            };
            return Err(JudgeError::Compile {
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                message,
            });
        }
    };

    // Only the target was requested; anything else is released right away
    for (name, id) in &outcome.file_ids {
        if name != target {
            if let Err(e) = sandbox.delete_file(id).await {
                warn!("Failed to delete stray compile output {} ({}): {}", name, id, e);
            }
        }
    }

    let text = compiler_text(&outcome.stdout, &outcome.stderr);
    let mut run_copy_in = copy_in;
    run_copy_in.insert(target.clone(), CopyInFile::cached(file_id.clone()));

    info!("Compiled {} into artifact {}", lang.key, file_id);

    Ok(Execute {
        execute: lang.run_command.clone(),
        copy_in: run_copy_in,
        lang: lang.clone(),
        compiler_text: (!text.is_empty()).then_some(text),
        artifact: Some(Artifact {
            sandbox: sandbox.clone(),
            file_id,
            released: AtomicBool::new(false),
        }),
    })
}

/// Process-wide cache of compiled auxiliary programs
///
/// Checkers, interactors, managers, validators and generators come from test
/// data and are shared by every submission of a problem. Entries are keyed by
/// the sha256 of language, source and staged files; the cache owns them.
#[derive(Default)]
pub struct ArtifactCache {
    entries: Mutex<HashMap<String, Arc<Execute>>>,
}

async fn file_digest(hasher: &mut Sha256, file: &CopyInFile) -> Result<()> {
    match file {
        CopyInFile::Src { src } => {
            let content = tokio::fs::read(src).await.map_err(|e| {
                JudgeError::format_with("Cannot read {0}: {1}", vec![src.clone(), e.to_string()])
            })?;
            hasher.update(&content);
        }
        CopyInFile::Content { content } => hasher.update(content.as_bytes()),
        CopyInFile::Cached { file_id } => hasher.update(file_id.as_bytes()),
        CopyInFile::Symlink { symlink } => hasher.update(symlink.as_bytes()),
    }
    Ok(())
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn key(lang: &LanguageConfig, source: &CopyInFile, copy_in: &CopyIn) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(lang.key.as_bytes());
        hasher.update([0]);
        file_digest(&mut hasher, source).await?;
        for (name, file) in copy_in {
            hasher.update([0]);
            hasher.update(name.as_bytes());
            hasher.update([0]);
            file_digest(&mut hasher, file).await?;
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn get_or_compile(
        &self,
        sandbox: &Arc<dyn Sandbox>,
        settings: &JudgeConfig,
        lang: &LanguageConfig,
        source: CopyInFile,
        copy_in: CopyIn,
    ) -> Result<Arc<Execute>> {
        let key = Self::key(lang, &source, &copy_in).await?;
        if let Some(hit) = self.entries.lock().await.get(&key) {
            debug!("Auxiliary program cache hit {}", key);
            return Ok(hit.clone());
        }

        let execute = Arc::new(compile(sandbox, settings, lang, source, copy_in).await?);

        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            // Lost a race with another submission; keep the first artifact
            Some(existing) => {
                let existing = existing.clone();
                drop(entries);
                execute.clean().await;
                Ok(existing)
            }
            None => {
                entries.insert(key, execute.clone());
                Ok(execute)
            }
        }
    }

    /// Release every cached artifact
    pub async fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.lock().await);
        for execute in entries.into_values() {
            execute.clean().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::languages::get_language_config;
    use crate::engine::sandbox::mock::{self, MockSandbox};
    use crate::engine::sandbox::SandboxStatus;

    fn sandbox(handler: MockSandbox) -> (Arc<MockSandbox>, Arc<dyn Sandbox>) {
        let mock = Arc::new(handler);
        let dyn_sandbox: Arc<dyn Sandbox> = mock.clone();
        (mock, dyn_sandbox)
    }

    #[tokio::test]
    async fn test_interpreted_language_is_wrapped() {
        let (mock, sb) = sandbox(MockSandbox::new(|_| mock::ok("")));
        let lang = get_language_config("python").unwrap();
        let execute = compile(
            &sb,
            &JudgeConfig::default(),
            &lang,
            CopyInFile::content("print(1)"),
            CopyIn::new(),
        )
        .await
        .unwrap();
        assert!(mock.requests().is_empty());
        assert_eq!(execute.copy_in["foo.py"], CopyInFile::content("print(1)"));
        assert!(execute.artifact_id().is_none());
    }

    #[tokio::test]
    async fn test_compiled_artifact_cleaned_once() {
        let (mock, sb) = sandbox(MockSandbox::new(|_| mock::exited(0, "", "warning: x")));
        let lang = get_language_config("cpp").unwrap();
        let execute = compile(
            &sb,
            &JudgeConfig::default(),
            &lang,
            CopyInFile::content("int main(){}"),
            CopyIn::new(),
        )
        .await
        .unwrap();

        let id = execute.artifact_id().unwrap().to_string();
        assert_eq!(execute.copy_in["foo"], CopyInFile::cached(id.clone()));
        assert_eq!(execute.compiler_text.as_deref(), Some("warning: x"));

        let cmd = &mock.commands()[0];
        assert_eq!(cmd.cpu_limit, 10_000 * 1_000_000);
        assert_eq!(cmd.copy_out_cached, vec!["foo"]);

        execute.clean().await;
        execute.clean().await;
        drop(execute);
        tokio::task::yield_now().await;
        assert_eq!(mock.deleted(), vec![id]);
    }

    #[tokio::test]
    async fn test_stray_outputs_released() {
        let (mock, sb) = sandbox(MockSandbox::new(|_| {
            let mut result = mock::ok("");
            result.file_ids.insert("foo.o".into(), "gone-1".into());
            result
        }));
        let lang = get_language_config("cpp").unwrap();
        let execute = compile(
            &sb,
            &JudgeConfig::default(),
            &lang,
            CopyInFile::content("int main(){}"),
            CopyIn::new(),
        )
        .await
        .unwrap();

        // The stray id is unknown to the sandbox; its failed delete must not fail the compile
        let id = execute.artifact_id().unwrap().to_string();
        assert_eq!(mock.deleted(), vec!["gone-1".to_string()]);
        assert_eq!(mock.live_files(), vec![id]);
        execute.clean().await;
        assert!(mock.live_files().is_empty());
    }

    #[tokio::test]
    async fn test_compile_failure_carries_output() {
        let (_, sb) = sandbox(MockSandbox::new(|_| mock::exited(1, "", "foo.cc:1: error")));
        let lang = get_language_config("cpp").unwrap();
        let err = compile(&sb, &JudgeConfig::default(), &lang, CopyInFile::content("x"), CopyIn::new())
            .await
            .unwrap_err();
        match err {
            JudgeError::Compile { stderr, message, .. } => {
                assert_eq!(stderr, "foo.cc:1: error");
                assert_eq!(message, None);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_compile_timeout() {
        let (mock, sb) = sandbox(MockSandbox::new(|_| {
            mock::with_status(SandboxStatus::TimeLimitExceeded, 10_000)
        }));
        let lang = get_language_config("cpp").unwrap();
        let err = compile(&sb, &JudgeConfig::default(), &lang, CopyInFile::content("x"), CopyIn::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JudgeError::Compile { message: Some(ref m), .. } if m == "Compile timeout."
        ));
        assert!(mock.live_files().is_empty());
    }

    #[tokio::test]
    async fn test_artifact_cache_reuses_compiles() {
        let (mock, sb) = sandbox(MockSandbox::new(|_| mock::ok("")));
        let cache = ArtifactCache::new();
        let lang = get_language_config("cpp").unwrap();
        let settings = JudgeConfig::default();

        let a = cache
            .get_or_compile(&sb, &settings, &lang, CopyInFile::content("chk"), CopyIn::new())
            .await
            .unwrap();
        let b = cache
            .get_or_compile(&sb, &settings, &lang, CopyInFile::content("chk"), CopyIn::new())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mock.requests().len(), 1);
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert_eq!(mock.deleted().len(), 1);
    }
}
