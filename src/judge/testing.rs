//! Shared fixture for strategy and flow tests

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use super::JudgeContext;
use crate::config::JudgeConfig;
use crate::engine::sandbox::mock::{MockCall, MockSandbox};
use crate::engine::sandbox::{Sandbox, SandboxResult};
use crate::jobs::report::{Events, RecordingReporter};
use crate::jobs::testdata::{read_config, ParsedConfig};

pub struct Fixture {
    pub mock: Arc<MockSandbox>,
    pub sandbox: Arc<dyn Sandbox>,
    pub reporter: Arc<RecordingReporter>,
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&MockCall<'_>) -> SandboxResult + Send + Sync + 'static,
    {
        let mock = Arc::new(MockSandbox::new(handler));
        let sandbox: Arc<dyn Sandbox> = mock.clone();
        Self {
            mock,
            sandbox,
            reporter: Arc::new(RecordingReporter::default()),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn context(&self) -> JudgeContext {
        self.context_with(JudgeConfig::default())
    }

    pub fn context_with(&self, settings: JudgeConfig) -> JudgeContext {
        let events = Arc::new(Events::new("r1", self.reporter.clone()));
        JudgeContext::new("r1", Arc::new(settings), self.sandbox.clone(), events)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Write `config.yaml` and load the folder
    pub async fn load(&self, yaml: &str) -> ParsedConfig {
        self.write("config.yaml", yaml);
        read_config(self.dir.path(), &json!({}), &JudgeConfig::default())
            .await
            .unwrap()
    }

    /// Context judging `code` in `lang` against the loaded folder
    pub async fn judging(&self, lang: &str, code: &str, yaml: &str) -> JudgeContext {
        let config = self.load(yaml).await;
        self.context()
            .with_code(lang, crate::engine::sandbox::CopyInFile::content(code))
            .with_config(config, self.dir.path())
    }
}
