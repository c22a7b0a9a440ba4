use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use judge_core::config::init_config;
use judge_core::core::languages::init_languages;
use judge_core::engine::compiler::ArtifactCache;
use judge_core::engine::sandbox::{HttpSandbox, Sandbox};
use judge_core::jobs::report::JsonLinesReporter;
use judge_core::jobs::task::{JudgeJob, JudgeTask};

#[tokio::main]
async fn main() -> Result<()> {
    // Events go to stdout; logs stay on stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("judge_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    let settings = Arc::new(init_config()?.clone());
    let count = init_languages()?;
    info!("Loaded {} language configurations", count);

    let upload_dir =
        PathBuf::from(std::env::var("JUDGE_UPLOAD_DIR").unwrap_or_else(|_| "./uploads".into()));
    let sandbox: Arc<dyn Sandbox> = Arc::new(HttpSandbox::new(settings.sandbox_url.clone()));
    info!("Using sandbox at {}", settings.sandbox_url);
    let cache = Arc::new(ArtifactCache::new());

    let handle = |job: JudgeJob| {
        let reporter = Arc::new(JsonLinesReporter::new(job.submission_id.clone(), &upload_dir));
        JudgeTask::new(job, settings.clone(), sandbox.clone(), cache.clone(), reporter)
    };

    // One job from a file, or one job per stdin line
    if let Some(path) = std::env::args().nth(1) {
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read job file {}", path))?;
        let job: JudgeJob = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse job file {}", path))?;
        handle(job).handle().await;
    } else {
        info!("Waiting for jobs on stdin...");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JudgeJob>(&line) {
                Ok(job) => handle(job).handle().await,
                Err(e) => warn!("Failed to parse job data: {}", e),
            }
        }
    }

    cache.clear().await;
    Ok(())
}
