//! Judge configuration
//!
//! Process-wide settings loaded from the environment (after `.env` has been
//! applied by the binary). Library code never reads the global directly; the
//! task façade hands an `Arc<JudgeConfig>` to each run.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How much of each case is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    /// Every case with checker messages
    #[default]
    Full,
    /// Every case, without checker messages
    Case,
    /// Only the final result
    None,
}

impl FromStr for DetailLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" | "true" => Ok(DetailLevel::Full),
            "case" => Ok(DetailLevel::Case),
            "none" | "false" => Ok(DetailLevel::None),
            other => Err(format!("unknown detail level {}", other)),
        }
    }
}

/// Judge configuration
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// Base URL of the sandbox service
    pub sandbox_url: String,
    /// Concurrent case executions per submission
    pub parallelism: usize,
    /// TLE reruns allowed per submission
    pub rerun: u32,
    /// Upper bound on the number of cases in one problem
    pub testcases_max: usize,
    /// Upper bound on the summed case time limits, in seconds
    pub total_time_limit_secs: u64,
    /// Upper bound on any case memory limit, in MB
    pub memory_max_mb: u64,
    /// Compile time limit in milliseconds
    pub compile_time_limit_ms: u64,
    /// Compile memory limit in MB
    pub compile_memory_limit_mb: u64,
    /// Process count limit for every sandboxed command
    pub process_limit: u32,
    /// Wall-clock guard for one whole submission, in seconds
    pub task_timeout_secs: u64,
    /// Default report verbosity
    pub detail: DetailLevel,
    /// Scratch space for unpacked test data
    pub tmp_dir: PathBuf,
    /// testlib.h staged next to auxiliary programs when they are compiled
    pub testlib_path: Option<PathBuf>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            sandbox_url: "http://localhost:5050".into(),
            parallelism: 2,
            rerun: 0,
            testcases_max: 100,
            total_time_limit_secs: 60,
            memory_max_mb: 1024,
            compile_time_limit_ms: 10_000,
            compile_memory_limit_mb: 512,
            process_limit: 32,
            task_timeout_secs: 3600,
            detail: DetailLevel::Full,
            tmp_dir: std::env::temp_dir().join("judge"),
            testlib_path: None,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Ignoring invalid value for {}: {}", key, value);
                default
            }
        },
        Err(_) => default,
    }
}

impl JudgeConfig {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sandbox_url: env_or("SANDBOX_URL", defaults.sandbox_url),
            parallelism: env_or("JUDGE_PARALLELISM", defaults.parallelism).max(1),
            rerun: env_or("JUDGE_RERUN", defaults.rerun),
            testcases_max: env_or("TESTCASES_MAX", defaults.testcases_max),
            total_time_limit_secs: env_or("TOTAL_TIME_LIMIT", defaults.total_time_limit_secs),
            memory_max_mb: env_or("MEMORY_MAX", defaults.memory_max_mb),
            compile_time_limit_ms: env_or("COMPILE_TIME_LIMIT_MS", defaults.compile_time_limit_ms),
            compile_memory_limit_mb: env_or(
                "COMPILE_MEMORY_LIMIT_MB",
                defaults.compile_memory_limit_mb,
            ),
            process_limit: env_or("PROCESS_LIMIT", defaults.process_limit),
            task_timeout_secs: env_or("TASK_TIMEOUT_SECS", defaults.task_timeout_secs),
            detail: env_or("JUDGE_DETAIL", defaults.detail),
            tmp_dir: env_or("JUDGE_TMP_DIR", defaults.tmp_dir),
            testlib_path: std::env::var("TESTLIB_PATH").ok().map(PathBuf::from),
        }
    }
}

/// Global judge configuration
static JUDGE_CONFIG: OnceLock<JudgeConfig> = OnceLock::new();

/// Initialize the judge configuration from the environment
pub fn init_config() -> anyhow::Result<&'static JudgeConfig> {
    JUDGE_CONFIG
        .set(JudgeConfig::from_env())
        .map_err(|_| anyhow::anyhow!("Judge configuration already initialized"))?;

    Ok(get_config())
}

/// Get judge configuration
pub fn get_config() -> &'static JudgeConfig {
    JUDGE_CONFIG.get().unwrap_or_else(|| {
        static DEFAULT: OnceLock<JudgeConfig> = OnceLock::new();

        warn!("Judge configuration not initialized, using default");
        DEFAULT.get_or_init(JudgeConfig::default)
    })
}
