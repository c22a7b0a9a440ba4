//! Language profiles for compilation and execution

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Context;
use serde::Deserialize;
use tracing::error;

use crate::error::{JudgeError, Result};

/// Working directory of every sandboxed process
pub const SANDBOX_DIR: &str = "/w";

/// Configuration for a supported programming language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageConfig {
    /// Canonical key in the language table
    pub key: String,
    /// Name of the source file inside the sandbox (e.g., "foo.cc")
    pub source_file: String,
    /// Compile command (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Artifact left behind by the compile step
    pub target: Option<String>,
    /// Run command
    pub run_command: Vec<String>,
    /// Time limit multiplier and bonus: (multiplier, bonus_seconds)
    /// actual_time = base_time * multiplier + bonus
    pub time_limit: Option<(u32, u32)>,
    /// Memory limit multiplier and bonus: (multiplier, bonus_mb)
    pub memory_limit: Option<(u32, u32)>,
    /// Enforce the memory limit through RLIMIT_AS as well
    pub address_space_limit: bool,
    /// Process count override for solution runs
    pub process_limit: Option<u32>,
}

impl LanguageConfig {
    /// Calculate actual time limit based on base time limit
    /// base_time_ms: base time limit in milliseconds (from the case)
    pub fn calculate_time_limit(&self, base_time_ms: u64) -> u64 {
        match self.time_limit {
            Some((multiplier, bonus_seconds)) => {
                base_time_ms * multiplier as u64 + bonus_seconds as u64 * 1000
            }
            None => base_time_ms,
        }
    }

    /// Calculate actual memory limit based on base memory limit
    pub fn calculate_memory_limit(&self, base_memory_mb: u64) -> u64 {
        match self.memory_limit {
            Some((multiplier, bonus_mb)) => base_memory_mb * multiplier as u64 + bonus_mb as u64,
            None => base_memory_mb,
        }
    }

    pub fn needs_compile(&self) -> bool {
        self.compile_command.is_some()
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    compile_command: Option<String>,
    target: Option<String>,
    run_command: String,
    #[serde(default)]
    time_limit: Vec<String>,
    #[serde(default)]
    memory_limit: Vec<String>,
    #[serde(default)]
    address_space_limit: bool,
    process_limit: Option<u32>,
    #[serde(default)]
    aliases: Vec<String>,
}

const EMBEDDED: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));

/// Global language configurations
static LANGUAGES: OnceLock<HashMap<String, LanguageConfig>> = OnceLock::new();

/// Initialize language configurations from the embedded table
pub fn init_languages() -> anyhow::Result<usize> {
    let languages = parse_languages(EMBEDDED)?;
    let count = languages.len();

    LANGUAGES
        .set(languages)
        .map_err(|_| anyhow::anyhow!("Languages already initialized"))?;

    Ok(count)
}

fn table() -> &'static HashMap<String, LanguageConfig> {
    LANGUAGES.get_or_init(|| match parse_languages(EMBEDDED) {
        Ok(languages) => languages,
        Err(e) => {
            error!("Failed to parse embedded language table: {:#}", e);
            HashMap::new()
        }
    })
}

pub fn parse_languages(content: &str) -> anyhow::Result<HashMap<String, LanguageConfig>> {
    let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;

    let mut languages = HashMap::new();

    for (name, raw) in raw_configs {
        let parse_limit =
            |raw_limit: Vec<String>, kind: &str| -> anyhow::Result<Option<(u32, u32)>> {
                if raw_limit.is_empty() {
                    return Ok(None);
                }
                if raw_limit.len() != 2 {
                    anyhow::bail!("Invalid {} limit for {}: {:?}", kind, name, raw_limit);
                }
                let multiplier = raw_limit[0].parse::<u32>().with_context(|| {
                    format!("Invalid {} multiplier for {}: {}", kind, name, raw_limit[0])
                })?;
                let offset = raw_limit[1].parse::<u32>().with_context(|| {
                    format!("Invalid {} offset for {}: {}", kind, name, raw_limit[1])
                })?;
                Ok(Some((multiplier, offset)))
            };

        let compile_command = match raw.compile_command {
            Some(cmd) => Some(
                into_command(&cmd).with_context(|| format!("Invalid compile command for {}", name))?,
            ),
            None => None,
        };

        let config = LanguageConfig {
            key: name.to_lowercase(),
            source_file: raw.source_file,
            compile_command,
            target: raw.target,
            run_command: into_command(&raw.run_command)
                .with_context(|| format!("Invalid run command for {}", name))?,
            time_limit: parse_limit(raw.time_limit, "time")?,
            memory_limit: parse_limit(raw.memory_limit, "memory")?,
            address_space_limit: raw.address_space_limit,
            process_limit: raw.process_limit,
        };

        if config.compile_command.is_some() && config.target.is_none() {
            anyhow::bail!("Language {} compiles but declares no target", name);
        }

        // Add main language name
        languages.insert(name.to_lowercase(), config.clone());

        // Add aliases
        for alias in raw.aliases {
            languages.insert(alias.to_lowercase(), config.clone());
        }
    }

    Ok(languages)
}

/// Get language configuration by language name
pub fn get_language_config(language: &str) -> Option<LanguageConfig> {
    table().get(&language.to_lowercase()).cloned()
}

/// Look up a language, failing with a system error when it is unknown
pub fn require_language(language: &str) -> Result<LanguageConfig> {
    get_language_config(language)
        .ok_or_else(|| JudgeError::system_with("Unsupported language {0}.", vec![language.into()]))
}

/// Language of an auxiliary program, guessed from its file extension
pub fn language_of_file(path: &str) -> Result<LanguageConfig> {
    let ext = crate::core::utils::file_name(path)
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default();
    get_language_config(ext).ok_or_else(|| {
        JudgeError::format_with("Cannot determine language of {0}.", vec![path.into()])
    })
}

/// Get all supported language names
pub fn get_supported_languages() -> Vec<String> {
    table().keys().cloned().collect()
}

fn into_command(command: &str) -> anyhow::Result<Vec<String>> {
    Ok(shell_words::split(command)?)
}
