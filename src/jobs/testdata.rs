//! Test-data configuration
//!
//! `config.yaml` (or `config.yml`) in the test-data folder describes the
//! problem; the job may override any top-level key. When no case is declared,
//! cases are detected from file names:
//!
//! | pattern            | subtask | type  |
//! |--------------------|---------|-------|
//! | `name1.in`         | 1       | `sum` |
//! | `name2-3.in`       | 2       | `min` |
//! | `name.in3`         | 1       | `sum` |
//!
//! Normalization sorts subtasks and cases by id, spreads the rest of 100
//! points over unscored subtasks (and over unscored cases of `sum` subtasks),
//! resolves limits and file references, and finally checks the result against
//! the judge's limits.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::components::checker::get_checker;
use crate::config::{DetailLevel, JudgeConfig};
use crate::core::utils::{parse_memory_mb, parse_time_ms, restrict_file};
use crate::error::{JudgeError, Result};

pub const DEFAULT_TIME: &str = "1000ms";
pub const DEFAULT_MEMORY: &str = "256m";
pub const DEV_NULL: &str = "/dev/null";

/// Aggregation policy of a subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskKind {
    #[default]
    Min,
    Max,
    Sum,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub id: u32,
    pub input: PathBuf,
    pub output: PathBuf,
    pub time_ms: u64,
    pub memory_mb: u64,
    /// Full credit of the case
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subtask {
    pub id: u32,
    pub kind: SubtaskKind,
    pub score: f64,
    pub time_ms: u64,
    pub memory_mb: u64,
    pub cases: Vec<Case>,
    /// Subtasks that must not fail for this one to count
    pub depends: Vec<u32>,
}

/// Expected answer of an objective item
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StandardAnswer {
    /// `[answer, score]`, the answer being a value or a set of values
    Scored(serde_yaml::Value, f64),
    /// `{option: score}`
    Options(BTreeMap<String, f64>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SubmitMode {
    /// The submission is the output of every case
    #[default]
    Single,
    /// The submission is a zip with one file per case
    Multi,
}

/// How an interactor reports its verdict on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InteractorProtocol {
    /// testlib prefixes (`ok`, `wrong answer`, `points`, ...)
    #[default]
    Testlib,
    /// CPLib JSON report
    Cplib,
}

/// Problem type with its own configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ProblemKind {
    #[default]
    Default,
    Interactive {
        interactor: PathBuf,
        protocol: InteractorProtocol,
    },
    Communication {
        manager: PathBuf,
        num_processes: u32,
    },
    SubmitAnswer {
        mode: SubmitMode,
    },
    Objective {
        answers: BTreeMap<String, StandardAnswer>,
    },
}

impl ProblemKind {
    /// Name of the strategy judging this kind
    pub fn strategy(&self) -> &'static str {
        match self {
            ProblemKind::Default => "default",
            ProblemKind::Interactive { .. } => "interactive",
            ProblemKind::Communication { .. } => "communication",
            ProblemKind::SubmitAnswer { .. } => "submit_answer",
            ProblemKind::Objective { .. } => "objective",
        }
    }
}

/// Normalized, validated test-data description
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedConfig {
    pub kind: ProblemKind,
    pub checker_type: String,
    pub checker: Option<PathBuf>,
    pub validator: Option<PathBuf>,
    pub subtasks: Vec<Subtask>,
    /// Number of judged items (cases, or objective answers)
    pub count: usize,
    /// Problem-wide limits, used where no case applies
    pub time_ms: u64,
    pub memory_mb: u64,
    /// Solution reads `<filename>.in` and writes `<filename>.out`
    pub filename: Option<String>,
    /// Code wrapped around the submission, per language
    pub template: BTreeMap<String, (String, String)>,
    pub user_extra_files: Vec<PathBuf>,
    pub judge_extra_files: Vec<PathBuf>,
    pub detail: DetailLevel,
    /// Cases were found from file names rather than declared
    pub auto_detected: bool,
}

impl Default for ParsedConfig {
    fn default() -> Self {
        Self {
            kind: ProblemKind::Default,
            checker_type: "default".into(),
            checker: None,
            validator: None,
            subtasks: Vec::new(),
            count: 0,
            time_ms: 1000,
            memory_mb: 256,
            filename: None,
            template: BTreeMap::new(),
            user_extra_files: Vec::new(),
            judge_extra_files: Vec::new(),
            detail: DetailLevel::Full,
            auto_detected: false,
        }
    }
}

impl ParsedConfig {
    pub fn total_score(&self) -> f64 {
        self.subtasks.iter().map(|s| s.score).sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Limit {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DetailSetting {
    Flag(bool),
    Level(DetailLevel),
}

#[derive(Debug, Default, Deserialize)]
struct RawCase {
    id: Option<u32>,
    input: Option<String>,
    output: Option<String>,
    time: Option<Limit>,
    memory: Option<Limit>,
    score: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSubtask {
    id: Option<u32>,
    #[serde(rename = "type")]
    kind: Option<SubtaskKind>,
    score: Option<f64>,
    time: Option<Limit>,
    memory: Option<Limit>,
    #[serde(default)]
    cases: Vec<RawCase>,
    #[serde(default, rename = "if")]
    depends: Vec<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(alias = "subType")]
    sub_type: Option<String>,
    checker_type: Option<String>,
    checker: Option<String>,
    interactor: Option<String>,
    manager: Option<String>,
    validator: Option<String>,
    num_processes: Option<u32>,
    time: Option<Limit>,
    memory: Option<Limit>,
    subtasks: Vec<RawSubtask>,
    filename: Option<String>,
    template: BTreeMap<String, (String, String)>,
    user_extra_files: Vec<String>,
    judge_extra_files: Vec<String>,
    answers: BTreeMap<String, StandardAnswer>,
    detail: Option<DetailSetting>,
}

fn time_of(limit: &Limit) -> Result<u64> {
    match limit {
        Limit::Number(ms) => Ok(ms.max(0.0) as u64),
        Limit::Text(text) => parse_time_ms(text)
            .ok_or_else(|| JudgeError::format_with("Invalid time limit {0}.", vec![text.clone()])),
    }
}

fn memory_of(limit: &Limit) -> Result<u64> {
    match limit {
        Limit::Number(mb) => Ok(mb.max(0.0).ceil() as u64),
        Limit::Text(text) => parse_memory_mb(text)
            .ok_or_else(|| JudgeError::format_with("Invalid memory limit {0}.", vec![text.clone()])),
    }
}

/// Resolve a test-data file reference inside `folder`
pub fn check_file(folder: &Path, file: &str, message: &str) -> Result<PathBuf> {
    if file == DEV_NULL {
        return Ok(PathBuf::from(DEV_NULL));
    }
    let path = folder.join(restrict_file(file));
    if path.is_file() {
        Ok(path)
    } else {
        Err(JudgeError::format_with(message, vec![file.to_string()]))
    }
}

/// Split `total` into `count` near-equal integral parts, larger ones last
fn spread(total: f64, count: usize) -> impl Iterator<Item = f64> {
    let total = total.max(0.0).floor() as u64;
    let count = count.max(1) as u64;
    let base = total / count;
    let extra = count - total % count;
    (0..count).map(move |i| if i >= extra { base + 1 } else { base } as f64)
}

struct MatchRule {
    regex: fn() -> &'static Regex,
    outputs: fn(&Captures<'_>) -> Vec<String>,
    id: fn(&Captures<'_>) -> Option<u32>,
    subtask: fn(&Captures<'_>) -> Option<u32>,
    kind: fn(&Captures<'_>) -> SubtaskKind,
}

fn numbered_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(([\w.-]*?)(?:(\d*)[-_])?(\d+))\.(in|IN|txt|TXT|in\.txt|IN\.TXT)$")
            .expect("valid case file pattern")
    })
}

fn suffixed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\D*)\.(in|IN)(\d+)$").expect("valid case file pattern"))
}

fn with_output_dir(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .flat_map(|n| {
            let swapped = n.replace("input", "output").replace("INPUT", "OUTPUT");
            [n, swapped]
        })
        .collect()
}

const RULES: [MatchRule; 2] = [
    MatchRule {
        regex: numbered_re,
        outputs: |c| {
            let stem = &c[1];
            let names = ["out", "ans"]
                .iter()
                .flat_map(|e| {
                    let upper = e.to_uppercase();
                    [e.to_string(), upper.clone(), format!("{}.txt", e), format!("{}.TXT", upper)]
                })
                .map(|ext| format!("{}.{}", stem, ext))
                .collect();
            let mut outputs = with_output_dir(names);
            if stem.contains("input") {
                outputs.push(format!("{}.txt", stem).replace("input", "output"));
            }
            outputs
        },
        id: |c| c[4].parse().ok(),
        subtask: |c| match c.get(3).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
            Some(s) => s.parse().ok(),
            None => Some(1),
        },
        kind: |c| match c.get(3).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
            Some(_) => SubtaskKind::Min,
            None => SubtaskKind::Sum,
        },
    },
    MatchRule {
        regex: suffixed_re,
        outputs: |c| {
            let (ou, out) = if &c[2] == "in" { ("ou", "out") } else { ("OU", "OUT") };
            with_output_dir(vec![
                format!("{}.{}{}", &c[1], ou, &c[3]),
                format!("{}.{}{}", &c[1], out, &c[3]),
            ])
        },
        id: |c| c[3].parse().ok(),
        subtask: |_| Some(1),
        kind: |_| SubtaskKind::Sum,
    },
];

/// Subtasks found from the names of `files` (paths relative to the folder)
fn subtasks_from_files(files: &[String]) -> Vec<RawSubtask> {
    let present: HashSet<&str> = files.iter().map(String::as_str).collect();
    let mut subtasks: BTreeMap<u32, RawSubtask> = BTreeMap::new();

    for file in files {
        let name = crate::core::utils::file_name(file);
        let dir = &file[..file.len() - name.len()];
        for rule in &RULES {
            let Some(caps) = (rule.regex)().captures(name) else {
                continue;
            };
            let (Some(id), Some(sid)) = ((rule.id)(&caps), (rule.subtask)(&caps)) else {
                continue;
            };
            let output = (rule.outputs)(&caps).into_iter().find_map(|candidate| {
                [format!("{}{}", dir, candidate), candidate.clone(), format!("output/{}", candidate)]
                    .into_iter()
                    .find(|path| path != file && present.contains(path.as_str()))
            });
            let Some(output) = output else {
                continue;
            };
            let subtask = subtasks.entry(sid).or_insert_with(|| RawSubtask {
                id: Some(sid),
                kind: Some((rule.kind)(&caps)),
                ..Default::default()
            });
            if !subtask
                .cases
                .iter()
                .any(|c| c.input.as_deref() == Some(file.as_str()))
            {
                subtask.cases.push(RawCase {
                    id: Some(id),
                    input: Some(file.clone()),
                    output: Some(output),
                    ..Default::default()
                });
            }
            break;
        }
    }
    subtasks.into_values().collect()
}

/// Files of the folder plus those under `input/` and `output/`
async fn collect_files(folder: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for dir in ["", "input", "output"] {
        let path = folder.join(dir);
        if !path.is_dir() {
            continue;
        }
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let name = entry.file_name().to_string_lossy().into_owned();
                files.push(if dir.is_empty() {
                    name
                } else {
                    format!("{}/{}", dir, name)
                });
            }
        }
    }
    files.sort();
    Ok(files)
}

fn normalize(
    folder: &Path,
    mut raw: Vec<RawSubtask>,
    time: &Limit,
    memory: &Limit,
) -> Result<Vec<Subtask>> {
    raw.sort_by_key(|s| s.id.unwrap_or(0));
    let declared: f64 = raw.iter().filter_map(|s| s.score).sum();
    let mut subtask_scores = spread(
        100.0 - declared,
        raw.iter().filter(|s| s.score.is_none()).count(),
    );

    raw.into_iter()
        .enumerate()
        .map(|(index, mut s)| -> Result<Subtask> {
            s.cases.sort_by_key(|c| c.id.unwrap_or(0));
            let kind = s.kind.unwrap_or_default();
            let score = match s.score {
                Some(score) => score,
                None => subtask_scores.next().unwrap_or(0.0),
            };
            let declared: f64 = s.cases.iter().filter_map(|c| c.score).sum();
            let mut case_scores = spread(
                score - declared,
                s.cases.iter().filter(|c| c.score.is_none()).count(),
            );
            let subtask_time = s.time.as_ref().unwrap_or(time);
            let subtask_memory = s.memory.as_ref().unwrap_or(memory);

            let cases = s
                .cases
                .iter()
                .enumerate()
                .map(|(i, c)| -> Result<Case> {
                    let score = match (c.score, kind) {
                        (Some(score), _) => score,
                        (None, SubtaskKind::Sum) => case_scores.next().unwrap_or(0.0),
                        (None, _) => score,
                    };
                    let file = |name: &Option<String>, message: &str| match name {
                        Some(name) if !name.is_empty() => check_file(folder, name, message),
                        _ => Ok(PathBuf::from(DEV_NULL)),
                    };
                    Ok(Case {
                        id: c.id.unwrap_or(i as u32 + 1),
                        input: file(&c.input, "Cannot find input file {0}.")?,
                        output: file(&c.output, "Cannot find output file {0}.")?,
                        time_ms: time_of(c.time.as_ref().unwrap_or(subtask_time))?,
                        memory_mb: memory_of(c.memory.as_ref().unwrap_or(subtask_memory))?,
                        score,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(Subtask {
                id: s.id.unwrap_or(index as u32 + 1),
                kind,
                score,
                time_ms: time_of(subtask_time)?,
                memory_mb: memory_of(subtask_memory)?,
                cases,
                depends: s.depends,
            })
        })
        .collect()
}

fn validate(config: &ParsedConfig, settings: &JudgeConfig) -> Result<()> {
    if config.count > settings.testcases_max {
        return Err(JudgeError::format("Too many testcases. Cancelled."));
    }
    let total_ms: u64 = config
        .subtasks
        .iter()
        .flat_map(|s| &s.cases)
        .map(|c| c.time_ms)
        .sum();
    if total_ms > settings.total_time_limit_secs * 1000 {
        return Err(JudgeError::format_with(
            "Total time limit longer than {0}s. Cancelled.",
            vec![settings.total_time_limit_secs.to_string()],
        ));
    }
    let memory_max = config
        .subtasks
        .iter()
        .flat_map(|s| &s.cases)
        .map(|c| c.memory_mb)
        .max()
        .unwrap_or(0);
    if memory_max > settings.memory_max_mb {
        return Err(JudgeError::format("Memory limit larger than memory_max"));
    }
    // The interactor is the verifier of interactive problems
    if matches!(config.kind, ProblemKind::Interactive { .. }) {
        return Ok(());
    }
    let adapter = get_checker(&config.checker_type)?;
    if adapter.needs_program() && config.checker.is_none() {
        return Err(JudgeError::format("You did not specify a checker."));
    }
    Ok(())
}

async fn read_document(folder: &Path) -> Result<serde_yaml::Value> {
    for name in ["config.yaml", "config.yml"] {
        let path = folder.join(name);
        if path.is_file() {
            let text = tokio::fs::read_to_string(&path).await?;
            debug!("Reading test data configuration {}", path.display());
            return serde_yaml::from_str(&text).map_err(|e| {
                JudgeError::format_with("Cannot parse {0}: {1}", vec![name.into(), e.to_string()])
            });
        }
    }
    Ok(serde_yaml::Value::Mapping(Default::default()))
}

/// Shallow merge; keys of `overrides` win
fn merge(base: serde_yaml::Value, overrides: &serde_json::Value) -> Result<serde_yaml::Value> {
    let overrides = serde_yaml::to_value(overrides)
        .map_err(|e| JudgeError::system_with("Invalid config overrides: {0}", vec![e.to_string()]))?;
    let extra = match overrides {
        serde_yaml::Value::Mapping(extra) => extra,
        serde_yaml::Value::Null => return Ok(base),
        _ => return Err(JudgeError::system("Config overrides must be an object.")),
    };
    let mut merged = match base {
        serde_yaml::Value::Mapping(base) => base,
        serde_yaml::Value::Null => serde_yaml::Mapping::new(),
        _ => return Err(JudgeError::format("Testdata configuration must be a mapping.")),
    };
    for (key, value) in extra {
        merged.insert(key, value);
    }
    Ok(serde_yaml::Value::Mapping(merged))
}

/// Load, normalize and validate the test data in `folder`
pub async fn read_config(
    folder: &Path,
    overrides: &serde_json::Value,
    settings: &JudgeConfig,
) -> Result<ParsedConfig> {
    let document = merge(read_document(folder).await?, overrides)?;
    let raw: RawConfig = serde_yaml::from_value(document).map_err(|e| {
        JudgeError::format_with("Invalid testdata configuration: {0}", vec![e.to_string()])
    })?;

    let resolve = |name: &Option<String>, message: &str| -> Result<Option<PathBuf>> {
        name.as_deref()
            .filter(|n| !n.is_empty())
            .map(|n| check_file(folder, n, message))
            .transpose()
    };

    let kind = match raw.kind.as_deref().unwrap_or("default") {
        "default" => ProblemKind::Default,
        "interactive" => ProblemKind::Interactive {
            interactor: resolve(&raw.interactor, "Cannot find interactor {0}.")?
                .ok_or_else(|| JudgeError::format("You did not specify an interactor."))?,
            protocol: match raw.checker_type.as_deref() {
                Some("cplib") => InteractorProtocol::Cplib,
                _ => InteractorProtocol::Testlib,
            },
        },
        "communication" => ProblemKind::Communication {
            manager: resolve(&raw.manager, "Cannot find manager {0}.")?
                .ok_or_else(|| JudgeError::format("You did not specify a manager."))?,
            num_processes: raw.num_processes.unwrap_or(2).max(1),
        },
        "submit_answer" => ProblemKind::SubmitAnswer {
            mode: match raw.sub_type.as_deref() {
                Some("multi") => SubmitMode::Multi,
                _ => SubmitMode::Single,
            },
        },
        "objective" => ProblemKind::Objective {
            answers: raw.answers.clone(),
        },
        other => {
            return Err(JudgeError::format_with(
                "Unrecognized problemType: {0}",
                vec![other.to_string()],
            ))
        }
    };

    let time = raw.time.clone().unwrap_or(Limit::Text(DEFAULT_TIME.into()));
    let memory = raw.memory.clone().unwrap_or(Limit::Text(DEFAULT_MEMORY.into()));

    let mut raw_subtasks = raw.subtasks;
    let declared_cases: usize = raw_subtasks.iter().map(|s| s.cases.len()).sum();
    let auto_detected = declared_cases == 0 && !matches!(kind, ProblemKind::Objective { .. });
    if auto_detected {
        let files = collect_files(folder).await?;
        let detected = subtasks_from_files(&files);
        for mut subtask in detected {
            // Declared subtasks keep their settings and receive the detected cases
            match raw_subtasks.iter_mut().find(|s| s.id.is_some() && s.id == subtask.id) {
                Some(declared) => declared.cases.append(&mut subtask.cases),
                None => raw_subtasks.push(subtask),
            }
        }
        raw_subtasks.retain(|s| !s.cases.is_empty());
    }

    let subtasks = normalize(folder, raw_subtasks, &time, &memory)?;
    let count = match &kind {
        ProblemKind::Objective { answers } => answers.len(),
        _ => subtasks.iter().map(|s| s.cases.len()).sum(),
    };

    let extra_files = |names: &[String]| -> Result<Vec<PathBuf>> {
        names
            .iter()
            .map(|n| check_file(folder, n, "Cannot find extra file {0}."))
            .collect()
    };

    let config = ParsedConfig {
        kind,
        checker_type: raw.checker_type.unwrap_or_else(|| "default".into()),
        checker: resolve(&raw.checker, "Cannot find checker {0}.")?,
        validator: resolve(&raw.validator, "Cannot find validator {0}.")?,
        subtasks,
        count,
        time_ms: time_of(&time)?,
        memory_mb: memory_of(&memory)?,
        filename: raw.filename.filter(|f| !f.is_empty()),
        template: raw.template,
        user_extra_files: extra_files(&raw.user_extra_files)?,
        judge_extra_files: extra_files(&raw.judge_extra_files)?,
        detail: match raw.detail {
            Some(DetailSetting::Flag(true)) => DetailLevel::Full,
            Some(DetailSetting::Flag(false)) => DetailLevel::None,
            Some(DetailSetting::Level(level)) => level,
            None => settings.detail,
        },
        auto_detected,
    };
    validate(&config, settings)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn folder(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_spread() {
        assert_eq!(spread(100.0, 3).collect::<Vec<_>>(), vec![33.0, 33.0, 34.0]);
        assert_eq!(spread(10.0, 2).collect::<Vec<_>>(), vec![5.0, 5.0]);
    }

    #[tokio::test]
    async fn test_declared_subtasks() {
        let dir = folder(&[
            (
                "config.yaml",
                r#"
time: 1s
memory: 128m
subtasks:
  - id: 2
    score: 60
    type: sum
    if: [1]
    cases:
      - input: b1.in
        output: b1.out
      - input: b2.in
        output: b2.out
        time: 500ms
  - id: 1
    cases:
      - input: a1.in
        output: a1.out
"#,
            ),
            ("a1.in", "1"),
            ("a1.out", "1"),
            ("b1.in", "2"),
            ("b1.out", "2"),
            ("b2.in", "3"),
            ("b2.out", "3"),
        ]);
        let config = read_config(dir.path(), &json!({}), &JudgeConfig::default())
            .await
            .unwrap();

        assert_eq!(config.count, 3);
        assert_eq!(config.subtasks[0].id, 1);
        assert_eq!(config.subtasks[0].score, 40.0);
        assert_eq!(config.subtasks[0].kind, SubtaskKind::Min);
        assert_eq!(config.subtasks[0].cases[0].score, 40.0);

        let sum = &config.subtasks[1];
        assert_eq!(sum.depends, vec![1]);
        assert_eq!(sum.cases[0].score, 30.0);
        assert_eq!(sum.cases[1].time_ms, 500);
        assert_eq!(sum.cases[0].time_ms, 1000);
        assert_eq!(sum.cases[0].memory_mb, 128);
        assert_eq!(sum.cases[1].input, dir.path().join("b2.in"));
        assert!(!config.auto_detected);
    }

    #[tokio::test]
    async fn test_auto_detect_cases() {
        let dir = folder(&[
            ("data1.in", ""),
            ("data1.out", ""),
            ("data2.in", ""),
            ("data2.ans", ""),
            ("input/task2-1.in", ""),
            ("output/task2-1.out", ""),
            ("readme.md", ""),
        ]);
        let config = read_config(dir.path(), &json!(null), &JudgeConfig::default())
            .await
            .unwrap();

        assert!(config.auto_detected);
        assert_eq!(config.count, 3);
        assert_eq!(config.subtasks.len(), 2);
        assert_eq!(config.subtasks[0].kind, SubtaskKind::Sum);
        assert_eq!(config.subtasks[0].cases[1].output, dir.path().join("data2.ans"));
        assert_eq!(config.subtasks[1].id, 2);
        assert_eq!(config.subtasks[1].kind, SubtaskKind::Min);
        assert_eq!(
            config.subtasks[1].cases[0].output,
            dir.path().join("output/task2-1.out")
        );
    }

    #[tokio::test]
    async fn test_overrides_win() {
        let dir = folder(&[("config.yaml", "checker_type: strict\ntime: 2s\n"), ("1.in", ""), ("1.out", "")]);
        let config = read_config(dir.path(), &json!({"time": "3s", "detail": false}), &JudgeConfig::default())
            .await
            .unwrap();
        assert_eq!(config.checker_type, "strict");
        assert_eq!(config.time_ms, 3000);
        assert_eq!(config.detail, DetailLevel::None);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let dir = folder(&[("config.yaml", "checker_type: testlib\n"), ("1.in", ""), ("1.out", "")]);
        let err = read_config(dir.path(), &json!({}), &JudgeConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Format error: You did not specify a checker.");

        let settings = JudgeConfig {
            testcases_max: 1,
            ..Default::default()
        };
        let dir = folder(&[("1.in", ""), ("1.out", ""), ("2.in", ""), ("2.out", "")]);
        let err = read_config(dir.path(), &json!({}), &settings).await.unwrap_err();
        assert_eq!(err.to_string(), "Format error: Too many testcases. Cancelled.");

        let err = read_config(dir.path(), &json!({"time": "100s"}), &JudgeConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Format error: Total time limit longer than 60s. Cancelled.");

        let err = read_config(dir.path(), &json!({"memory": "2g"}), &JudgeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JudgeError::Format(_)));
    }

    #[tokio::test]
    async fn test_missing_files_and_unknown_type() {
        let dir = folder(&[(
            "config.yaml",
            "subtasks:\n  - cases:\n      - input: nope.in\n        output: nope.out\n",
        )]);
        let err = read_config(dir.path(), &json!({}), &JudgeConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Format error: Cannot find input file nope.in.");

        let dir = folder(&[]);
        let err = read_config(dir.path(), &json!({"type": "quantum"}), &JudgeConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Format error: Unrecognized problemType: quantum");
    }

    #[tokio::test]
    async fn test_problem_kinds() {
        let dir = folder(&[("interactor.cc", ""), ("1.in", ""), ("1.out", "")]);
        let config = read_config(dir.path(), &json!({"type": "interactive", "interactor": "interactor.cc"}), &JudgeConfig::default())
            .await
            .unwrap();
        assert_eq!(
            config.kind,
            ProblemKind::Interactive {
                interactor: dir.path().join("interactor.cc"),
                protocol: InteractorProtocol::Testlib,
            }
        );

        let config = read_config(
            dir.path(),
            &json!({"type": "interactive", "interactor": "interactor.cc", "checker_type": "cplib"}),
            &JudgeConfig::default(),
        )
        .await
        .unwrap();
        assert!(matches!(
            config.kind,
            ProblemKind::Interactive { protocol: InteractorProtocol::Cplib, .. }
        ));
        assert_eq!(config.checker, None);

        let config = read_config(
            dir.path(),
            &json!({"type": "objective", "answers": {"1-1": ["A", 5], "1-2": {"B": 3, "C": 1}}}),
            &JudgeConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(config.count, 2);
        match &config.kind {
            ProblemKind::Objective { answers } => {
                assert_eq!(answers["1-1"], StandardAnswer::Scored("A".into(), 5.0));
                assert!(matches!(answers["1-2"], StandardAnswer::Options(_)));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
