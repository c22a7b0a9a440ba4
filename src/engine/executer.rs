//! Command execution on top of the sandbox client
//!
//! [`Parameter`] describes one process in judge units (milliseconds,
//! megabytes, a language command line); [`RunOutcome`] is the normalized
//! result. Unit conversion and wire quirks live here and nowhere else.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::languages::SANDBOX_DIR;
use crate::core::status::Status;
use crate::engine::sandbox::{
    Cmd, CmdFile, CopyIn, CopyInFile, PipeMap, Sandbox, SandboxRequest, SandboxResult,
    SandboxStatus, SandboxVersion,
};
use crate::error::SandboxError;

const PATH_ENV: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Capture limit for stdout/stderr collectors
pub const OUTPUT_MAX: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub args: Vec<String>,
    /// None means an empty stdin
    pub stdin: Option<CopyInFile>,
    pub copy_in: CopyIn,
    pub copy_out: Vec<String>,
    pub copy_out_cached: Vec<String>,
    /// CPU time limit in milliseconds
    pub time_ms: u64,
    /// Memory limit in MB
    pub memory_mb: u64,
    pub process_limit: u32,
    pub address_space_limit: bool,
    pub env: BTreeMap<String, String>,
}

impl Parameter {
    pub fn new(args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            copy_in: CopyIn::new(),
            copy_out: Vec::new(),
            copy_out_cached: Vec::new(),
            time_ms: 16_000,
            memory_mb: 1024,
            process_limit: 32,
            address_space_limit: false,
            env: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_stdin(mut self, stdin: CopyInFile) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_copy_in(mut self, copy_in: &CopyIn) -> Self {
        self.copy_in
            .extend(copy_in.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, file: CopyInFile) -> Self {
        self.copy_in.insert(name.into(), file);
        self
    }

    pub fn with_copy_out(mut self, name: impl Into<String>) -> Self {
        self.copy_out.push(name.into());
        self
    }

    pub fn with_copy_out_cached(mut self, name: impl Into<String>) -> Self {
        self.copy_out_cached.push(name.into());
        self
    }

    pub fn with_limits(mut self, time_ms: u64, memory_mb: u64) -> Self {
        self.time_ms = time_ms;
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_process_limit(mut self, process_limit: u32) -> Self {
        self.process_limit = process_limit;
        self
    }

    pub fn with_address_space_limit(mut self, enabled: bool) -> Self {
        self.address_space_limit = enabled;
        self
    }

    pub fn with_env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Wire command for this parameter, honouring the service's capabilities
    pub fn to_cmd(&self, version: &SandboxVersion) -> Cmd {
        let strip_optional = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .map(|n| {
                    if version.copy_out_optional {
                        n.clone()
                    } else {
                        n.trim_end_matches('?').to_string()
                    }
                })
                .collect()
        };

        let mut env = vec![PATH_ENV.to_string(), format!("HOME={}", SANDBOX_DIR)];
        env.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));

        let stdin = self.stdin.clone().unwrap_or_else(CopyInFile::empty);

        Cmd {
            args: self
                .args
                .iter()
                .map(|a| a.replace("${dir}", SANDBOX_DIR))
                .collect(),
            env,
            files: vec![
                Some(stdin.into()),
                Some(CmdFile::collector("stdout", OUTPUT_MAX)),
                Some(CmdFile::collector("stderr", OUTPUT_MAX)),
            ],
            cpu_limit: self.time_ms * 1_000_000,
            clock_limit: self.time_ms * 3_000_000,
            memory_limit: self.memory_mb * 1024 * 1024,
            stack_limit: None,
            proc_limit: self.process_limit,
            address_space_limit: (self.address_space_limit && version.address_space_limit)
                .then_some(true),
            data_segment_limit: None,
            copy_in: self.copy_in.clone(),
            copy_out: strip_optional(&self.copy_out),
            copy_out_cached: strip_optional(&self.copy_out_cached),
            copy_out_max: None,
        }
    }
}

/// Normalized result of one process
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: Status,
    /// CPU time in milliseconds
    pub time_ms: f64,
    /// Peak memory in KB
    pub memory_kb: f64,
    /// Exit code, or signal number when `signalled`
    pub code: i32,
    pub signalled: bool,
    pub stdout: String,
    pub stderr: String,
    /// Other inline copy-outs
    pub files: HashMap<String, String>,
    /// Artifacts created by `copy_out_cached`
    pub file_ids: HashMap<String, String>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn from_result(mut result: SandboxResult, param: &Parameter) -> Self {
        let mut status = result.status.to_status();
        let time_ms = result.time as f64 / 1_000_000.0;
        let clock_limit_ns = param.time_ms * 3_000_000;

        // The sandbox may report success while the process overran the limit
        if status != Status::SystemError
            && (time_ms >= param.time_ms as f64 || result.run_time > clock_limit_ns)
        {
            status = Status::TimeLimitExceeded;
        }

        let stdout = result.files.remove("stdout").unwrap_or_default();
        let stderr = result.files.remove("stderr").unwrap_or_default();
        let error = match (&result.error, result.file_error.is_empty()) {
            (Some(e), _) => Some(e.clone()),
            (None, false) => Some(
                result
                    .file_error
                    .iter()
                    .map(|f| format!("{}: {}", f.name, f.kind))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            (None, true) => None,
        };

        Self {
            status,
            time_ms,
            memory_kb: result.memory as f64 / 1024.0,
            code: result.exit_status,
            signalled: result.status == SandboxStatus::Signalled,
            stdout,
            stderr,
            files: result.files,
            file_ids: result.file_ids,
            error,
        }
    }

    /// Cached copy-out as a file reference usable by later commands
    pub fn cached(&self, name: &str) -> Option<CopyInFile> {
        self.file_ids.get(name).map(CopyInFile::cached)
    }

    /// Delete every artifact this run produced
    pub async fn release(&self, sandbox: &dyn Sandbox) {
        for id in self.file_ids.values() {
            if let Err(e) = sandbox.delete_file(id).await {
                debug!("Failed to delete cached file {}: {}", id, e);
            }
        }
    }
}

async fn capabilities(sandbox: &dyn Sandbox) -> SandboxVersion {
    match sandbox.version().await {
        Ok(version) => version,
        Err(e) => {
            warn!("Cannot query sandbox version, assuming no optional features: {}", e);
            SandboxVersion::default()
        }
    }
}

/// Build a pipe-wired request; piped descriptors become `null`
pub fn build_request(
    params: &[Parameter],
    pipes: &[PipeMap],
    version: &SandboxVersion,
) -> SandboxRequest {
    let mut cmd: Vec<Cmd> = params.iter().map(|p| p.to_cmd(version)).collect();

    for pipe in pipes {
        for end in [pipe.input, pipe.output] {
            if let Some(c) = cmd.get_mut(end.index) {
                if c.files.len() <= end.fd {
                    c.files.resize(end.fd + 1, None);
                }
                c.files[end.fd] = None;
            }
        }
    }

    let pipe_mapping = pipes
        .iter()
        .cloned()
        .map(|mut p| {
            if !version.pipe_proxy {
                p.proxy = false;
                p.name = None;
                p.max = None;
            }
            p
        })
        .collect();

    SandboxRequest {
        request_id: None,
        cmd,
        pipe_mapping,
    }
}

/// Run a single process
pub async fn run(sandbox: &dyn Sandbox, param: Parameter) -> Result<RunOutcome, SandboxError> {
    let mut outcomes = run_piped(sandbox, vec![param], Vec::new()).await?;
    outcomes
        .pop()
        .ok_or_else(|| SandboxError::Protocol("empty result".into()))
}

/// Run several processes wired together by `pipes`
pub async fn run_piped(
    sandbox: &dyn Sandbox,
    params: Vec<Parameter>,
    pipes: Vec<PipeMap>,
) -> Result<Vec<RunOutcome>, SandboxError> {
    let version = capabilities(sandbox).await;
    let request = build_request(&params, &pipes, &version);
    debug!("Running {:?}", params.iter().map(|p| &p.args).collect::<Vec<_>>());

    let results = sandbox.run(request).await?;
    if results.len() != params.len() {
        return Err(SandboxError::Protocol(format!(
            "expected {} result(s), got {}",
            params.len(),
            results.len()
        )));
    }
    Ok(results
        .into_iter()
        .zip(params.iter())
        .map(|(result, param)| RunOutcome::from_result(result, param))
        .collect())
}

/// Run a single process while forwarding its output as it is produced
pub async fn run_streamed(
    sandbox: &dyn Sandbox,
    param: Parameter,
    on_output: &mut (dyn FnMut(usize, usize, Bytes) + Send),
) -> Result<RunOutcome, SandboxError> {
    let version = capabilities(sandbox).await;
    let request = build_request(std::slice::from_ref(&param), &[], &version);
    let mut results = sandbox.run_streamed(request, on_output).await?;
    let result = results
        .pop()
        .ok_or_else(|| SandboxError::Protocol("empty result".into()))?;
    Ok(RunOutcome::from_result(result, &param))
}
