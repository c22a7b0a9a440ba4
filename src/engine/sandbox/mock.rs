//! Scripted in-memory sandbox for tests
//!
//! `/usr/bin/diff` invocations are emulated (normal output format, `-B`/`-Z`
//! honoured); every other command is answered by the test's handler.
//! Copy-in files are resolved to text so handlers can look at them, and
//! `copyOutCached` names are turned into artifacts the mock keeps track of.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    Cmd, CmdFile, CopyInFile, Sandbox, SandboxRequest, SandboxResult, SandboxStatus,
    SandboxVersion,
};
use crate::error::SandboxError;

/// One command as seen by the handler
pub struct MockCall<'a> {
    pub index: usize,
    pub cmd: &'a Cmd,
    pub stdin: String,
    pub files: HashMap<String, String>,
}

impl MockCall<'_> {
    pub fn program(&self) -> &str {
        self.cmd.args.first().map(String::as_str).unwrap_or_default()
    }

    pub fn arg(&self, i: usize) -> Option<&str> {
        self.cmd.args.get(i).map(String::as_str)
    }
}

type Handler = Box<dyn Fn(&MockCall<'_>) -> SandboxResult + Send + Sync>;

pub struct MockSandbox {
    handler: Handler,
    pub version: SandboxVersion,
    requests: Mutex<Vec<SandboxRequest>>,
    store: Mutex<HashMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

pub fn ok(stdout: impl Into<String>) -> SandboxResult {
    let mut result = SandboxResult::accepted();
    result.files.insert("stdout".into(), stdout.into());
    result.files.insert("stderr".into(), String::new());
    result
}

pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> SandboxResult {
    let mut result = ok(stdout);
    result.files.insert("stderr".into(), stderr.into());
    if code != 0 {
        result.status = SandboxStatus::NonzeroExitStatus;
        result.exit_status = code;
    }
    result
}

pub fn with_status(status: SandboxStatus, time_ms: u64) -> SandboxResult {
    let mut result = ok("");
    result.status = status;
    result.time = time_ms * 1_000_000;
    result
}

impl MockSandbox {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&MockCall<'_>) -> SandboxResult + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            version: SandboxVersion::default(),
            requests: Mutex::new(Vec::new()),
            store: Mutex::new(HashMap::new()),
            deleted: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn requests(&self) -> Vec<SandboxRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Every command sent so far, in order
    pub fn commands(&self) -> Vec<Cmd> {
        self.requests()
            .into_iter()
            .flat_map(|request| request.cmd)
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Artifacts created and not deleted yet
    pub fn live_files(&self) -> Vec<String> {
        self.store.lock().unwrap().keys().cloned().collect()
    }

    pub fn put_file(&self, content: impl Into<Vec<u8>>) -> String {
        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.store.lock().unwrap().insert(id.clone(), content.into());
        id
    }

    fn resolve(&self, file: &CopyInFile) -> String {
        match file {
            CopyInFile::Src { src } => std::fs::read_to_string(src).unwrap_or_default(),
            CopyInFile::Content { content } => content.clone(),
            CopyInFile::Cached { file_id } => self
                .store
                .lock()
                .unwrap()
                .get(file_id)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default(),
            CopyInFile::Symlink { .. } => String::new(),
        }
    }

    fn resolve_cmd_file(&self, file: Option<&Option<CmdFile>>) -> String {
        match file {
            Some(Some(CmdFile::Src { src })) => self.resolve(&CopyInFile::src(src.clone())),
            Some(Some(CmdFile::Content { content })) => content.clone(),
            Some(Some(CmdFile::Cached { file_id })) => {
                self.resolve(&CopyInFile::cached(file_id.clone()))
            }
            _ => String::new(),
        }
    }

    fn run_one(&self, index: usize, cmd: &Cmd) -> SandboxResult {
        let files = cmd
            .copy_in
            .iter()
            .map(|(name, file)| (name.clone(), self.resolve(file)))
            .collect::<HashMap<_, _>>();
        let call = MockCall {
            index,
            cmd,
            stdin: self.resolve_cmd_file(cmd.files.first()),
            files,
        };

        let mut result = if call.program().ends_with("/diff") {
            emulate_diff(&call)
        } else {
            (self.handler)(&call)
        };

        for name in &cmd.copy_out_cached {
            let optional = name.ends_with('?');
            let name = name.trim_end_matches('?');
            match result.files.remove(name) {
                Some(content) => {
                    let id = self.put_file(content);
                    result.file_ids.insert(name.to_string(), id);
                }
                None if !optional && result.status == SandboxStatus::Accepted => {
                    let id = self.put_file(format!("artifact:{}", name));
                    result.file_ids.insert(name.to_string(), id);
                }
                None => {}
            }
        }
        result
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn run(&self, request: SandboxRequest) -> Result<Vec<SandboxResult>, SandboxError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(request
            .cmd
            .iter()
            .enumerate()
            .map(|(i, cmd)| self.run_one(i, cmd))
            .collect())
    }

    async fn get_file(&self, file_id: &str) -> Result<Bytes, SandboxError> {
        self.store
            .lock()
            .unwrap()
            .get(file_id)
            .map(|b| Bytes::from(b.clone()))
            .ok_or_else(|| SandboxError::Status {
                status: 404,
                body: "file not found".into(),
            })
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), SandboxError> {
        self.deleted.lock().unwrap().push(file_id.to_string());
        match self.store.lock().unwrap().remove(file_id) {
            Some(_) => Ok(()),
            None => Err(SandboxError::Status {
                status: 404,
                body: "file not found".into(),
            }),
        }
    }

    async fn version(&self) -> Result<SandboxVersion, SandboxError> {
        Ok(self.version.clone())
    }
}

/// Lines kept for comparison, with their 1-based line numbers
fn diff_lines(text: &str, ignore_blank: bool, ignore_trailing: bool) -> Vec<(usize, String)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| {
            let line = if ignore_trailing { line.trim_end() } else { line };
            (i + 1, line.to_string())
        })
        .filter(|(_, line)| !(ignore_blank && line.trim().is_empty()))
        .collect()
}

fn emulate_diff(call: &MockCall<'_>) -> SandboxResult {
    let flags: String = call
        .cmd
        .args
        .iter()
        .skip(1)
        .filter(|a| a.starts_with('-'))
        .map(|a| a.trim_start_matches('-'))
        .collect();
    let operands: Vec<&String> = call.cmd.args.iter().skip(1).filter(|a| !a.starts_with('-')).collect();
    let read = |i: usize| {
        operands
            .get(i)
            .and_then(|name| call.files.get(name.as_str()))
            .cloned()
            .unwrap_or_default()
    };
    let (left, right) = (read(0), read(1));
    let ignore_blank = flags.contains('B');
    let ignore_trailing = flags.contains('Z');

    let left = diff_lines(&left, ignore_blank, ignore_trailing);
    let right = diff_lines(&right, ignore_blank, ignore_trailing);
    let texts = |lines: &[(usize, String)]| lines.iter().map(|(_, l)| l.clone()).collect::<Vec<_>>();
    if texts(&left) == texts(&right) {
        return exited(0, "", "");
    }

    let first = left
        .iter()
        .zip(right.iter())
        .position(|(a, b)| a.1 != b.1)
        .unwrap_or(left.len().min(right.len()));
    let out = match (left.get(first), right.get(first)) {
        (Some((l, a)), Some((r, b))) => format!("{}c{}\n< {}\n---\n> {}\n", l, r, a, b),
        (Some((l, a)), None) => {
            let after = right.last().map(|(n, _)| *n).unwrap_or(0);
            format!("{}d{}\n< {}\n", l, after, a)
        }
        (None, Some((r, b))) => {
            let after = left.last().map(|(n, _)| *n).unwrap_or(0);
            format!("{}a{}\n> {}\n", after, r, b)
        }
        (None, None) => String::new(),
    };
    exited(1, out, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sandbox::CopyIn;

    fn diff_cmd(flags: &str, usrout: &str, answer: &str) -> Cmd {
        let mut copy_in = CopyIn::new();
        copy_in.insert("usrout".into(), CopyInFile::content(usrout));
        copy_in.insert("answer".into(), CopyInFile::content(answer));
        let mut args = vec!["/usr/bin/diff".to_string()];
        if !flags.is_empty() {
            args.push(flags.to_string());
        }
        args.extend(["usrout".to_string(), "answer".to_string()]);
        Cmd {
            args,
            copy_in,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_diff_emulation() {
        let sandbox = MockSandbox::new(|_| ok(""));
        let request = SandboxRequest {
            cmd: vec![
                diff_cmd("-BZ", "1 2  \n\n", "1 2\n"),
                diff_cmd("", "1 2  \n", "1 2\n"),
                diff_cmd("-BZ", "a\nb\nc 4\n", "a\nb\nc 3\n"),
            ],
            ..Default::default()
        };
        let results = sandbox.run(request).await.unwrap();
        assert_eq!(results[0].status, SandboxStatus::Accepted);
        assert_eq!(results[1].status, SandboxStatus::NonzeroExitStatus);
        assert_eq!(results[2].files["stdout"], "3c3\n< c 4\n---\n> c 3\n");
    }

    #[tokio::test]
    async fn test_copy_out_cached_creates_artifacts() {
        let sandbox = MockSandbox::new(|_| ok("binary"));
        let cmd = Cmd {
            args: vec!["/usr/bin/g++".into()],
            copy_out_cached: vec!["foo".into(), "stdout".into()],
            ..Default::default()
        };
        let results = sandbox
            .run(SandboxRequest {
                cmd: vec![cmd],
                ..Default::default()
            })
            .await
            .unwrap();
        let id = results[0].file_ids["stdout"].clone();
        assert_eq!(&sandbox.get_file(&id).await.unwrap()[..], b"binary");
        assert!(results[0].file_ids.contains_key("foo"));
        sandbox.delete_file(&id).await.unwrap();
        assert!(sandbox.delete_file(&id).await.is_err());
    }
}
