//! Wire types of the sandbox RPC contract
//!
//! Field names and units follow the sandbox service exactly: limits are sent
//! in nanoseconds and bytes, results come back the same way.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::status::Status;

/// A file staged into the sandbox before execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CopyInFile {
    /// Path on the sandbox host
    Src { src: String },
    /// Inline content
    Content { content: String },
    /// Previously cached artifact
    Cached {
        #[serde(rename = "fileId")]
        file_id: String,
    },
    /// Symlink inside the sandbox namespace
    Symlink { symlink: String },
}

impl CopyInFile {
    pub fn src(path: impl Into<String>) -> Self {
        CopyInFile::Src { src: path.into() }
    }

    pub fn content(content: impl Into<String>) -> Self {
        CopyInFile::Content {
            content: content.into(),
        }
    }

    pub fn cached(file_id: impl Into<String>) -> Self {
        CopyInFile::Cached {
            file_id: file_id.into(),
        }
    }

    pub fn empty() -> Self {
        CopyInFile::content("")
    }
}

pub type CopyIn = BTreeMap<String, CopyInFile>;

/// File descriptor binding of a command; `None` on the wire (`null`) marks a
/// descriptor that is supplied through the pipe mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CmdFile {
    Src {
        src: String,
    },
    Content {
        content: String,
    },
    Cached {
        #[serde(rename = "fileId")]
        file_id: String,
    },
    Collector {
        name: String,
        max: u64,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        pipe: bool,
    },
    StreamIn {
        #[serde(rename = "streamIn")]
        stream_in: bool,
    },
    StreamOut {
        #[serde(rename = "streamOut")]
        stream_out: bool,
    },
}

impl CmdFile {
    pub fn collector(name: impl Into<String>, max: u64) -> Self {
        CmdFile::Collector {
            name: name.into(),
            max,
            pipe: false,
        }
    }
}

impl From<CopyInFile> for CmdFile {
    fn from(file: CopyInFile) -> Self {
        match file {
            CopyInFile::Src { src } => CmdFile::Src { src },
            CopyInFile::Content { content } => CmdFile::Content { content },
            CopyInFile::Cached { file_id } => CmdFile::Cached { file_id },
            // Symlinks only make sense in copyIn; stdin falls back to an empty stream
            CopyInFile::Symlink { .. } => CmdFile::Content {
                content: String::new(),
            },
        }
    }
}

/// A single command executed by the sandbox
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cmd {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub files: Vec<Option<CmdFile>>,
    /// CPU time limit in ns
    pub cpu_limit: u64,
    /// Wall clock limit in ns
    pub clock_limit: u64,
    /// Memory limit in bytes
    pub memory_limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_limit: Option<u64>,
    pub proc_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_space_limit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_segment_limit: Option<bool>,
    #[serde(default)]
    pub copy_in: CopyIn,
    /// Names to capture inline; a trailing `?` marks them optional
    #[serde(default)]
    pub copy_out: Vec<String>,
    /// Names to cache as artifacts; a trailing `?` marks them optional
    #[serde(default)]
    pub copy_out_cached: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_out_max: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeIndex {
    pub index: usize,
    pub fd: usize,
}

/// Connects `fd` of command `in.index` to `fd` of command `out.index`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeMap {
    #[serde(rename = "in")]
    pub input: PipeIndex,
    #[serde(rename = "out")]
    pub output: PipeIndex,
    /// Capture the transmitted bytes as well
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

impl PipeMap {
    pub fn new(from: (usize, usize), to: (usize, usize)) -> Self {
        Self {
            input: PipeIndex {
                index: from.0,
                fd: from.1,
            },
            output: PipeIndex {
                index: to.0,
                fd: to.1,
            },
            proxy: false,
            name: None,
            max: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Body of `POST /run`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub cmd: Vec<Cmd>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipe_mapping: Vec<PipeMap>,
}

/// Status reported by the sandbox for one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SandboxStatus {
    Accepted,
    MemoryLimitExceeded,
    TimeLimitExceeded,
    OutputLimitExceeded,
    FileError,
    NonzeroExitStatus,
    Signalled,
    InternalError,
    Unknown(String),
}

impl From<String> for SandboxStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Accepted" => SandboxStatus::Accepted,
            "Memory Limit Exceeded" => SandboxStatus::MemoryLimitExceeded,
            "Time Limit Exceeded" => SandboxStatus::TimeLimitExceeded,
            "Output Limit Exceeded" => SandboxStatus::OutputLimitExceeded,
            "File Error" => SandboxStatus::FileError,
            "Nonzero Exit Status" => SandboxStatus::NonzeroExitStatus,
            "Signalled" => SandboxStatus::Signalled,
            "Internal Error" => SandboxStatus::InternalError,
            _ => SandboxStatus::Unknown(s),
        }
    }
}

impl From<SandboxStatus> for String {
    fn from(status: SandboxStatus) -> Self {
        match status {
            SandboxStatus::Accepted => "Accepted".into(),
            SandboxStatus::MemoryLimitExceeded => "Memory Limit Exceeded".into(),
            SandboxStatus::TimeLimitExceeded => "Time Limit Exceeded".into(),
            SandboxStatus::OutputLimitExceeded => "Output Limit Exceeded".into(),
            SandboxStatus::FileError => "File Error".into(),
            SandboxStatus::NonzeroExitStatus => "Nonzero Exit Status".into(),
            SandboxStatus::Signalled => "Signalled".into(),
            SandboxStatus::InternalError => "Internal Error".into(),
            SandboxStatus::Unknown(s) => s,
        }
    }
}

impl SandboxStatus {
    /// Map onto the judge's own status
    pub fn to_status(&self) -> Status {
        match self {
            SandboxStatus::Accepted => Status::Accepted,
            SandboxStatus::TimeLimitExceeded => Status::TimeLimitExceeded,
            SandboxStatus::MemoryLimitExceeded => Status::MemoryLimitExceeded,
            SandboxStatus::OutputLimitExceeded => Status::OutputLimitExceeded,
            SandboxStatus::NonzeroExitStatus | SandboxStatus::Signalled => Status::RuntimeError,
            SandboxStatus::FileError | SandboxStatus::InternalError | SandboxStatus::Unknown(_) => {
                Status::SystemError
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of one command, aligned with the request's `cmd` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxResult {
    pub status: SandboxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Signal number if signalled, otherwise exit status
    #[serde(default)]
    pub exit_status: i32,
    /// CPU time in ns
    #[serde(default)]
    pub time: u64,
    /// Peak memory in bytes
    #[serde(default)]
    pub memory: u64,
    /// Wall clock time in ns
    #[serde(default)]
    pub run_time: u64,
    #[serde(default)]
    pub files: HashMap<String, String>,
    #[serde(default)]
    pub file_ids: HashMap<String, String>,
    #[serde(default)]
    pub file_error: Vec<FileError>,
}

impl SandboxResult {
    pub fn accepted() -> Self {
        Self {
            status: SandboxStatus::Accepted,
            error: None,
            exit_status: 0,
            time: 0,
            memory: 0,
            run_time: 0,
            files: HashMap::new(),
            file_ids: HashMap::new(),
            file_error: Vec::new(),
        }
    }
}

/// Capability flags reported by `GET /version`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxVersion {
    #[serde(default)]
    pub build_version: String,
    #[serde(default)]
    pub go_version: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub copy_out_optional: bool,
    #[serde(default)]
    pub pipe_proxy: bool,
    #[serde(default)]
    pub address_space_limit: bool,
    #[serde(default)]
    pub stream: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_cmd_wire_shape() {
        let mut copy_in = CopyIn::new();
        copy_in.insert("foo".into(), CopyInFile::cached("abc"));
        let cmd = Cmd {
            args: vec!["/w/foo".into()],
            env: vec!["HOME=/w".into()],
            files: vec![None, Some(CmdFile::collector("stdout", 16))],
            cpu_limit: 1_000_000_000,
            clock_limit: 3_000_000_000,
            memory_limit: 256 * 1024 * 1024,
            proc_limit: 32,
            copy_in,
            ..Default::default()
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["files"], json!([null, {"name": "stdout", "max": 16}]));
        assert_eq!(value["copyIn"], json!({"foo": {"fileId": "abc"}}));
        assert_eq!(value["cpuLimit"], json!(1_000_000_000u64));
        assert!(value.get("addressSpaceLimit").is_none());
    }

    #[test]
    fn test_pipe_map_wire_shape() {
        let map = PipeMap::new((1, 1), (0, 3)).named("sol2mgr[0]");
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            json!({"in": {"index": 1, "fd": 1}, "out": {"index": 0, "fd": 3}, "name": "sol2mgr[0]"})
        );
    }

    #[test]
    fn test_result_parse() {
        let result: SandboxResult = serde_json::from_value(json!({
            "status": "Signalled",
            "exitStatus": 11,
            "time": 1_000_000,
            "memory": 2048,
            "runTime": 2_000_000,
            "files": {"stdout": ""}
        }))
        .unwrap();
        assert_eq!(result.status, SandboxStatus::Signalled);
        assert_eq!(result.status.to_status(), Status::RuntimeError);
        assert!(result.file_ids.is_empty());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(SandboxStatus::from("File Error".to_string()).to_status(), Status::SystemError);
        assert_eq!(
            SandboxStatus::from("Output Limit Exceeded".to_string()).to_status(),
            Status::OutputLimitExceeded
        );
        assert_eq!(SandboxStatus::from("???".to_string()).to_status(), Status::SystemError);
    }
}
