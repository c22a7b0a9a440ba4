//! Sandbox RPC client
//!
//! The sandbox is a separate service executing untrusted commands under
//! resource limits. This module only speaks its wire contract:
//!
//! - `POST /run` with a [`SandboxRequest`], answered by one [`SandboxResult`]
//!   per command, in request order
//! - `GET /file/:id` and `DELETE /file/:id` for cached artifacts
//! - `GET /version` for capability flags
//! - an optional streaming session (see [`stream`])

pub mod client;
#[cfg(test)]
pub mod mock;
pub mod stream;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SandboxError;

pub use client::HttpSandbox;
pub use types::*;

/// Transport to a sandbox service
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run a batch of commands, optionally wired together by pipes
    async fn run(&self, request: SandboxRequest) -> Result<Vec<SandboxResult>, SandboxError>;

    /// Fetch a cached artifact
    async fn get_file(&self, file_id: &str) -> Result<Bytes, SandboxError>;

    /// Release a cached artifact
    async fn delete_file(&self, file_id: &str) -> Result<(), SandboxError>;

    /// Capability flags of the service
    async fn version(&self) -> Result<SandboxVersion, SandboxError>;

    /// Run while forwarding output chunks as `(index, fd, bytes)`
    ///
    /// Without a streaming transport the captured stdout/stderr are replayed
    /// once the run has ended.
    async fn run_streamed(
        &self,
        request: SandboxRequest,
        on_output: &mut (dyn FnMut(usize, usize, Bytes) + Send),
    ) -> Result<Vec<SandboxResult>, SandboxError> {
        let results = self.run(request).await?;
        replay_outputs(&results, on_output);
        Ok(results)
    }
}

/// Feed captured stdout/stderr to an output callback after the fact
pub fn replay_outputs(results: &[SandboxResult], on_output: &mut (dyn FnMut(usize, usize, Bytes) + Send)) {
    for (index, result) in results.iter().enumerate() {
        for (fd, name) in [(1, "stdout"), (2, "stderr")] {
            if let Some(content) = result.files.get(name).filter(|c| !c.is_empty()) {
                on_output(index, fd, Bytes::from(content.clone()));
            }
        }
    }
}
