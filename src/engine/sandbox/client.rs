use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::stream::StreamSession;
use super::{replay_outputs, CmdFile, Sandbox, SandboxRequest, SandboxResult, SandboxVersion};
use crate::error::SandboxError;

/// HTTP client for the sandbox service
#[derive(Debug)]
pub struct HttpSandbox {
    client: Client,
    base_url: String,
    version: OnceCell<SandboxVersion>,
}

impl HttpSandbox {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            version: OnceCell::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Websocket endpoint of the streaming sub-protocol
    pub fn stream_endpoint(&self) -> String {
        let url = self.endpoint("/stream");
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            url
        }
    }

    /// Open a streaming session for interactive use
    pub async fn stream(&self, request: &SandboxRequest) -> Result<StreamSession, SandboxError> {
        if !self.version().await?.stream {
            return Err(SandboxError::Protocol(
                "sandbox does not support streaming".into(),
            ));
        }
        StreamSession::open(&self.stream_endpoint(), request).await
    }

    async fn check(res: Response) -> Result<Response, SandboxError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(SandboxError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Sandbox for HttpSandbox {
    async fn run(&self, request: SandboxRequest) -> Result<Vec<SandboxResult>, SandboxError> {
        debug!(
            "POST /run with {} command(s), {} pipe(s)",
            request.cmd.len(),
            request.pipe_mapping.len()
        );
        let res = self
            .client
            .post(self.endpoint("/run"))
            .json(&request)
            .send()
            .await?;
        let body = Self::check(res).await?.bytes().await?;
        let results: Vec<SandboxResult> = serde_json::from_slice(&body)
            .map_err(|e| SandboxError::Protocol(format!("invalid /run response: {}", e)))?;

        if results.len() != request.cmd.len() {
            return Err(SandboxError::Protocol(format!(
                "expected {} result(s), got {}",
                request.cmd.len(),
                results.len()
            )));
        }
        Ok(results)
    }

    async fn get_file(&self, file_id: &str) -> Result<Bytes, SandboxError> {
        let res = self
            .client
            .get(self.endpoint(&format!("/file/{}", file_id)))
            .send()
            .await?;
        Ok(Self::check(res).await?.bytes().await?)
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), SandboxError> {
        let res = self
            .client
            .delete(self.endpoint(&format!("/file/{}", file_id)))
            .send()
            .await?;
        Self::check(res).await?;
        Ok(())
    }

    async fn version(&self) -> Result<SandboxVersion, SandboxError> {
        let version = self
            .version
            .get_or_try_init(|| async {
                let res = self.client.get(self.endpoint("/version")).send().await?;
                match Self::check(res).await {
                    Ok(res) => Ok(res.json::<SandboxVersion>().await?),
                    Err(SandboxError::Status { status: 404, .. }) => {
                        // Old services have no /version; assume no optional features
                        warn!("Sandbox at {} does not report a version", self.base_url);
                        Ok(SandboxVersion::default())
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(version.clone())
    }

    async fn run_streamed(
        &self,
        mut request: SandboxRequest,
        on_output: &mut (dyn FnMut(usize, usize, Bytes) + Send),
    ) -> Result<Vec<SandboxResult>, SandboxError> {
        if !self.version().await?.stream {
            let results = self.run(request).await?;
            replay_outputs(&results, on_output);
            return Ok(results);
        }

        // Collectors become stream outputs; their content is rebuilt from the chunks
        let mut collected: HashMap<(usize, usize), (String, Vec<u8>)> = HashMap::new();
        for (index, cmd) in request.cmd.iter_mut().enumerate() {
            for (fd, file) in cmd.files.iter_mut().enumerate() {
                if let Some(CmdFile::Collector { name, pipe: false, .. }) = file {
                    collected.insert((index, fd), (name.clone(), Vec::new()));
                    *file = Some(CmdFile::StreamOut { stream_out: true });
                }
            }
        }

        let session = self.stream(&request).await?;
        let mut results = session
            .finish(|index, fd, content| {
                let key = (index as usize, fd as usize);
                if let Some((_, buf)) = collected.get_mut(&key) {
                    buf.extend_from_slice(&content);
                }
                on_output(key.0, key.1, content);
            })
            .await?;

        for ((index, _), (name, buf)) in collected {
            if let Some(result) = results.get_mut(index) {
                result
                    .files
                    .insert(name, String::from_utf8_lossy(&buf).into_owned());
            }
        }
        Ok(results)
    }
}
