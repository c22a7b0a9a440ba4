//! Streaming sub-protocol
//!
//! A persistent websocket session where every binary message carries one
//! frame: `[u32 BE length][u8 opcode][payload]`, the length counting opcode
//! and payload. Client frames: `1` start request (JSON), `3` input chunk,
//! `4` cancel. Server frames: `2` output chunk, `1` end (JSON results).
//! Chunk payloads start with the process index and fd, one byte each.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{SandboxRequest, SandboxResult};
use crate::error::SandboxError;

pub const OP_REQUEST: u8 = 1;
pub const OP_OUTPUT: u8 = 2;
pub const OP_INPUT: u8 = 3;
pub const OP_CANCEL: u8 = 4;
pub const OP_END: u8 = 1;

/// Frames sent to the sandbox
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Request(SandboxRequest),
    Input { index: u8, fd: u8, content: Bytes },
    Cancel,
}

/// Frames received from the sandbox
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Output { index: u8, fd: u8, content: Bytes },
    End(StreamEnd),
}

/// Final payload of a streaming run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamEnd {
    #[serde(default)]
    pub results: Vec<SandboxResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn frame(opcode: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u32(payload.len() as u32 + 1);
    buf.put_u8(opcode);
    buf.put_slice(payload);
    buf.freeze()
}

fn chunk(opcode: u8, index: u8, fd: u8, content: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(2 + content.len());
    payload.push(index);
    payload.push(fd);
    payload.extend_from_slice(content);
    frame(opcode, &payload)
}

/// Split a frame into opcode and payload, checking the length prefix
fn unframe(mut buf: Bytes) -> Result<(u8, Bytes), SandboxError> {
    if buf.len() < 5 {
        return Err(SandboxError::Protocol(format!(
            "stream frame too short ({} bytes)",
            buf.len()
        )));
    }
    let len = buf.get_u32() as usize;
    if len != buf.len() {
        return Err(SandboxError::Protocol(format!(
            "stream frame length mismatch: header {}, body {}",
            len,
            buf.len()
        )));
    }
    let opcode = buf.get_u8();
    Ok((opcode, buf))
}

fn split_chunk(mut payload: Bytes) -> Result<(u8, u8, Bytes), SandboxError> {
    if payload.len() < 2 {
        return Err(SandboxError::Protocol("stream chunk without index/fd".into()));
    }
    let index = payload.get_u8();
    let fd = payload.get_u8();
    Ok((index, fd, payload))
}

impl ClientFrame {
    pub fn encode(&self) -> Result<Bytes, SandboxError> {
        Ok(match self {
            ClientFrame::Request(request) => {
                let json = serde_json::to_vec(request)
                    .map_err(|e| SandboxError::Protocol(e.to_string()))?;
                frame(OP_REQUEST, &json)
            }
            ClientFrame::Input { index, fd, content } => chunk(OP_INPUT, *index, *fd, content),
            ClientFrame::Cancel => frame(OP_CANCEL, &[]),
        })
    }

    pub fn decode(buf: Bytes) -> Result<Self, SandboxError> {
        let (opcode, payload) = unframe(buf)?;
        match opcode {
            OP_REQUEST => serde_json::from_slice(&payload)
                .map(ClientFrame::Request)
                .map_err(|e| SandboxError::Protocol(e.to_string())),
            OP_INPUT => {
                let (index, fd, content) = split_chunk(payload)?;
                Ok(ClientFrame::Input { index, fd, content })
            }
            OP_CANCEL => Ok(ClientFrame::Cancel),
            other => Err(SandboxError::Protocol(format!("unknown client opcode {}", other))),
        }
    }
}

impl ServerFrame {
    pub fn encode(&self) -> Result<Bytes, SandboxError> {
        Ok(match self {
            ServerFrame::Output { index, fd, content } => chunk(OP_OUTPUT, *index, *fd, content),
            ServerFrame::End(end) => {
                let json =
                    serde_json::to_vec(end).map_err(|e| SandboxError::Protocol(e.to_string()))?;
                frame(OP_END, &json)
            }
        })
    }

    pub fn decode(buf: Bytes) -> Result<Self, SandboxError> {
        let (opcode, payload) = unframe(buf)?;
        match opcode {
            OP_OUTPUT => {
                let (index, fd, content) = split_chunk(payload)?;
                Ok(ServerFrame::Output { index, fd, content })
            }
            OP_END => serde_json::from_slice(&payload)
                .map(ServerFrame::End)
                .map_err(|e| SandboxError::Protocol(e.to_string())),
            other => Err(SandboxError::Protocol(format!("unknown server opcode {}", other))),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One streaming run over a websocket connection
pub struct StreamSession {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

impl StreamSession {
    /// Connect and send the start request
    pub async fn open(url: &str, request: &SandboxRequest) -> Result<Self, SandboxError> {
        debug!("Connecting to sandbox stream at {}", url);
        let (ws, _) = connect_async(url).await?;
        let (sink, stream) = ws.split();
        let mut session = Self { sink, stream };
        session.send(ClientFrame::Request(request.clone())).await?;
        Ok(session)
    }

    async fn send(&mut self, frame: ClientFrame) -> Result<(), SandboxError> {
        self.sink.send(Message::binary(frame.encode()?)).await?;
        Ok(())
    }

    pub async fn send_input(&mut self, index: u8, fd: u8, content: Bytes) -> Result<(), SandboxError> {
        self.send(ClientFrame::Input { index, fd, content }).await
    }

    pub async fn cancel(&mut self) -> Result<(), SandboxError> {
        self.send(ClientFrame::Cancel).await
    }

    /// Next server frame; `None` once the connection is closed
    pub async fn next_frame(&mut self) -> Result<Option<ServerFrame>, SandboxError> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Binary(data) => return ServerFrame::decode(data).map(Some),
                Message::Close(_) => return Ok(None),
                other => debug!("Ignoring non-binary stream message: {:?}", other),
            }
        }
        Ok(None)
    }

    /// Drive the session to completion, forwarding output chunks
    pub async fn finish<F>(mut self, mut on_output: F) -> Result<Vec<SandboxResult>, SandboxError>
    where
        F: FnMut(u8, u8, Bytes),
    {
        while let Some(frame) = self.next_frame().await? {
            match frame {
                ServerFrame::Output { index, fd, content } => on_output(index, fd, content),
                ServerFrame::End(end) => {
                    if let Some(error) = end.error {
                        return Err(SandboxError::Protocol(error));
                    }
                    if let Err(e) = self.sink.close().await {
                        warn!("Failed to close sandbox stream: {}", e);
                    }
                    return Ok(end.results);
                }
            }
        }
        Err(SandboxError::Protocol(
            "stream closed before the end frame".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sandbox::SandboxStatus;

    #[test]
    fn test_input_frame_layout() {
        let bytes = ClientFrame::Input {
            index: 1,
            fd: 0,
            content: Bytes::from_static(b"42\n"),
        }
        .encode()
        .unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 6, OP_INPUT, 1, 0, b'4', b'2', b'\n']);
    }

    #[test]
    fn test_cancel_frame_layout() {
        let bytes = ClientFrame::Cancel.encode().unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 1, OP_CANCEL]);
        assert_eq!(ClientFrame::decode(bytes).unwrap(), ClientFrame::Cancel);
    }

    #[test]
    fn test_end_frame_decode() {
        let end = StreamEnd {
            results: vec![SandboxResult::accepted()],
            error: None,
        };
        let bytes = ServerFrame::End(end).encode().unwrap();
        match ServerFrame::decode(bytes).unwrap() {
            ServerFrame::End(end) => {
                assert_eq!(end.results.len(), 1);
                assert_eq!(end.results[0].status, SandboxStatus::Accepted);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let bad = Bytes::from_static(&[0, 0, 0, 9, OP_OUTPUT, 0, 1]);
        assert!(matches!(
            ServerFrame::decode(bad),
            Err(SandboxError::Protocol(_))
        ));
        let short = Bytes::from_static(&[0, 0]);
        assert!(ServerFrame::decode(short).is_err());
    }
}
