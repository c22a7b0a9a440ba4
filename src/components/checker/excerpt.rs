//! Evidence excerpts around a checker's trace locator

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CheckConfig, StreamKind, TraceLocator};
use crate::engine::sandbox::{CopyInFile, Sandbox};

/// Bytes kept on each side of the located position
pub const EXCERPT_RADIUS: usize = 128;

/// Window of the stream a checker complained about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub stream: StreamKind,
    pub line: u64,
    pub col: u64,
    pub excerpt: String,
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// `content` around `byte`, with `...` marking cut ends
///
/// The window is the half-open byte range `[byte - radius, byte + radius)`,
/// clamped to `content`, with both ends moved down to a char boundary.
pub fn window(content: &str, byte: usize, radius: usize) -> String {
    let start = floor_boundary(content, byte.saturating_sub(radius));
    let end = floor_boundary(content, byte.saturating_add(radius));
    let mut out = String::with_capacity(end - start + 6);
    if start > 0 {
        out.push_str("...");
    }
    out.push_str(&content[start..end]);
    if end < content.len() {
        out.push_str("...");
    }
    out
}

async fn read_stream(sandbox: &dyn Sandbox, file: &CopyInFile) -> Option<String> {
    match file {
        CopyInFile::Content { content } => Some(content.clone()),
        CopyInFile::Src { src } => tokio::fs::read(src)
            .await
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .ok(),
        CopyInFile::Cached { file_id } => sandbox
            .get_file(file_id)
            .await
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .ok(),
        CopyInFile::Symlink { .. } => None,
    }
}

/// Fetch the located stream and cut a window out of it
pub async fn evidence(
    sandbox: &dyn Sandbox,
    locator: &TraceLocator,
    config: &CheckConfig,
) -> Option<Evidence> {
    let file = match locator.stream {
        StreamKind::Input => &config.input,
        StreamKind::UserOutput => &config.user_stdout,
        StreamKind::Answer => &config.answer,
    };
    let Some(content) = read_stream(sandbox, file).await else {
        debug!("Cannot read {:?} stream for excerpt", locator.stream);
        return None;
    };
    Some(Evidence {
        stream: locator.stream,
        line: locator.line,
        col: locator.col,
        excerpt: window(&content, locator.byte as usize, EXCERPT_RADIUS),
    })
}
