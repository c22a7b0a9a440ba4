//! Templated user-facing messages
//!
//! Messages are sent to the reporting side as a template plus positional
//! parameters so they can be localized there. `{0}`, `{1}`, ... refer to
//! `params` by index.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(message: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            message: message.into(),
            params,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }

    /// Substitute the parameters into the template
    pub fn render(&self) -> String {
        let mut out = self.message.clone();
        for (i, param) in self.params.iter().enumerate() {
            out = out.replace(&format!("{{{}}}", i), param);
        }
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<String> for Message {
    fn from(message: String) -> Self {
        Message::new(message)
    }
}

impl From<&str> for Message {
    fn from(message: &str) -> Self {
        Message::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_positional() {
        let msg = Message::with_params("Read {0}, expect {1}.", vec!["1".into(), "2".into()]);
        assert_eq!(msg.render(), "Read 1, expect 2.");
    }

    #[test]
    fn test_params_skipped_when_empty() {
        let json = serde_json::to_string(&Message::new("ok")).unwrap();
        assert_eq!(json, r#"{"message":"ok"}"#);
    }
}
