//! cdnbot: relays files posted in Slack to a CDN through a single-use file proxy.

pub mod cdn;
pub mod config;
pub mod error;
pub mod messaging;
pub mod proxy;
pub mod relay;
pub mod workflow;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Inbound message from the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform message id (the Slack `ts`).
    pub id: String,
    pub source: String,
    pub channel_id: String,
    /// Parent thread, if the message was posted as a reply.
    pub thread_ts: Option<String>,
    pub sender_id: String,
    pub content: MessageContent,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl InboundMessage {
    /// Timestamp of the thread replies should land in.
    pub fn thread_root(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.id)
    }
}

/// Message content variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageContent {
    Text(String),
    Media {
        text: Option<String>,
        attachments: Vec<Attachment>,
    },
}

impl std::fmt::Display for MessageContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageContent::Text(text) => write!(f, "{}", text),
            MessageContent::Media { text, attachments } => match text {
                Some(t) if !t.is_empty() => write!(f, "{} [{} file(s)]", t, attachments.len()),
                _ => write!(f, "[{} file(s)]", attachments.len()),
            },
        }
    }
}

/// File attachment metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    /// Private, credential-gated URL of the file.
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(thread_ts: Option<&str>) -> InboundMessage {
        InboundMessage {
            id: "1700000000.000200".into(),
            source: "slack".into(),
            channel_id: "C0123".into(),
            thread_ts: thread_ts.map(str::to_string),
            sender_id: "U1".into(),
            content: MessageContent::Text("hi".into()),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn top_level_message_is_its_own_thread_root() {
        assert_eq!(message(None).thread_root(), "1700000000.000200");
    }

    #[test]
    fn reply_uses_parent_thread() {
        assert_eq!(
            message(Some("1700000000.000100")).thread_root(),
            "1700000000.000100"
        );
    }

    #[test]
    fn media_display_counts_files() {
        let content = MessageContent::Media {
            text: None,
            attachments: vec![Attachment {
                filename: "a.png".into(),
                mime_type: "image/png".into(),
                url: "https://files.slack.com/a.png".into(),
            }],
        };

        assert_eq!(content.to_string(), "[1 file(s)]");
    }
}
