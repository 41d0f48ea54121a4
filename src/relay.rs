//! Upload orchestration: turns file messages into CDN uploads.
//!
//! For each message with attachments in the watched channel, one proxy token
//! is minted per file and the resulting public URLs are handed to the CDN in
//! a single batch. The thread gets a loading reply that is edited with the
//! outcome. Tokens the CDN did not redeem are swept once the batch call has
//! returned, whatever its result.

use crate::cdn::{CdnUploadResponse, UploadService};
use crate::config::Config;
use crate::error::{CdnError, Result};
use crate::messaging::Messaging;
use crate::proxy::TokenRegistry;
use crate::{Attachment, InboundMessage, MessageContent};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

const LOADING_TEXT: &str = ":loading-tumbleweed: uploady-ing...";

/// Static routing and presentation settings for the relay.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Only messages from this channel are relayed.
    pub channel_id: String,
    /// Public base of the file proxy, without a trailing slash.
    pub public_base_url: String,
    /// Mentioned in failure replies when set.
    pub support_user_id: Option<String>,
}

impl From<&Config> for RelaySettings {
    fn from(config: &Config) -> Self {
        Self {
            channel_id: config.slack.channel_id.clone(),
            public_base_url: config.proxy.public_base_url.clone(),
            support_user_id: config.slack.support_user_id.clone(),
        }
    }
}

/// Relays message attachments to the upload service through the file proxy.
pub struct FileRelay<M, U> {
    messaging: Arc<M>,
    uploader: Arc<U>,
    registry: Arc<TokenRegistry>,
    settings: RelaySettings,
}

impl<M: Messaging, U: UploadService> FileRelay<M, U> {
    pub fn new(
        messaging: Arc<M>,
        uploader: Arc<U>,
        registry: Arc<TokenRegistry>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            messaging,
            uploader,
            registry,
            settings,
        }
    }

    /// Dispatch one inbound message. Failures are logged, never propagated.
    pub async fn handle(&self, message: &InboundMessage) {
        if message.channel_id != self.settings.channel_id {
            return;
        }

        match &message.content {
            MessageContent::Text(_) => {
                tracing::trace!(message_id = %message.id, "ignoring message without files");
            }
            MessageContent::Media { attachments, .. } if attachments.is_empty() => {}
            MessageContent::Media { attachments, .. } => {
                if let Err(error) = self.relay(message, attachments).await {
                    tracing::warn!(%error, message_id = %message.id, "file relay failed");
                }
            }
        }
    }

    async fn relay(&self, message: &InboundMessage, attachments: &[Attachment]) -> Result<()> {
        let mut tokens = Vec::with_capacity(attachments.len());
        let mut urls = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let token = self.registry.mint(&attachment.url).await;
            urls.push(proxy_url(
                &self.settings.public_base_url,
                &token,
                &attachment.filename,
            ));
            tokens.push(token);
        }

        tracing::info!(
            message_id = %message.id,
            sender_id = %message.sender_id,
            files = attachments.len(),
            "relaying files to CDN"
        );

        let outcome = self.upload_and_report(message, &urls).await;

        let swept = self.registry.invalidate(&tokens).await;
        if swept > 0 {
            tracing::debug!(swept, message_id = %message.id, "swept unredeemed proxy tokens");
        }

        outcome
    }

    async fn upload_and_report(&self, message: &InboundMessage, urls: &[String]) -> Result<()> {
        let loading = self
            .messaging
            .reply_in_thread(message, LOADING_TEXT.to_string())
            .await?;

        let text = match self.uploader.upload(urls).await {
            Ok(response) => {
                tracing::info!(
                    message_id = %message.id,
                    deployed = response.files.len(),
                    "CDN upload complete"
                );
                success_text(&response)
            }
            Err(error) => {
                tracing::warn!(%error, message_id = %message.id, "CDN upload failed");
                failure_text(&error, self.settings.support_user_id.as_deref())
            }
        };

        self.messaging.edit(&loading, text).await
    }
}

/// Wait for in-flight relays during shutdown, aborting whatever outlives `grace`.
///
/// Returns how many relays were aborted. Call this before stopping the file
/// proxy so running uploads can still fetch through it and sweep their tokens.
pub async fn drain_in_flight(tasks: &mut JoinSet<()>, grace: Duration) -> usize {
    let drained = tokio::time::timeout(grace, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                tracing::warn!(%error, "relay task failed");
            }
        }
    })
    .await;
    if drained.is_ok() {
        return 0;
    }

    let aborted = tasks.len();
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    tracing::warn!(aborted, "aborted in-flight relays after shutdown grace period");
    aborted
}

/// `{base}/{token}/{filename}`; the filename only makes the URL readable.
fn proxy_url(base: &str, token: &str, filename: &str) -> String {
    if filename.is_empty() {
        format!("{base}/{token}")
    } else {
        format!("{base}/{token}/{}", urlencoding::encode(filename))
    }
}

fn success_text(response: &CdnUploadResponse) -> String {
    let file_list = response
        .files
        .iter()
        .map(|file| file.deployed_url.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!("your files have been uploaded!\n{file_list}")
}

fn failure_text(error: &CdnError, support_user_id: Option<&str>) -> String {
    let mut text = format!("sorry, something went wrong :(\n```\n{error}\n```");
    if let Some(user_id) = support_user_id {
        text.push_str(&format!("\n\ndm <@{user_id}> about it?"));
    }
    text
}
