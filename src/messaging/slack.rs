//! Slack messaging adapter using slack-morphism.
//!
//! **Inbound** (Socket Mode)
//! - Plain and `file_share` messages, with `url_private` attachments
//! - Bot messages, the bot's own messages and other subtypes are dropped
//!
//! **Outbound**
//! - Thread replies via `chat.postMessage`
//! - In-place edits via `chat.update`

use crate::messaging::traits::{InboundStream, Messaging, SentMessage};
use crate::{Attachment, InboundMessage, MessageContent};

use anyhow::Context as _;
use slack_morphism::prelude::*;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};

/// State shared with socket mode callbacks via `SlackClientEventsUserState`.
struct SlackAdapterState {
    inbound_tx: mpsc::Sender<InboundMessage>,
    bot_user_id: String,
}

/// Slack adapter.
pub struct SlackAdapter {
    app_token: String,
    /// Shared REST client; holds the hyper connection pool.
    client: Arc<SlackHyperClient>,
    /// Pre-built API token wrapping the bot token.
    token: SlackApiToken,
    shutdown_tx: Arc<RwLock<Option<mpsc::Sender<()>>>>,
}

impl SlackAdapter {
    pub fn new(bot_token: impl Into<String>, app_token: impl Into<String>) -> anyhow::Result<Self> {
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("failed to create slack HTTP connector")?,
        ));
        let token = SlackApiToken::new(SlackApiTokenValue(bot_token.into()));
        Ok(Self {
            app_token: app_token.into(),
            client,
            token,
            shutdown_tx: Arc::new(RwLock::new(None)),
        })
    }

    /// Open a session against the cached client using the cached bot token.
    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.token)
    }
}

// ---------------------------------------------------------------------------
// Inbound event handlers (fn pointers — slack-morphism requirement)
// ---------------------------------------------------------------------------

async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> UserCallbackResult<()> {
    match event.event {
        SlackEventCallbackBody::Message(msg) => handle_message_event(msg, states).await,
        _ => Ok(()),
    }
}

async fn handle_message_event(
    msg_event: SlackMessageEvent,
    states: SlackClientEventsUserState,
) -> UserCallbackResult<()> {
    if !is_relayable_subtype(msg_event.subtype.as_ref()) {
        return Ok(());
    }
    if msg_event.sender.bot_id.is_some() {
        return Ok(());
    }

    let state_guard = states.read().await;
    let Some(adapter_state) = state_guard.get_user_state::<Arc<SlackAdapterState>>() else {
        tracing::error!("slack adapter state missing from listener environment");
        return Ok(());
    };

    let Some(user_id) = msg_event.sender.user.as_ref().map(|u| u.0.clone()) else {
        return Ok(()); // system message
    };
    if user_id == adapter_state.bot_user_id {
        return Ok(()); // ignore self
    }

    let Some(channel_id) = msg_event.origin.channel.as_ref().map(|c| c.0.clone()) else {
        return Ok(());
    };

    let inbound = InboundMessage {
        id: msg_event.origin.ts.0.clone(),
        source: "slack".into(),
        channel_id,
        thread_ts: msg_event.origin.thread_ts.as_ref().map(|t| t.0.clone()),
        sender_id: user_id,
        content: extract_message_content(&msg_event.content),
        timestamp: chrono::Utc::now(),
    };

    if let Err(error) = adapter_state.inbound_tx.send(inbound).await {
        tracing::warn!(%error, "failed to send inbound message from Slack");
    }

    Ok(())
}

fn slack_error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> HttpStatusCode {
    tracing::warn!(error = %err, "slack socket mode error");
    HttpStatusCode::OK
}

// ---------------------------------------------------------------------------
// Messaging trait impl
// ---------------------------------------------------------------------------

impl Messaging for SlackAdapter {
    fn name(&self) -> &str {
        "slack"
    }

    async fn start(&self) -> crate::Result<InboundStream> {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let auth_response = self
            .session()
            .auth_test()
            .await
            .context("failed to call auth.test for bot user ID")?;
        let bot_user_id = auth_response.user_id.0.clone();
        tracing::info!(bot_user_id = %bot_user_id, "slack bot user ID resolved");

        let adapter_state = Arc::new(SlackAdapterState {
            inbound_tx,
            bot_user_id,
        });

        let callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

        // The socket mode listener owns a persistent WebSocket connection and
        // needs its own client. `self.client` is for REST calls only.
        let listener_client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new()
                .context("failed to create slack socket mode connector")?,
        ));

        let listener_environment = Arc::new(
            SlackClientEventsListenerEnvironment::new(listener_client)
                .with_error_handler(slack_error_handler)
                .with_user_state(adapter_state),
        );

        let listener = SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment,
            callbacks,
        );

        let app_token = SlackApiToken::new(SlackApiTokenValue(self.app_token.clone()));

        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                tracing::error!(%error, "failed to start slack socket mode listener");
                return;
            }

            tracing::info!("slack socket mode connected");

            tokio::select! {
                exit_code = listener.serve() => {
                    tracing::info!(exit_code, "slack socket mode listener stopped");
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("slack socket mode shutting down");
                    listener.shutdown().await;
                }
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(
            inbound_rx,
        )))
    }

    async fn reply_in_thread(
        &self,
        message: &InboundMessage,
        text: String,
    ) -> crate::Result<SentMessage> {
        let channel_id = SlackChannelId(message.channel_id.clone());
        let thread_ts = SlackTs(message.thread_root().to_string());

        let req = SlackApiChatPostMessageRequest::new(
            channel_id,
            SlackMessageContent::new().with_text(text),
        )
        .with_thread_ts(thread_ts);

        let response = self
            .session()
            .chat_post_message(&req)
            .await
            .context("failed to send slack thread reply")?;

        Ok(SentMessage {
            channel_id: response.channel.0,
            ts: response.ts.0,
        })
    }

    async fn edit(&self, sent: &SentMessage, text: String) -> crate::Result<()> {
        let req = SlackApiChatUpdateRequest::new(
            SlackChannelId(sent.channel_id.clone()),
            SlackMessageContent::new().with_text(text),
            SlackTs(sent.ts.clone()),
        );

        self.session()
            .chat_update(&req)
            .await
            .context("failed to edit slack message")?;

        Ok(())
    }

    async fn health_check(&self) -> crate::Result<()> {
        self.session()
            .api_test(&SlackApiTestRequest::new())
            .await
            .context("slack health check failed")?;
        Ok(())
    }

    async fn shutdown(&self) -> crate::Result<()> {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(()).await;
        }
        tracing::info!("slack adapter shut down");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Files arrive as `file_share`; edits, joins and bot posts are skipped.
fn is_relayable_subtype(subtype: Option<&SlackMessageEventType>) -> bool {
    matches!(subtype, None | Some(SlackMessageEventType::FileShare))
}

/// Extract `MessageContent` from an optional `SlackMessageContent`.
///
/// Files without a private URL cannot be proxied and are dropped.
fn extract_message_content(content: &Option<SlackMessageContent>) -> MessageContent {
    let Some(msg_content) = content else {
        return MessageContent::Text(String::new());
    };

    if let Some(ref files) = msg_content.files {
        let attachments: Vec<Attachment> = files
            .iter()
            .filter_map(|f| {
                let Some(url) = f.url_private.as_ref() else {
                    tracing::warn!(file_id = %f.id.0, "slack file has no private URL, skipping");
                    return None;
                };
                Some(Attachment {
                    filename: f.name.clone().unwrap_or_else(|| "unnamed".into()),
                    mime_type: f.mimetype.as_ref().map(|m| m.0.clone()).unwrap_or_default(),
                    url: url.to_string(),
                })
            })
            .collect();

        if !attachments.is_empty() {
            return MessageContent::Media {
                text: msg_content.text.clone(),
                attachments,
            };
        }
    }

    MessageContent::Text(msg_content.text.clone().unwrap_or_default())
}
