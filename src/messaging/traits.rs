//! Messaging trait implemented by chat adapters.

use crate::InboundMessage;
use crate::error::Result;

use futures::Stream;

use std::pin::Pin;

/// Message stream type.
pub type InboundStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Handle to a message the bot posted, used for later edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel_id: String,
    pub ts: String,
}

/// Static trait for messaging adapters.
pub trait Messaging: Send + Sync + 'static {
    /// Unique name for this adapter.
    fn name(&self) -> &str;

    /// Start the adapter and return inbound message stream.
    fn start(&self) -> impl std::future::Future<Output = Result<InboundStream>> + Send;

    /// Reply in the thread of `message`, returning a handle to the reply.
    fn reply_in_thread(
        &self,
        message: &InboundMessage,
        text: String,
    ) -> impl std::future::Future<Output = Result<SentMessage>> + Send;

    /// Replace the text of a message previously sent by the bot.
    fn edit(
        &self,
        sent: &SentMessage,
        text: String,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Health check.
    fn health_check(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Graceful shutdown.
    fn shutdown(&self) -> impl std::future::Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}
