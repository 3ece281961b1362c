// Publish/subscribe transport trait
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("not connected")]
    NotConnected,
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("unsubscribe from {topic} failed: {reason}")]
    Unsubscribe { topic: String, reason: String },
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Everything the connection reports after `connect` succeeds.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message { topic: String, payload: Bytes },
    /// The transport is retrying on its own.
    Reconnecting,
    /// A retry succeeded.
    Reconnected,
    Offline,
    Closed,
    Error(String),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One connection to a broker.
///
/// `connect` is the one-shot half: it resolves once the broker acknowledges and
/// hands back the persistent event channel for that connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<TransportEvents, TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Release the connection; the event channel closes.
    async fn disconnect(&self);
}
