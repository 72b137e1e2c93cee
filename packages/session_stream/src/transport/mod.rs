//! Transport collaborator seam.
//!
//! The real-time client (socket, channel multiplexing, reconnects) lives
//! outside this crate. The channel manager only needs to open and close one
//! named channel and bind callbacks to wire event names on it.

mod local;

pub use local::LocalTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Callback invoked by the transport with a wire event's payload.
pub type WireCallback = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("subscription to {channel} rejected: {reason}")]
    Rejected { channel: String, reason: String },

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("channel {0} is closed")]
    Closed(String),
}

/// A live subscription to one channel.
pub trait ChannelHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke `callback` for every `event` pushed on this channel.
    fn bind(&self, event: &str, callback: WireCallback);

    /// Drop every callback bound through this handle.
    fn unbind_all(&self);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn ChannelHandle>, TransportError>;

    /// Close `channel`. Resolves once the transport has stopped delivering
    /// on it.
    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError>;
}
