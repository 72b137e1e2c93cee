//! # Session Stream
//!
//! Live messaging core for a chat administration client: one subscription to
//! the active conversation's channel, server-pushed wire events turned into
//! typed application signals, action-execution lifecycle tracking, message
//! grouping for display, and a bounded cache of recent history.
//!
//! ## Data flow
//!
//! ```text
//! activate_session ─▶ SessionChannelManager ─▶ Transport::subscribe
//!                                                   │ wire events
//!                                                   ▼
//!                         EventRouter (decode ▶ classify) ─▶ EventBus
//!                                                              │
//!                                      SessionMessages ◀───────┤
//!                                      notification UI ◀───────┘
//!
//! HistoryLoader ─▶ SessionMessageCache ─▶ MessageFetcher (on miss)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use session_stream::{
//!     ChannelConfig, EventBus, LocalTransport, SessionChannelManager, SessionId,
//!     SessionMessages,
//! };
//!
//! # async fn demo() {
//! let bus = Arc::new(EventBus::new());
//! let transport = LocalTransport::new();
//! let manager = SessionChannelManager::new(
//!     Arc::new(transport.clone()),
//!     bus.clone(),
//!     ChannelConfig::default(),
//! );
//!
//! let messages = SessionMessages::new();
//! messages.attach(&bus);
//!
//! manager.activate_session("conversation-1").await;
//! transport.publish(
//!     "private-session-conversation-1",
//!     "chat_message",
//!     serde_json::json!({"_id": "m1", "role": "user", "content": "hi"}),
//! );
//! let groups = messages.store_snapshot().groups().len();
//! println!("{groups} groups");
//!
//! manager.deactivate_session(&SessionId::from("conversation-1")).await;
//! # }
//! ```

pub mod bus;
pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod group;
pub mod history;
pub mod router;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod wire;

pub use bus::{BusEvent, EntityKind, EventBus, EventName, Handler, handler};
pub use cache::SessionMessageCache;
pub use channel::{Activation, ChannelState, SessionChannelManager};
pub use config::{CacheConfig, ChannelConfig, StreamConfig, load_config};
pub use error::Error;
pub use group::{MessageGroup, assemble};
pub use history::{HistoryLoader, MessageFetcher};
pub use router::{CREATION_SETTLE_DELAY, Diagnostic, EventRouter, Route, classify};
pub use store::{ActionUpdateOutcome, MessageStore, SessionMessages};
pub use transport::{ChannelHandle, LocalTransport, Transport, TransportError, WireCallback};
pub use types::{
    ActionExecution, ActionExecutionUpdate, ActionStatus, FileAttachment, Message,
    MessageMetadata, MessageRole, SessionId,
};
pub use wire::{InboundEvent, WireEvent};
