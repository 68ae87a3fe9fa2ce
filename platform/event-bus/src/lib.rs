//! # EventBus Abstraction
//!
//! Platform-level publish/subscribe transport for the event ingestion
//! pipeline.
//!
//! ## Implementations
//!
//! - **NatsBus**: production implementation backed by NATS, with JetStream
//!   acknowledgments for the stronger delivery guarantees and an observable
//!   connection state machine
//! - **InMemoryBus**: test/dev implementation using in-memory channels, with
//!   a fault switch for simulating broker outages
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{DeliveryGuarantee, EventBus, InMemoryBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! let payload = serde_json::to_vec(&serde_json::json!({"kind": "project_created"}))?;
//! bus.publish("tracker.events.projects", payload, DeliveryGuarantee::BrokerAck)
//!     .await?;
//!
//! let mut stream = bus.subscribe("tracker.events.>").await?;
//! while let Some(msg) = futures::StreamExt::next(&mut stream).await {
//!     println!("received {} bytes on {}", msg.payload.len(), msg.subject);
//! }
//! # Ok(())
//! # }
//! ```

mod backoff;
mod envelope;
mod inmemory_bus;
mod nats_bus;
pub mod retry;

pub use backoff::{Backoff, BackoffConfig};
pub use envelope::{validate_envelope, EventEnvelope};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::{NatsBus, NatsConfig};
pub use retry::{retry_with_backoff, RetryConfig};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::time::Instant;

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject/topic this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// When the message was handed to this process, for latency accounting
    pub received_at: Instant,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            received_at: Instant::now(),
        }
    }
}

/// Connection lifecycle of a transport client.
///
/// `Stopped` is terminal and only entered on explicit shutdown; an unexpected
/// drop moves the client to `Reconnecting` until the broker is reachable
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Per-call delivery guarantee for `publish`.
///
/// The guarantee decides whether the call blocks for broker acknowledgment
/// before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryGuarantee {
    /// Best effort, no acknowledgment. For low-value telemetry.
    FireAndForget,
    /// Block until the broker has accepted the message. For business events.
    BrokerAck,
    /// Broker acknowledgment plus an explicit flush of the client buffer.
    /// For events whose loss is unacceptable.
    EndToEnd,
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("not connected to broker (state: {0})")]
    NotConnected(ConnectionState),

    #[error("timed out waiting for broker acknowledgment on {0}")]
    AckTimeout(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction for publish-subscribe messaging.
///
/// Publishes must not block indefinitely while the transport is down: an
/// implementation either queues internally or fails fast with
/// [`BusError::NotConnected`], leaving retry policy to the caller.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject with the requested delivery guarantee.
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
    ) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern.
    ///
    /// Patterns support NATS-style wildcards: `*` matches a single token,
    /// `>` matches one or more trailing tokens.
    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>>;

    /// Current connection state of the underlying transport.
    fn state(&self) -> ConnectionState;

    /// Stop the transport cleanly. Idempotent; further publishes fail fast.
    async fn shutdown(&self) -> BusResult<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
