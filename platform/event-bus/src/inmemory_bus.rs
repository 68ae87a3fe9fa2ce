//! In-memory implementation of the EventBus trait for testing and
//! development.
//!
//! Beyond the broadcast-channel transport, the bus carries a fault switch
//! (`set_connected`) so broker-outage and recovery scenarios can run in unit
//! tests without a real broker: while "down", publishes fail fast exactly
//! like the NATS bus does.

use crate::{BusError, BusMessage, BusResult, ConnectionState, DeliveryGuarantee, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// EventBus implementation using in-memory channels.
///
/// Messages are broadcast to all subscribers; each subscriber filters by its
/// own pattern. Delivery guarantees are accepted but collapse to the same
/// synchronous send.
///
/// # Example
/// ```rust
/// use event_bus::{DeliveryGuarantee, EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
/// let mut stream = bus.subscribe("tracker.events.>").await?;
///
/// bus.publish("tracker.events.projects", b"hello".to_vec(), DeliveryGuarantee::BrokerAck)
///     .await?;
///
/// let msg = stream.next().await.unwrap();
/// assert_eq!(msg.subject, "tracker.events.projects");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
    connected: Arc<AtomicBool>,
}

impl InMemoryBus {
    /// Create a bus with a 1000-message broadcast buffer.
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a bus with a custom broadcast buffer size. Subscribers that
    /// lag past the buffer skip the dropped messages.
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Fault switch: while `false`, publishes fail with
    /// [`BusError::NotConnected`], simulating a broker outage.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Check a subject against a subscription pattern.
    ///
    /// NATS-style wildcards: `*` matches exactly one token, `>` matches one
    /// or more trailing tokens.
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let mut subject_tokens = subject.split('.');
        let mut pattern_tokens = pattern.split('.').peekable();

        loop {
            match (subject_tokens.next(), pattern_tokens.next()) {
                (_, Some(">")) => return true,
                (Some(_), Some("*")) => continue,
                (Some(s), Some(p)) => {
                    if s != p {
                        return false;
                    }
                }
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        _guarantee: DeliveryGuarantee,
    ) -> BusResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BusError::NotConnected(ConnectionState::Reconnecting));
        }

        // Ignore the error if there are no receivers yet
        let _ = self.sender.send(BusMessage::new(subject.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, pattern = %pattern, "in-memory subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }

    fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Reconnecting
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn test_pattern_matching() {
        // exact
        assert!(InMemoryBus::matches_pattern(
            "tracker.events.projects.created",
            "tracker.events.projects.created"
        ));

        // single-token wildcard
        assert!(InMemoryBus::matches_pattern(
            "tracker.events.projects.created",
            "tracker.*.projects.created"
        ));
        assert!(InMemoryBus::matches_pattern(
            "tracker.events.projects.created",
            "tracker.events.*.created"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "tracker.events.projects.created",
            "tracker.*.created"
        ));

        // multi-token wildcard
        assert!(InMemoryBus::matches_pattern(
            "tracker.events.projects.created",
            "tracker.>"
        ));
        assert!(InMemoryBus::matches_pattern(
            "tracker.events.projects.created",
            "tracker.events.>"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "tracker.events.projects.created",
            "metrics.>"
        ));

        // edges
        assert!(InMemoryBus::matches_pattern("single", "single"));
        assert!(InMemoryBus::matches_pattern("single", "*"));
        assert!(InMemoryBus::matches_pattern("single", ">"));
        assert!(!InMemoryBus::matches_pattern("one.two", "one"));
        assert!(!InMemoryBus::matches_pattern("one", "one.two"));
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("tracker.events.>").await.unwrap();

        let payload = b"test message".to_vec();
        bus.publish(
            "tracker.events.projects",
            payload.clone(),
            DeliveryGuarantee::BrokerAck,
        )
        .await
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg.subject, "tracker.events.projects");
        assert_eq!(msg.payload, payload);
    }

    #[tokio::test]
    async fn test_per_subject_order_is_preserved() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("tracker.>").await.unwrap();

        for i in 0..5 {
            bus.publish(
                "tracker.events.seq",
                format!("message {i}").into_bytes(),
                DeliveryGuarantee::FireAndForget,
            )
            .await
            .unwrap();
        }

        for i in 0..5 {
            let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("timeout")
                .expect("stream ended");
            assert_eq!(msg.payload, format!("message {i}").into_bytes());
        }
    }

    #[tokio::test]
    async fn test_wildcard_filtering() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("tracker.events.*").await.unwrap();

        bus.publish("tracker.events.created", b"match".to_vec(), DeliveryGuarantee::BrokerAck)
            .await
            .unwrap();
        // too deep for a single `*`
        bus.publish(
            "tracker.events.projects.created",
            b"no match".to_vec(),
            DeliveryGuarantee::BrokerAck,
        )
        .await
        .unwrap();
        // wrong prefix
        bus.publish("metrics.events.created", b"no match".to_vec(), DeliveryGuarantee::BrokerAck)
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(msg.subject, "tracker.events.created");

        let extra = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(extra.is_err(), "should timeout, no more matching messages");
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let bus = InMemoryBus::new();
        let mut stream1 = bus.subscribe("tracker.>").await.unwrap();
        let mut stream2 = bus.subscribe("tracker.>").await.unwrap();

        let payload = b"broadcast".to_vec();
        bus.publish("tracker.msg", payload.clone(), DeliveryGuarantee::BrokerAck)
            .await
            .unwrap();

        for stream in [&mut stream1, &mut stream2] {
            let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("timeout")
                .expect("stream ended");
            assert_eq!(msg.payload, payload);
        }
    }

    #[tokio::test]
    async fn test_fault_switch_fails_publishes_fast() {
        let bus = InMemoryBus::new();
        assert_eq!(bus.state(), ConnectionState::Connected);

        bus.set_connected(false);
        assert_eq!(bus.state(), ConnectionState::Reconnecting);

        let result = bus
            .publish("tracker.events.x", b"payload".to_vec(), DeliveryGuarantee::BrokerAck)
            .await;
        assert!(matches!(result, Err(BusError::NotConnected(_))));

        bus.set_connected(true);
        bus.publish("tracker.events.x", b"payload".to_vec(), DeliveryGuarantee::BrokerAck)
            .await
            .unwrap();
    }
}
