//! NATS-based implementation of the EventBus trait.
//!
//! Owns the one long-lived broker connection for the process. The initial
//! connect is driven by the shared [`Backoff`] state machine; once up, the
//! async-nats client keeps the socket alive and this wrapper tracks the
//! resulting [`ConnectionState`] through the client event callback. While the
//! connection is down, publishes fail fast with [`BusError::NotConnected`]
//! instead of blocking — retry policy belongs to the publisher.

use crate::{
    Backoff, BackoffConfig, BusError, BusMessage, BusResult, ConnectionState, DeliveryGuarantee,
    EventBus,
};
use async_nats::jetstream;
use async_nats::{Client, ConnectOptions, Event};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Connection settings for [`NatsBus::connect`].
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    /// Backoff for the initial connect loop; exhausting it is fatal.
    pub connect_backoff: BackoffConfig,
    /// Upper bound on waiting for a JetStream acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            connect_backoff: BackoffConfig::default(),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// Production EventBus backed by NATS.
///
/// `BrokerAck` and `EndToEnd` publishes go through JetStream and block for
/// the broker acknowledgment (bounded by `ack_timeout`); `FireAndForget`
/// uses plain core NATS.
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    ack_timeout: Duration,
}

impl NatsBus {
    /// Connect to the broker, retrying with jittered exponential backoff.
    ///
    /// State walks `Connecting → Connected`, via `Reconnecting` between
    /// failed attempts. Exhausting the attempt budget returns
    /// `BusError::ConnectionError`; callers treat that as fatal at startup.
    pub async fn connect(config: NatsConfig) -> BusResult<Self> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let state_tx = Arc::new(state_tx);
        let mut backoff = Backoff::new(config.connect_backoff.clone());

        let client = loop {
            let _ = state_tx.send(ConnectionState::Connecting);

            let callback_tx = state_tx.clone();
            let options = ConnectOptions::new().event_callback(move |event| {
                let tx = callback_tx.clone();
                async move {
                    match event {
                        Event::Connected => {
                            info!("NATS connection (re)established");
                            let _ = tx.send(ConnectionState::Connected);
                        }
                        Event::Disconnected => {
                            warn!("NATS connection lost, client is reconnecting");
                            let _ = tx.send(ConnectionState::Reconnecting);
                        }
                        Event::Closed => {
                            warn!("NATS connection closed");
                            let _ = tx.send(ConnectionState::Stopped);
                        }
                        other => {
                            debug!(event = %other, "NATS client event");
                        }
                    }
                }
            });

            match options.connect(&config.url).await {
                Ok(client) => break client,
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            url = %config.url,
                            attempt = backoff.attempt(),
                            backoff_ms = delay.as_millis(),
                            error = %e,
                            "NATS connect failed, retrying"
                        );
                        let _ = state_tx.send(ConnectionState::Reconnecting);
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        return Err(BusError::ConnectionError(format!(
                            "gave up connecting to {} after {} attempts: {}",
                            config.url,
                            backoff.attempt(),
                            e
                        )));
                    }
                },
            }
        };

        let _ = state_tx.send(ConnectionState::Connected);
        info!(url = %config.url, "connected to NATS");

        let jetstream = jetstream::new(client.clone());
        Ok(Self {
            client,
            jetstream,
            state_tx,
            state_rx,
            ack_timeout: config.ack_timeout,
        })
    }

    /// Underlying NATS client, for JetStream stream provisioning and other
    /// features not exposed through the EventBus trait.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
    ) -> BusResult<()> {
        match *self.state_rx.borrow() {
            ConnectionState::Connected => {}
            state => return Err(BusError::NotConnected(state)),
        }

        match guarantee {
            DeliveryGuarantee::FireAndForget => self
                .client
                .publish(subject.to_string(), payload.into())
                .await
                .map_err(|e| BusError::PublishError(e.to_string())),
            DeliveryGuarantee::BrokerAck | DeliveryGuarantee::EndToEnd => {
                let ack = tokio::time::timeout(self.ack_timeout, async {
                    let ack_future = self
                        .jetstream
                        .publish(subject.to_string(), payload.into())
                        .await
                        .map_err(|e| BusError::PublishError(e.to_string()))?;
                    ack_future
                        .await
                        .map_err(|e| BusError::PublishError(e.to_string()))
                })
                .await
                .map_err(|_| BusError::AckTimeout(subject.to_string()))??;
                debug!(subject = %subject, stream = %ack.stream, sequence = ack.sequence, "broker acknowledged publish");

                if guarantee == DeliveryGuarantee::EndToEnd {
                    self.client
                        .flush()
                        .await
                        .map_err(|e| BusError::PublishError(e.to_string()))?;
                }
                Ok(())
            }
        }
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(pattern.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let stream = subscriber
            .map(|msg| BusMessage::new(msg.subject.to_string(), msg.payload.to_vec()));

        Ok(stream.boxed())
    }

    fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    async fn shutdown(&self) -> BusResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;
        let _ = self.state_tx.send(ConnectionState::Stopped);
        info!("NATS bus stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require a running NATS server with JetStream enabled.
    // For CI, use the InMemoryBus tests instead.
    // For manual testing: docker run -p 4222:4222 nats:2.10-alpine -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_nats_bus_publish_subscribe() {
        let bus = NatsBus::connect(NatsConfig::default())
            .await
            .expect("NATS server must be running on localhost:4222");

        assert_eq!(bus.state(), ConnectionState::Connected);

        let mut stream = bus.subscribe("test.nats.>").await.unwrap();

        let payload = b"test message".to_vec();
        bus.publish(
            "test.nats.hello",
            payload.clone(),
            DeliveryGuarantee::FireAndForget,
        )
        .await
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended");

        assert_eq!(msg.subject, "test.nats.hello");
        assert_eq!(msg.payload, payload);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_backoff_budget() {
        let config = NatsConfig {
            url: "nats://127.0.0.1:1".to_string(), // nothing listens here
            connect_backoff: BackoffConfig {
                base: Duration::from_millis(5),
                max: Duration::from_millis(10),
                max_attempts: 2,
            },
            ack_timeout: Duration::from_millis(100),
        };

        let result = NatsBus::connect(config).await;
        assert!(matches!(result, Err(BusError::ConnectionError(_))));
    }
}
