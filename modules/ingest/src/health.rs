//! Round-trip health probe: publish on a dedicated subject, consume our own
//! message back, report the latency. Exercises the full transport path
//! without touching the durable mirror.

use event_bus::{BusError, DeliveryGuarantee, EventBus, EventEnvelope};
use futures::StreamExt;
use serde_json::json;
use std::time::{Duration, Instant};

/// Kept outside `tracker.events.>` so probes never reach the processor.
pub const HEALTH_SUBJECT: &str = "tracker.health.roundtrip";

pub async fn roundtrip_check(bus: &dyn EventBus, timeout: Duration) -> Result<Duration, BusError> {
    let mut stream = bus.subscribe(HEALTH_SUBJECT).await?;

    let envelope = EventEnvelope::new("health_check", json!({}));
    let bytes =
        serde_json::to_vec(&envelope).map_err(|e| BusError::PublishError(e.to_string()))?;

    let start = Instant::now();
    bus.publish(HEALTH_SUBJECT, bytes, DeliveryGuarantee::FireAndForget)
        .await?;

    match tokio::time::timeout(timeout, stream.next()).await {
        Ok(Some(_)) => Ok(start.elapsed()),
        _ => Err(BusError::AckTimeout(HEALTH_SUBJECT.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::InMemoryBus;

    #[tokio::test]
    async fn test_roundtrip_reports_latency() {
        let bus = InMemoryBus::new();
        let latency = roundtrip_check(&bus, Duration::from_secs(1)).await.unwrap();
        assert!(latency < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_roundtrip_fails_when_bus_is_down() {
        let bus = InMemoryBus::new();
        bus.set_connected(false);
        let result = roundtrip_check(&bus, Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
