//! JetStream stream provisioning for the events namespace.

use async_nats::jetstream::{self, stream::Config};
use async_nats::Client;
use std::time::Duration;

/// Ensure the stream backing `tracker.events.>` exists so acknowledged
/// publishes have somewhere to land. Idempotent.
pub async fn ensure_streams(nats: Client) -> Result<(), Box<dyn std::error::Error>> {
    let js = jetstream::new(nats);

    let events_cfg = Config {
        name: "TRACKER_EVENTS".to_string(),
        subjects: vec!["tracker.events.>".to_string()],
        max_age: Duration::from_secs(60 * 60 * 24 * 14), // 14 days
        ..Default::default()
    };

    if js.get_stream("TRACKER_EVENTS").await.is_err() {
        js.create_stream(events_cfg).await?;
        tracing::info!("created JetStream stream TRACKER_EVENTS");
    }

    Ok(())
}
