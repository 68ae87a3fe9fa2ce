//! Event ingestion and reliability pipeline.
//!
//! Producers hand events to the [`Publisher`]; the processor consumes them
//! from the bus, validates them, and mirrors them durably exactly once.
//! Anything that cannot be delivered, decoded, validated, or persisted ends
//! up in the dead-letter store with its failure reason, recoverable through
//! the replay entry point.

pub mod config;
pub mod events;
pub mod health;
pub mod jetstream;
pub mod metrics;
pub mod routes;
pub mod store;

pub use events::processor::{start_event_processor, ProcessorConfig, EVENTS_SUBJECT};
pub use events::publisher::Publisher;
pub use events::replay::{recover, RecoveryReport, ReplayFilter};

use event_bus::EventBus;
use metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use store::{DeadLetterStore, MirrorStore};

/// Shared handles for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<dyn EventBus>,
    pub publisher: Arc<Publisher>,
    pub mirror: Arc<dyn MirrorStore>,
    pub dlq: Arc<dyn DeadLetterStore>,
    pub metrics: Arc<Metrics>,
    /// How long a DLQ replay waits for the event to reappear in the mirror.
    pub replay_confirm_timeout: Duration,
}
