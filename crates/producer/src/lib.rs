//! Batching producer for append-only ingestion endpoints.
//!
//! Records are accepted through a bounded queue and flushed in batches by a
//! single background task, either when a batch fills up or when the flush
//! interval elapses. Failed records are retried with backoff until delivered.

pub mod backoff;
pub mod config;
pub mod diagnostics;
mod engine;
mod producer;
mod record;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backoff::{Backoff, ExponentialBackoff};
pub use config::{BackoffConfig, Config, ConfigError};
pub use diagnostics::{Diagnostics, Event, EventKind, TracingDiagnostics};
pub use engine::FlushReason;
pub use producer::{Producer, ProducerError, RecordSender};
pub use record::{MAX_BATCH_SIZE, MAX_RECORD_SIZE, MAX_REQUEST_SIZE, Record};
pub use transport::{BatchOutcome, HttpTransport, RecordOutcome, Transport, TransportError};
