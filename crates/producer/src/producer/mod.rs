use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::backoff::{Backoff, ExponentialBackoff};
use crate::config::{Config, ConfigError};
use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::engine::FlushEngine;
use crate::record::{MAX_RECORD_SIZE, Record};
use crate::transport::{HttpTransport, Transport, TransportError};

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("record size {size} exceeds the {MAX_RECORD_SIZE} byte limit")]
    RecordTooLarge { size: usize },

    #[error("producer is stopped and no longer accepts records")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build transport: {0}")]
    Transport(#[from] TransportError),
}

/// Cloneable enqueue handle for callers on other tasks.
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<Record>,
}

impl RecordSender {
    /// Enqueue a payload, waiting for space while the backlog is full.
    ///
    /// Oversized payloads are rejected without touching the queue.
    pub async fn put(&self, payload: impl Into<Bytes>) -> Result<(), ProducerError> {
        let record = Record::new(payload).map_err(|size| ProducerError::RecordTooLarge { size })?;
        self.tx
            .send(record)
            .await
            .map_err(|_| ProducerError::Closed)
    }

    /// Records accepted but not yet picked up by the flush engine.
    pub fn backlog(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Batching producer.
///
/// `put` enqueues records; a background task started by `start` flushes them
/// in batches of up to `buffer_size` records, or every `flush_interval` for a
/// partial batch. `stop` drains the queue and returns once every accepted
/// record has been delivered.
pub struct Producer<T = HttpTransport, B = ExponentialBackoff, D = TracingDiagnostics> {
    sender: RecordSender,
    engine: Option<FlushEngine<T, B, D>>,
    stop: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Producer {
    /// Build a producer with the HTTP transport, exponential backoff and
    /// `tracing` diagnostics. Requires `config.endpoint`.
    pub fn new(config: Config) -> Result<Self, ProducerError> {
        let config = config.normalized()?;
        let endpoint = config
            .endpoint
            .clone()
            .ok_or(ConfigError::EndpointMissing)?;
        let transport = HttpTransport::new(&config, endpoint)?;
        let backoff = ExponentialBackoff::new(config.backoff);
        Self::with_parts(config, transport, backoff, TracingDiagnostics)
    }
}

impl<T, B, D> Producer<T, B, D>
where
    T: Transport + Send + Sync + 'static,
    B: Backoff + Send + 'static,
    D: Diagnostics + Send + 'static,
{
    pub fn with_parts(
        config: Config,
        transport: T,
        backoff: B,
        diagnostics: D,
    ) -> Result<Self, ProducerError> {
        let config = config.normalized()?;
        let (tx, rx) = mpsc::channel(config.backlog_size);

        Ok(Self {
            sender: RecordSender { tx },
            engine: Some(FlushEngine::new(
                transport,
                backoff,
                diagnostics,
                rx,
                config.buffer_size,
                config.flush_interval,
            )),
            stop: CancellationToken::new(),
            worker: None,
        })
    }

    /// Spawn the flush engine on the current tokio runtime.
    ///
    /// Must be called from within a runtime. Only the first call has any effect.
    pub fn start(&mut self) {
        let Some(engine) = self.engine.take() else {
            warn!("producer already started");
            return;
        };
        self.worker = Some(tokio::spawn(engine.run(self.stop.clone())));
    }

    pub async fn put(&self, payload: impl Into<Bytes>) -> Result<(), ProducerError> {
        self.sender.put(payload).await
    }

    pub fn sender(&self) -> RecordSender {
        self.sender.clone()
    }

    pub fn backlog(&self) -> usize {
        self.sender.backlog()
    }

    /// Drain the queue, flush everything accepted so far, and wait for the
    /// flush engine to finish.
    ///
    /// Blocks for as long as delivery keeps failing. Outstanding
    /// [`RecordSender`]s get [`ProducerError::Closed`] from then on.
    pub async fn stop(mut self) {
        self.stop.cancel();

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!(error = %e, "flush engine task panicked");
            }
        } else if let Some(engine) = self.engine.take() {
            // Never started: drain on the caller's task instead.
            engine.shutdown().await;
        }
    }
}
