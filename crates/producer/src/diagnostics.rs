use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::engine::FlushReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Flush,
    Retry,
    /// The transport's per-record outcomes did not line up with the batch.
    OutcomeMismatch,
    /// A stop was requested; queued records are being drained.
    Drain,
    Stop,
}

/// A structured diagnostics event emitted by the flush engine.
#[derive(Debug, Clone)]
pub struct Event<'a> {
    pub kind: EventKind,
    pub reason: Option<FlushReason>,
    pub record_count: usize,
    pub backlog_depth: usize,
    pub backoff: Option<Duration>,
    pub error: Option<&'a dyn std::error::Error>,
}

impl<'a> Event<'a> {
    pub(crate) fn new(kind: EventKind) -> Self {
        Self {
            kind,
            reason: None,
            record_count: 0,
            backlog_depth: 0,
            backoff: None,
            error: None,
        }
    }

    pub(crate) fn reason(mut self, reason: FlushReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub(crate) fn records(mut self, count: usize) -> Self {
        self.record_count = count;
        self
    }

    pub(crate) fn backlog(mut self, depth: usize) -> Self {
        self.backlog_depth = depth;
        self
    }

    pub(crate) fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub(crate) fn error(mut self, error: &'a dyn std::error::Error) -> Self {
        self.error = Some(error);
        self
    }
}

/// Sink for flush engine events. Informational only: nothing it does feeds
/// back into flushing.
pub trait Diagnostics {
    fn emit(&self, event: &Event<'_>);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn emit(&self, event: &Event<'_>) {
        let reason = event.reason.map(|r| r.as_str()).unwrap_or_default();
        match event.kind {
            EventKind::Start => info!(backlog = event.backlog_depth, "producer started"),
            EventKind::Flush => debug!(
                reason,
                records = event.record_count,
                backlog = event.backlog_depth,
                "flush"
            ),
            EventKind::Retry => {
                let backoff_ms = event.backoff.map(|d| d.as_millis() as u64).unwrap_or(0);
                match event.error {
                    Some(error) => error!(
                        %error,
                        reason,
                        records = event.record_count,
                        backoff_ms,
                        "batch submit failed"
                    ),
                    None => warn!(
                        failures = event.record_count,
                        backlog = event.backlog_depth,
                        backoff_ms,
                        "put failures"
                    ),
                }
            }
            EventKind::OutcomeMismatch => warn!(
                records = event.record_count,
                "transport outcome does not match batch"
            ),
            EventKind::Drain => info!(backlog = event.backlog_depth, "stopping producer"),
            EventKind::Stop => info!("stopped producer"),
        }
    }
}

impl<D: Diagnostics + ?Sized> Diagnostics for std::sync::Arc<D> {
    fn emit(&self, event: &Event<'_>) {
        (**self).emit(event)
    }
}
