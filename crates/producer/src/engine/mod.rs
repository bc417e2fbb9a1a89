use std::fmt;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::diagnostics::{Diagnostics, Event, EventKind};
use crate::record::Record;
use crate::transport::{BatchOutcome, Transport};

/// Why a batch was handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The batch reached `buffer_size` records.
    BufferSize,
    /// The flush interval elapsed with a non-empty batch.
    Interval,
    /// Residual records flushed once on shutdown.
    Final,
    /// Resubmitting the records a partial failure reported.
    Retry,
    /// Resubmitting a whole batch after the submit call itself failed.
    Error,
}

impl FlushReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushReason::BufferSize => "buffer size",
            FlushReason::Interval => "interval",
            FlushReason::Final => "final",
            FlushReason::Retry => "retry",
            FlushReason::Error => "error",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drains the record queue into batches and delivers them.
///
/// Owned by exactly one task; the in-progress batch and the backoff state are
/// never shared, so nothing here is locked.
pub(crate) struct FlushEngine<T, B, D> {
    transport: T,
    backoff: B,
    diagnostics: D,
    records: mpsc::Receiver<Record>,
    batch: Vec<Record>,
    buffer_size: usize,
    flush_interval: Duration,
}

impl<T: Transport, B: Backoff, D: Diagnostics> FlushEngine<T, B, D> {
    pub(crate) fn new(
        transport: T,
        backoff: B,
        diagnostics: D,
        records: mpsc::Receiver<Record>,
        buffer_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            transport,
            backoff,
            diagnostics,
            records,
            batch: Vec::with_capacity(buffer_size),
            buffer_size,
            flush_interval,
        }
    }

    /// Flush on size and interval until `stop` is cancelled or every sender is
    /// gone, then drain and shut down.
    pub(crate) async fn run(mut self, stop: CancellationToken) {
        self.emit(Event::new(EventKind::Start));

        let mut ticker = time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.tick(&mut ticker, &stop).await.is_continue() {}

        self.shutdown().await;
    }

    /// Wait for the next record, interval tick or stop request.
    ///
    /// Returns `ControlFlow::Break` once the engine should start draining.
    async fn tick(&mut self, ticker: &mut Interval, stop: &CancellationToken) -> ControlFlow<()> {
        tokio::select! {
            record = self.records.recv() => {
                match record {
                    Some(record) => self.push(record).await,
                    None => return ControlFlow::Break(()),
                }
            }
            _ = ticker.tick() => {
                if !self.batch.is_empty() {
                    self.flush_batch(FlushReason::Interval).await;
                }
            }
            _ = stop.cancelled() => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Consume everything queued, close the queue, flush what is left over and
    /// report the stop.
    ///
    /// Puts already waiting for space when the drain starts still land: the
    /// queue is only closed once it has been seen empty.
    pub(crate) async fn shutdown(mut self) {
        self.emit(Event::new(EventKind::Drain));

        loop {
            while let Ok(record) = self.records.try_recv() {
                self.push(record).await;
            }
            // A sender handed a freed slot has to run before its record is visible.
            task::yield_now().await;
            if self.records.is_empty() {
                break;
            }
        }

        // Permits taken before the close are still delivered.
        self.records.close();
        while let Some(record) = self.records.recv().await {
            self.push(record).await;
        }

        if !self.batch.is_empty() {
            self.flush_batch(FlushReason::Final).await;
        }

        self.emit(Event::new(EventKind::Stop));
    }

    async fn push(&mut self, record: Record) {
        self.batch.push(record);
        if self.batch.len() >= self.buffer_size {
            self.flush_batch(FlushReason::BufferSize).await;
        }
    }

    async fn flush_batch(&mut self, reason: FlushReason) {
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.buffer_size));
        self.flush(batch, reason).await;
    }

    /// Submit `batch`, retrying until every record in it is delivered.
    ///
    /// Retries block the engine: nothing else is flushed until this returns.
    async fn flush(&mut self, mut batch: Vec<Record>, mut reason: FlushReason) {
        debug_assert!(!batch.is_empty());

        loop {
            self.emit(Event::new(EventKind::Flush).reason(reason).records(batch.len()));

            let delay = match self.transport.submit_batch(&batch).await {
                Ok(outcome) if outcome.failed_count == 0 => {
                    self.backoff.reset();
                    return;
                }
                Ok(outcome) => match failures(&batch, &outcome) {
                    Some(failed) => {
                        let delay = self.next_backoff(
                            Event::new(EventKind::Retry)
                                .reason(reason)
                                .records(failed.len()),
                        );
                        batch = failed;
                        reason = FlushReason::Retry;
                        delay
                    }
                    None => {
                        self.emit(
                            Event::new(EventKind::OutcomeMismatch)
                                .reason(reason)
                                .records(batch.len()),
                        );
                        let delay = self.next_backoff(
                            Event::new(EventKind::Retry)
                                .reason(reason)
                                .records(batch.len()),
                        );
                        reason = FlushReason::Error;
                        delay
                    }
                },
                Err(error) => {
                    let delay = self.next_backoff(
                        Event::new(EventKind::Retry)
                            .reason(reason)
                            .records(batch.len())
                            .error(&error),
                    );
                    reason = FlushReason::Error;
                    delay
                }
            };

            time::sleep(delay).await;
        }
    }

    fn next_backoff(&mut self, event: Event<'_>) -> Duration {
        let delay = self.backoff.next_delay();
        self.emit(event.backoff(delay));
        delay
    }

    fn emit(&self, event: Event<'_>) {
        self.diagnostics.emit(&event.backlog(self.records.len()));
    }
}

/// The records the outcome marks as failed, in their original order.
///
/// `None` when the outcome cannot be matched to the batch by position, or
/// reports failures without flagging any record.
fn failures(batch: &[Record], outcome: &BatchOutcome) -> Option<Vec<Record>> {
    if outcome.entries.len() != batch.len() {
        return None;
    }

    let failed: Vec<Record> = batch
        .iter()
        .zip(&outcome.entries)
        .filter(|(_, entry)| entry.is_failed())
        .map(|(record, _)| record.clone())
        .collect();

    if failed.is_empty() { None } else { Some(failed) }
}
