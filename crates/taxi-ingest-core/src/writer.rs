use crate::bitmap::BitAssignment;
use crate::document::Ride;
use crate::metrics::{Outcome, OutcomeCounters};
use crate::sink::{BitBatch, BitmapSink, DocumentSink};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taxi_config::RetryConfig;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub unit_delay: Duration,
    pub overload_markers: Vec<String>,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            unit_delay: Duration::from_millis(cfg.unit_delay_ms),
            overload_markers: cfg
                .overload_markers
                .iter()
                .filter(|marker| !marker.is_empty())
                .cloned()
                .collect(),
        }
    }

    /// Wait after the `attempt`-th overloaded call (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.unit_delay * attempt
    }

    pub fn is_overload(&self, err: &anyhow::Error) -> bool {
        let text = format!("{err:#}");
        self.overload_markers
            .iter()
            .any(|marker| text.contains(marker.as_str()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("store still overloaded after {attempts} attempts: {last:#}")]
    Exhausted { attempts: u32, last: anyhow::Error },
    #[error("store rejected write on attempt {attempt}: {cause:#}")]
    Rejected { attempt: u32, cause: anyhow::Error },
}

impl WriteError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Rejected { attempt, .. } => *attempt,
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-overload error, or the
/// overload budget is spent. Returns the number of attempts made.
pub async fn retry_write<F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<u32, WriteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(()) => return Ok(attempt),
            Err(exc) if policy.is_overload(&exc) => {
                if attempt >= policy.max_attempts {
                    return Err(WriteError::Exhausted {
                        attempts: attempt,
                        last: exc,
                    });
                }
                let wait = policy.backoff(attempt);
                debug!(
                    "store overloaded on attempt {attempt}/{}; retrying in {}ms",
                    policy.max_attempts,
                    wait.as_millis()
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(exc) => {
                return Err(WriteError::Rejected {
                    attempt,
                    cause: exc,
                })
            }
        }
    }
}

#[derive(Debug)]
struct PendingRecord {
    outstanding: usize,
    failed: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Settled {
    written: u64,
    failed: Vec<u64>,
}

/// Records whose bits were handed to the bitmap sink but whose batches have
/// not all been acknowledged yet, keyed by sequence id.
#[derive(Debug, Default)]
struct AckLedger {
    records: Mutex<HashMap<u64, PendingRecord>>,
}

impl AckLedger {
    fn expect(&self, sequence_id: u64, bits: usize) {
        self.records
            .lock()
            .expect("ack ledger mutex poisoned")
            .insert(
                sequence_id,
                PendingRecord {
                    outstanding: bits,
                    failed: false,
                },
            );
    }

    /// Settles one outstanding bit per call in `batch`. A record is written when
    /// its last bit is acknowledged and fails on its first rejected bit.
    fn settle(&self, batch: &BitBatch, accepted: bool) -> Settled {
        let mut records = self.records.lock().expect("ack ledger mutex poisoned");
        let mut settled = Settled::default();
        for column in batch.columns() {
            let Some(record) = records.get_mut(&column) else {
                continue;
            };
            if !accepted && !record.failed {
                record.failed = true;
                settled.failed.push(column);
            }
            record.outstanding = record.outstanding.saturating_sub(1);
            if record.outstanding == 0 {
                if let Some(done) = records.remove(&column) {
                    if !done.failed {
                        settled.written += 1;
                    }
                }
            }
        }
        settled
    }

    /// Drops every unsettled record; returns the ones not already failed.
    fn abandon(&self) -> Vec<u64> {
        let mut records = self.records.lock().expect("ack ledger mutex poisoned");
        let mut ids: Vec<u64> = records
            .drain()
            .filter(|(_, record)| !record.failed)
            .map(|(id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

fn describe_ids(ids: &[u64]) -> String {
    match (ids.iter().min(), ids.iter().max()) {
        (Some(lo), Some(hi)) if lo == hi => format!("sequence_id={lo}"),
        (Some(lo), Some(hi)) => format!("sequence_ids {lo}..={hi}"),
        _ => "no records".to_string(),
    }
}

/// Writes encoded records to whichever sinks are enabled, retrying overloads.
/// Counts each record once: written after every sink acknowledged it, or a
/// write failure on the first terminal error.
#[derive(Clone)]
pub struct RetryingWriter {
    documents: Option<Arc<dyn DocumentSink>>,
    bitmap: Option<Arc<dyn BitmapSink>>,
    policy: RetryPolicy,
    counters: Arc<OutcomeCounters>,
    ledger: Arc<AckLedger>,
}

impl RetryingWriter {
    pub fn new(
        documents: Option<Arc<dyn DocumentSink>>,
        bitmap: Option<Arc<dyn BitmapSink>>,
        policy: RetryPolicy,
        counters: Arc<OutcomeCounters>,
    ) -> Self {
        Self {
            documents,
            bitmap,
            policy,
            counters,
            ledger: Arc::new(AckLedger::default()),
        }
    }

    fn tally(&self, result: Result<u32, WriteError>) -> Result<(), WriteError> {
        let attempts = match &result {
            Ok(attempts) => *attempts,
            Err(exc) => exc.attempts(),
        };
        self.counters
            .add_write_retries(u64::from(attempts.saturating_sub(1)));
        result.map(|_| ())
    }

    async fn write_document(&self, ride: &Ride) -> Result<(), WriteError> {
        let Some(sink) = &self.documents else {
            return Ok(());
        };
        self.tally(retry_write(&self.policy, || sink.insert_document(ride)).await)
    }

    /// Document first, then every bit. Bits that only reach the buffer settle
    /// when a later batch holding them ships, or at `flush`.
    pub async fn write_record(
        &self,
        sequence_id: u64,
        ride: Option<&Ride>,
        bits: &[BitAssignment],
    ) {
        if let Some(ride) = ride {
            if let Err(exc) = self.write_document(ride).await {
                self.counters.incr(Outcome::WriteFailure);
                warn!("document write failed for sequence_id={sequence_id}: {exc}");
                return;
            }
        }

        let sink = match &self.bitmap {
            Some(sink) if !bits.is_empty() => sink,
            _ => {
                self.counters.incr(Outcome::Written);
                return;
            }
        };

        self.ledger.expect(sequence_id, bits.len());
        for bit in bits {
            if let Some(batch) = sink.set_bit(bit.category, bit.sequence_id, &bit.dimension) {
                self.ship(sink.as_ref(), batch).await;
            }
        }
    }

    async fn ship(&self, sink: &dyn BitmapSink, batch: BitBatch) {
        let result = self.tally(retry_write(&self.policy, || sink.ship(&batch)).await);
        let settled = self.ledger.settle(&batch, result.is_ok());
        self.counters.add(Outcome::Written, settled.written);

        match result {
            Ok(()) => {
                self.counters
                    .bits_set
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
            Err(exc) => {
                self.counters
                    .add(Outcome::WriteFailure, settled.failed.len() as u64);
                warn!(
                    "bitmap batch of {} set-bit calls dropped; {} records failed ({}): {exc}",
                    batch.len(),
                    settled.failed.len(),
                    describe_ids(&settled.failed)
                );
            }
        }
    }

    /// Ships the rest of the bitmap buffer. Any record still unsettled afterwards
    /// lost bits inside the sink and counts as a write failure.
    pub async fn flush(&self) {
        let Some(sink) = &self.bitmap else {
            return;
        };
        if let Some(batch) = sink.take_batch() {
            self.ship(sink.as_ref(), batch).await;
        }

        let orphaned = self.ledger.abandon();
        if !orphaned.is_empty() {
            self.counters
                .add(Outcome::WriteFailure, orphaned.len() as u64);
            warn!(
                "{} records still had unshipped bits after the final flush ({})",
                orphaned.len(),
                describe_ids(&orphaned)
            );
        }
    }
}
