use crate::bitmap::{BitAssignment, BitmapEncoder, Rejection};
use crate::document::{DocumentEncoder, Ride};
use crate::fetch::fetch_source;
use crate::metrics::{CounterSnapshot, Outcome, OutcomeCounters, SequenceAllocator};
use crate::monitor::{log_snapshot, spawn_monitor_task, throughput};
use crate::record::{ParsedRecord, RawRecord};
use crate::schema::{RecordVariant, SchemaRegistry};
use crate::writer::RetryingWriter;
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use taxi_config::IngestConfig;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Read-only encoding state shared by every encode worker, plus the counters
/// and the sequence allocator.
pub struct EncodeContext {
    registry: SchemaRegistry,
    bitmap: Option<BitmapEncoder>,
    documents: Option<DocumentEncoder>,
    counters: Arc<OutcomeCounters>,
    sequence: Arc<SequenceAllocator>,
}

impl EncodeContext {
    pub fn new(
        registry: SchemaRegistry,
        bitmap: Option<BitmapEncoder>,
        documents: Option<DocumentEncoder>,
        counters: Arc<OutcomeCounters>,
        sequence: Arc<SequenceAllocator>,
    ) -> Self {
        Self {
            registry,
            bitmap,
            documents,
            counters,
            sequence,
        }
    }
}

/// Everything one record produced, keyed by a single sequence id.
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    pub sequence_id: u64,
    pub bits: Vec<BitAssignment>,
    pub ride: Option<Ride>,
}

fn reject(ctx: &EncodeContext, raw: &RawRecord, rejection: &Rejection) {
    ctx.counters.incr(Outcome::Skipped);
    if let Some(outcome) = rejection.outcome() {
        ctx.counters.incr(outcome);
    }

    match rejection {
        Rejection::Parse { source, .. } if source.is_malformed() => {
            debug!("skipping {} record: {rejection}", raw.variant.as_str());
        }
        Rejection::Map {
            outcome: Outcome::Unclassified,
            ..
        } => {
            debug!(
                "skipping {} record: {rejection}; line={}",
                raw.variant.as_str(),
                raw.line
            );
        }
        _ => {}
    }
}

/// Parses and encodes one raw record; `None` when it was skipped. A sequence id
/// is taken only after every enabled encoder succeeded.
pub fn process_record(ctx: &EncodeContext, raw: &RawRecord) -> Option<EncodedUnit> {
    if raw.variant == RecordVariant::Unknown {
        ctx.counters.incr(Outcome::UnknownType);
        ctx.counters.incr(Outcome::Skipped);
        return None;
    }

    let record = match ParsedRecord::new(&ctx.registry, raw) {
        Ok(record) => record,
        Err(exc) => {
            reject(ctx, raw, &exc.into());
            return None;
        }
    };

    let bits = match &ctx.bitmap {
        Some(encoder) => match encoder.encode(&record) {
            Ok(bits) => Some(bits),
            Err(rejection) => {
                reject(ctx, raw, &rejection);
                return None;
            }
        },
        None => None,
    };

    let ride = match &ctx.documents {
        Some(encoder) => match encoder.encode(&record) {
            Ok(ride) => Some(ride),
            Err(rejection) => {
                reject(ctx, raw, &rejection);
                return None;
            }
        },
        None => None,
    };

    let sequence_id = ctx.sequence.next();
    Some(EncodedUnit {
        sequence_id,
        bits: bits.map(|bits| bits.stamp(sequence_id)).unwrap_or_default(),
        ride: ride.map(|ride| ride.correlate(sequence_id)),
    })
}

pub struct Pipeline {
    settings: IngestConfig,
    http: Client,
    encode: Arc<EncodeContext>,
    writer: RetryingWriter,
}

impl Pipeline {
    pub fn new(
        settings: IngestConfig,
        http: Client,
        encode: EncodeContext,
        writer: RetryingWriter,
    ) -> Self {
        Self {
            settings,
            http,
            encode: Arc::new(encode),
            writer,
        }
    }

    fn counters(&self) -> Arc<OutcomeCounters> {
        self.encode.counters.clone()
    }

    /// Runs fetch, encode and write stages until every source is drained, then
    /// flushes the bitmap buffer and returns the final counters. Records lost in
    /// the final flush are counted as write failures, not returned as an error.
    pub async fn run(self, sources: Vec<String>) -> Result<CounterSnapshot> {
        let counters = self.counters();
        let capacity = self.settings.channel_capacity.max(1);
        let write_permits =
            u32::try_from(self.settings.write_workers.max(1)).unwrap_or(u32::MAX);
        let started = Instant::now();

        info!(
            "ingesting {} sources with fetch_workers={} encode_workers={} write_workers={}",
            sources.len(),
            self.settings.fetch_workers.max(1),
            self.settings.encode_workers.max(1),
            write_permits
        );

        let (raw_tx, mut raw_rx) = mpsc::channel::<RawRecord>(capacity);
        let (unit_tx, mut unit_rx) = mpsc::channel::<EncodedUnit>(capacity);

        let monitor_handle =
            spawn_monitor_task(counters.clone(), self.settings.report_interval_seconds);

        let fetch_handle = {
            let sem = Arc::new(Semaphore::new(self.settings.fetch_workers.max(1)));
            let http = self.http.clone();
            let counters = counters.clone();
            let skip_header = self.settings.skip_header;

            tokio::spawn(async move {
                for locator in sources {
                    let permit = match sem.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let tx = raw_tx.clone();
                    let http = http.clone();
                    let counters = counters.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(exc) =
                            fetch_source(&http, &locator, skip_header, &tx, &counters).await
                        {
                            counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                            warn!("failed fetching {locator}: {exc:#}");
                        }
                    });
                }
            })
        };

        let encode_handle = {
            let sem = Arc::new(Semaphore::new(self.settings.encode_workers.max(1)));
            let ctx = self.encode.clone();

            tokio::spawn(async move {
                while let Some(raw) = raw_rx.recv().await {
                    let permit = match sem.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let ctx = ctx.clone();
                    let tx = unit_tx.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Some(unit) = process_record(&ctx, &raw) {
                            if tx.send(unit).await.is_err() {
                                debug!("write stage closed; dropping encoded record");
                            }
                        }
                    });
                }
            })
        };

        let write_handle = {
            let sem = Arc::new(Semaphore::new(write_permits as usize));
            let writer = self.writer.clone();

            tokio::spawn(async move {
                while let Some(unit) = unit_rx.recv().await {
                    let permit = match sem.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let writer = writer.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        writer
                            .write_record(unit.sequence_id, unit.ride.as_ref(), &unit.bits)
                            .await;
                    });
                }

                // In-flight writers hold the remaining permits.
                let _ = sem.acquire_many(write_permits).await;
            })
        };

        fetch_handle.await.context("fetch stage panicked")?;
        encode_handle.await.context("encode stage panicked")?;
        write_handle.await.context("write stage panicked")?;
        monitor_handle.abort();

        self.writer.flush().await;
        let snapshot = counters.snapshot();
        log_snapshot(
            "ingest complete",
            &snapshot,
            throughput(&CounterSnapshot::default(), &snapshot, started.elapsed()),
        );
        Ok(snapshot)
    }
}
