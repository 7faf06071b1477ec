use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taxi_config::IngestConfig;
use taxi_ingest_core::bitmap::{BitmapEncoder, NYC_GRID};
use taxi_ingest_core::document::{DocumentEncoder, Ride};
use taxi_ingest_core::elevation::ElevationTable;
use taxi_ingest_core::metrics::{CounterSnapshot, OutcomeCounters, SequenceAllocator};
use taxi_ingest_core::pipeline::{process_record, EncodeContext, Pipeline};
use taxi_ingest_core::record::RawRecord;
use taxi_ingest_core::schema::{RecordVariant, SchemaRegistry};
use taxi_ingest_core::sink::{BitBatch, BitmapSink, DocumentSink};
use taxi_ingest_core::writer::{RetryPolicy, RetryingWriter};

const GREEN_LINE: &str = "2,2016-01-01 00:00:00,2016-01-01 00:30:00,N,1,-73.95,40.72,-73.90,40.75,1,5.0,19.5,0.5,0.5,3.0,0,,23.5,1";
const YELLOW_LINE: &str = "1,2016-01-01 00:00:00,2016-01-01 00:30:00,2,5.0,-73.95,40.72,1,N,-73.90,40.75,1,19.5,0.5,0.5,3.0,0,0.3,23.8";
const GREEN_HEADER: &str = "VendorID,lpep_pickup_datetime,Lpep_dropoff_datetime,Store_and_fwd_flag,RateCodeID,Pickup_longitude,Pickup_latitude,Dropoff_longitude,Dropoff_latitude,Passenger_count,Trip_distance,Fare_amount,Extra,MTA_tax,Tip_amount,Tolls_amount,Ehail_fee,Total_amount,Payment_type";
const YELLOW_HEADER: &str = "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,pickup_longitude,pickup_latitude,RatecodeID,store_and_fwd_flag,dropoff_longitude,dropoff_latitude,payment_type,fare_amount,extra,mta_tax,tip_amount,tolls_amount,improvement_surcharge,total_amount";

fn context(
    bitmap: bool,
    documents: bool,
    counters: Arc<OutcomeCounters>,
    first_sequence_id: u64,
) -> EncodeContext {
    let registry = SchemaRegistry::standard();
    let encoder = bitmap.then(|| {
        let table = Arc::new(ElevationTable::flat(0.0, NYC_GRID.cells() as usize));
        BitmapEncoder::standard(&registry, table).expect("standard catalog")
    });
    EncodeContext::new(
        registry,
        encoder,
        documents.then(DocumentEncoder::new),
        counters,
        Arc::new(SequenceAllocator::new(first_sequence_id)),
    )
}

#[derive(Default)]
struct MemoryDocuments {
    rides: Mutex<Vec<Ride>>,
    reject_vendor: Option<String>,
}

#[async_trait]
impl DocumentSink for MemoryDocuments {
    async fn insert_document(&self, ride: &Ride) -> Result<()> {
        if self.reject_vendor.as_deref() == Some(ride.vendor_id.as_str()) {
            return Err(anyhow!("document store returned 400 Bad Request: invalid vendor"));
        }
        self.rides.lock().expect("rides lock").push(ride.clone());
        Ok(())
    }
}

/// Buffers up to `capacity` bits per batch and rejects the first `outages` batches.
struct MemoryBitmap {
    capacity: usize,
    outages: AtomicU32,
    buffer: Mutex<BitBatch>,
    bits: Mutex<Vec<(u64, u64, String)>>,
    ships: AtomicU32,
}

impl MemoryBitmap {
    fn new(capacity: usize, outages: u32) -> Self {
        Self {
            capacity,
            outages: AtomicU32::new(outages),
            buffer: Mutex::new(BitBatch::new()),
            bits: Mutex::new(Vec::new()),
            ships: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl BitmapSink for MemoryBitmap {
    fn set_bit(&self, row_id: u64, column_id: u64, frame: &str) -> Option<BitBatch> {
        let mut buffer = self.buffer.lock().expect("buffer lock");
        buffer.push(row_id, column_id, frame);
        (buffer.len() >= self.capacity).then(|| std::mem::take(&mut *buffer))
    }

    fn take_batch(&self) -> Option<BitBatch> {
        let mut buffer = self.buffer.lock().expect("buffer lock");
        (!buffer.is_empty()).then(|| std::mem::take(&mut *buffer))
    }

    async fn ship(&self, batch: &BitBatch) -> Result<()> {
        self.ships.fetch_add(1, Ordering::SeqCst);
        let outage = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if outage {
            return Err(anyhow!("bitmap store returned 503 Service Unavailable: unavailable"));
        }
        self.bits.lock().expect("bits lock").extend(
            batch
                .bits()
                .iter()
                .map(|bit| (bit.row_id, bit.column_id, bit.frame.clone())),
        );
        Ok(())
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "taxi-pipeline-{name}-{}",
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        unit_delay: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

#[test]
fn encoded_record_shares_one_sequence_id() {
    let counters = Arc::new(OutcomeCounters::new());
    let ctx = context(true, true, counters.clone(), 500);

    let unit = process_record(&ctx, &RawRecord::new(RecordVariant::Green, GREEN_LINE))
        .expect("green record encodes");
    assert_eq!(unit.sequence_id, 500);
    assert_eq!(unit.bits.len(), 20);
    assert!(unit.bits.iter().all(|bit| bit.sequence_id == 500));

    let ride = unit.ride.expect("document encoded");
    assert_eq!(ride.sequence_id, Some(500));
    assert_eq!(ride.duration_minutes, 30.0);
    assert_eq!(ride.speed_mph, 10.0);
    assert_eq!(counters.snapshot().skipped, 0);
}

#[test]
fn empty_required_field_skips_exactly_once() {
    let counters = Arc::new(OutcomeCounters::new());
    let ctx = context(true, true, counters.clone(), 0);
    let line = YELLOW_LINE.replace(",23.8", ",");

    assert!(process_record(&ctx, &RawRecord::new(RecordVariant::Yellow, line)).is_none());
    let snapshot = counters.snapshot();
    assert_eq!(snapshot.skipped, 1);
    assert_eq!(snapshot.unclassified, 0);
    assert_eq!(snapshot.out_of_range_fare, 0);

    let unit = process_record(&ctx, &RawRecord::new(RecordVariant::Yellow, YELLOW_LINE))
        .expect("next record encodes");
    assert_eq!(unit.sequence_id, 0, "skipped records must not consume ids");
}

#[test]
fn unknown_variant_counts_as_unknown_and_skipped() {
    let counters = Arc::new(OutcomeCounters::new());
    let ctx = context(true, true, counters.clone(), 0);

    assert!(process_record(&ctx, &RawRecord::tagged('f', YELLOW_LINE)).is_none());
    let snapshot = counters.snapshot();
    assert_eq!(snapshot.unknown_type, 1);
    assert_eq!(snapshot.skipped, 1);
}

#[test]
fn range_failure_counts_dimension_and_skip() {
    let counters = Arc::new(OutcomeCounters::new());
    let ctx = context(true, true, counters.clone(), 0);
    let line = GREEN_LINE.replace("-73.90,40.75", "0,0");

    assert!(process_record(&ctx, &RawRecord::new(RecordVariant::Green, line)).is_none());
    let snapshot = counters.snapshot();
    assert_eq!(snapshot.null_location, 1);
    assert_eq!(snapshot.skipped, 1);
}

#[test]
fn speed_and_distance_failures_count_their_dimension() {
    let counters = Arc::new(OutcomeCounters::new());
    let ctx = context(true, true, counters.clone(), 0);
    let instant = GREEN_LINE.replace("2016-01-01 00:30:00", "2016-01-01 00:00:00");
    let negative_distance = GREEN_LINE.replace(",1,5.0,", ",1,-1.0,");

    assert!(process_record(&ctx, &RawRecord::new(RecordVariant::Green, instant)).is_none());
    assert!(
        process_record(&ctx, &RawRecord::new(RecordVariant::Green, negative_distance)).is_none()
    );
    assert_eq!(
        counters.snapshot(),
        CounterSnapshot {
            skipped: 2,
            out_of_range_speed: 1,
            out_of_range_distance: 1,
            ..CounterSnapshot::default()
        }
    );

    let unit = process_record(&ctx, &RawRecord::new(RecordVariant::Green, GREEN_LINE))
        .expect("next record encodes");
    assert_eq!(unit.sequence_id, 0);
}

#[test]
fn malformed_cells_count_only_as_skipped() {
    let counters = Arc::new(OutcomeCounters::new());
    let ctx = context(true, true, counters.clone(), 0);
    let bad_number = YELLOW_LINE.replace(",2,5.0,", ",2,five,");
    let bad_date = YELLOW_LINE.replace("2016-01-01 00:00:00", "01/01/2016 00:00");

    assert!(process_record(&ctx, &RawRecord::new(RecordVariant::Yellow, bad_number)).is_none());
    assert!(process_record(&ctx, &RawRecord::new(RecordVariant::Yellow, bad_date)).is_none());
    assert_eq!(
        counters.snapshot(),
        CounterSnapshot {
            skipped: 2,
            ..CounterSnapshot::default()
        }
    );
}

#[test]
fn empty_line_is_skipped() {
    let counters = Arc::new(OutcomeCounters::new());
    let ctx = context(true, false, counters.clone(), 0);

    assert!(process_record(&ctx, &RawRecord::new(RecordVariant::Green, "")).is_none());
    assert_eq!(counters.snapshot().skipped, 1);
}

#[test]
fn grid_upper_edge_is_invalid_location() {
    let counters = Arc::new(OutcomeCounters::new());
    let ctx = context(true, false, counters.clone(), 0);
    let line = GREEN_LINE.replace("-73.95,40.72", "-73.69,40.93");

    for _ in 0..3 {
        assert!(process_record(&ctx, &RawRecord::new(RecordVariant::Green, line.clone())).is_none());
    }
    assert_eq!(counters.snapshot().invalid_location, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_encoding_issues_gapless_unique_ids() {
    let counters = Arc::new(OutcomeCounters::new());
    let ctx = Arc::new(context(true, false, counters, 0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                (0..250)
                    .map(|_| {
                        process_record(&ctx, &RawRecord::new(RecordVariant::Yellow, YELLOW_LINE))
                            .expect("record encodes")
                            .sequence_id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        for id in task.await.expect("encode task") {
            assert!(ids.insert(id), "duplicate sequence id {id}");
        }
    }
    assert_eq!(ids.len(), 2000);
    assert!((0..2000).all(|id| ids.contains(&id)));
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_drains_sources_into_sinks() {
    let dir = temp_dir("run");
    let green = dir.join("green_tripdata_2016-01.csv");
    let yellow = dir.join("yellow_tripdata_2016-01.csv");
    let other = dir.join("fhv_tripdata_2016-01.csv");
    std::fs::write(
        &green,
        format!("{GREEN_HEADER}\n{GREEN_LINE}\n{GREEN_LINE}\n\n"),
    )
    .expect("write green");
    std::fs::write(
        &yellow,
        format!(
            "{YELLOW_HEADER}\r\n{YELLOW_LINE}\r\n{}\r\n{}\r\n",
            YELLOW_LINE.replacen("1,", "7,", 1),
            YELLOW_LINE.replace(",2,5.0,", ",42,5.0,")
        ),
    )
    .expect("write yellow");
    std::fs::write(&other, format!("header\n{YELLOW_LINE}\n")).expect("write other");

    let counters = Arc::new(OutcomeCounters::new());
    let documents = Arc::new(MemoryDocuments {
        reject_vendor: Some("7".to_string()),
        ..MemoryDocuments::default()
    });
    let bitmap = Arc::new(MemoryBitmap::new(usize::MAX, 0));
    let writer = RetryingWriter::new(
        Some(documents.clone() as Arc<dyn DocumentSink>),
        Some(bitmap.clone() as Arc<dyn BitmapSink>),
        fast_policy(),
        counters.clone(),
    );
    let settings = IngestConfig {
        fetch_workers: 2,
        encode_workers: 3,
        write_workers: 4,
        channel_capacity: 2,
        report_interval_seconds: 60.0,
        ..IngestConfig::default()
    };
    let sources = vec![
        green.to_string_lossy().to_string(),
        yellow.to_string_lossy().to_string(),
        other.to_string_lossy().to_string(),
        dir.join("yellow_missing.csv").to_string_lossy().to_string(),
    ];

    let pipeline = Pipeline::new(
        settings,
        Client::new(),
        context(true, true, counters.clone(), 0),
        writer,
    );
    let snapshot = pipeline.run(sources).await.expect("pipeline runs");

    assert_eq!(snapshot.lines_fetched, 7);
    assert_eq!(snapshot.fetch_failures, 1);
    assert_eq!(snapshot.written, 3);
    assert_eq!(snapshot.write_failures, 1);
    assert_eq!(snapshot.out_of_range_passenger_count, 1);
    assert_eq!(snapshot.unknown_type, 1);
    assert_eq!(snapshot.skipped, 3);
    assert_eq!(snapshot.settled(), 7);

    let rides = documents.rides.lock().expect("rides lock");
    assert_eq!(rides.len(), 3);
    let bits = bitmap.bits.lock().expect("bits lock");
    assert_eq!(bits.len() as u64, snapshot.bits_set);
    let columns: HashSet<u64> = bits.iter().map(|(_, column, _)| *column).collect();
    assert_eq!(columns.len(), 3);
    for ride in rides.iter() {
        let sequence_id = ride.sequence_id.expect("correlated ride");
        assert!(columns.contains(&sequence_id));
        assert_eq!(
            bits.iter().filter(|(_, column, _)| *column == sequence_id).count(),
            20
        );
    }
    assert_eq!(bitmap.ships.load(Ordering::SeqCst), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_bitmap_batch_fails_only_its_records() {
    let dir = temp_dir("bitmap-outage");
    let yellow = dir.join("yellow_tripdata.csv");
    std::fs::write(
        &yellow,
        format!("{YELLOW_HEADER}\n{YELLOW_LINE}\n{YELLOW_LINE}\n{YELLOW_LINE}\n"),
    )
    .expect("write yellow");

    let counters = Arc::new(OutcomeCounters::new());
    let documents = Arc::new(MemoryDocuments::default());
    // One record's bits fill exactly one batch; the first batch is rejected.
    let bitmap = Arc::new(MemoryBitmap::new(20, 1));
    let writer = RetryingWriter::new(
        Some(documents.clone() as Arc<dyn DocumentSink>),
        Some(bitmap.clone() as Arc<dyn BitmapSink>),
        fast_policy(),
        counters.clone(),
    );
    let settings = IngestConfig {
        write_workers: 1,
        report_interval_seconds: 60.0,
        ..IngestConfig::default()
    };

    let snapshot = Pipeline::new(
        settings,
        Client::new(),
        context(true, true, counters.clone(), 0),
        writer,
    )
    .run(vec![yellow.to_string_lossy().to_string()])
    .await
    .expect("pipeline runs");

    assert_eq!(snapshot.written, 2);
    assert_eq!(snapshot.write_failures, 1);
    assert_eq!(snapshot.bits_set, 40);
    assert_eq!(snapshot.settled(), 3);
    assert_eq!(bitmap.ships.load(Ordering::SeqCst), 3);
    assert_eq!(bitmap.bits.lock().expect("bits lock").len(), 40);
    assert_eq!(documents.rides.lock().expect("rides lock").len(), 3);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn documents_only_mode_writes_no_bits() {
    let dir = temp_dir("docs-only");
    let yellow = dir.join("yellow_tripdata.csv");
    std::fs::write(&yellow, format!("{YELLOW_HEADER}\n{YELLOW_LINE}\n")).expect("write");

    let counters = Arc::new(OutcomeCounters::new());
    let documents = Arc::new(MemoryDocuments::default());
    let writer = RetryingWriter::new(
        Some(documents.clone() as Arc<dyn DocumentSink>),
        None,
        fast_policy(),
        counters.clone(),
    );
    let snapshot = Pipeline::new(
        IngestConfig::default(),
        Client::new(),
        context(false, true, counters.clone(), 0),
        writer,
    )
    .run(vec![yellow.to_string_lossy().to_string()])
    .await
    .expect("pipeline runs");

    assert_eq!(snapshot.written, 1);
    assert_eq!(snapshot.bits_set, 0);
    assert_eq!(documents.rides.lock().expect("rides lock").len(), 1);
    let _ = std::fs::remove_dir_all(dir);
}
