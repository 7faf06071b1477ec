pub mod bitmap;
pub mod document;
pub mod elevation;
pub mod fetch;
pub mod mapper;
pub mod metrics;
mod monitor;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod sink;
pub mod writer;

use crate::bitmap::{BitmapEncoder, NYC_GRID};
use crate::document::DocumentEncoder;
use crate::elevation::ElevationTable;
use crate::fetch::expand_sources;
use crate::metrics::{CounterSnapshot, OutcomeCounters, SequenceAllocator};
use crate::pipeline::{EncodeContext, Pipeline};
use crate::schema::SchemaRegistry;
use crate::sink::{BitmapSink, DocumentSink};
use crate::writer::{RetryPolicy, RetryingWriter};
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use taxi_config::{AppConfig, CatalogConfig};
use taxi_stores::{BitmapStoreClient, DocumentStoreClient};
use tracing::{info, warn};

fn load_elevations(catalog: &CatalogConfig) -> Result<ElevationTable> {
    let cells = NYC_GRID.cells() as usize;
    if catalog.elevation_table.trim().is_empty() {
        warn!("no catalog.elevation_table configured; using a flat sea-level table");
        return Ok(ElevationTable::flat(0.0, cells));
    }

    let table = ElevationTable::load(&catalog.elevation_table)?;
    if table.len() < cells {
        warn!(
            "elevation table {} covers {} of {} grid cells; the rest are unclassified",
            catalog.elevation_table,
            table.len(),
            cells
        );
    }
    Ok(table)
}

pub async fn run_ingestor(config: AppConfig) -> Result<CounterSnapshot> {
    let sources = expand_sources(&config.ingest.sources)?;
    if sources.is_empty() {
        return Err(anyhow::anyhow!(
            "no ingest sources found in config.ingest.sources"
        ));
    }

    let mode = config.ingest.mode;
    let registry = SchemaRegistry::standard();
    let counters = Arc::new(OutcomeCounters::new());
    let sequence = Arc::new(SequenceAllocator::new(config.ingest.first_sequence_id));

    let bitmap_encoder = if mode.writes_bitmap() {
        let elevations = Arc::new(load_elevations(&config.catalog)?);
        Some(
            BitmapEncoder::standard(&registry, elevations)
                .context("invalid bitmap dimension catalog")?,
        )
    } else {
        None
    };

    let bitmap_sink: Option<Arc<dyn BitmapSink>> = match &bitmap_encoder {
        Some(encoder) => {
            let client = BitmapStoreClient::new(config.bitmap_store.clone())?;
            client
                .ensure_schema(&encoder.dimension_names())
                .await
                .context("failed to create bitmap index schema")?;
            info!(
                "bitmap store ready: index={} frames={}",
                config.bitmap_store.index,
                encoder.dimension_names().len()
            );
            let sink: Arc<dyn BitmapSink> = Arc::new(client);
            Some(sink)
        }
        None => None,
    };

    let (document_encoder, document_sink) = if mode.writes_documents() {
        let client = DocumentStoreClient::new(config.document_store.clone())?;
        let sink: Arc<dyn DocumentSink> = Arc::new(client);
        (Some(DocumentEncoder::new()), Some(sink))
    } else {
        (None, None)
    };

    let writer = RetryingWriter::new(
        document_sink,
        bitmap_sink,
        RetryPolicy::from_config(&config.retry),
        counters.clone(),
    );
    let encode = EncodeContext::new(
        registry,
        bitmap_encoder,
        document_encoder,
        counters,
        sequence,
    );
    let http = Client::builder()
        .build()
        .context("failed to construct reqwest client")?;

    Pipeline::new(config.ingest.clone(), http, encode, writer)
        .run(sources)
        .await
}
