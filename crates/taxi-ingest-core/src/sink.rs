use crate::document::Ride;
use anyhow::Result;
use async_trait::async_trait;
use taxi_stores::{BitmapStoreClient, DocumentStoreClient};

pub use taxi_stores::BitBatch;

#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn insert_document(&self, ride: &Ride) -> Result<()>;
}

/// Buffers set-bit calls and ships them in batches. The writer owns a batch
/// once it leaves the buffer, so a retried or failed batch is never re-buffered.
#[async_trait]
pub trait BitmapSink: Send + Sync {
    /// Buffers one bit; returns the buffered batch once it is full.
    fn set_bit(&self, row_id: u64, column_id: u64, frame: &str) -> Option<BitBatch>;

    /// Whatever is still buffered.
    fn take_batch(&self) -> Option<BitBatch>;

    async fn ship(&self, batch: &BitBatch) -> Result<()>;
}

#[async_trait]
impl DocumentSink for DocumentStoreClient {
    async fn insert_document(&self, ride: &Ride) -> Result<()> {
        DocumentStoreClient::insert_document(self, ride).await
    }
}

#[async_trait]
impl BitmapSink for BitmapStoreClient {
    fn set_bit(&self, row_id: u64, column_id: u64, frame: &str) -> Option<BitBatch> {
        BitmapStoreClient::set_bit(self, row_id, column_id, frame)
    }

    fn take_batch(&self) -> Option<BitBatch> {
        BitmapStoreClient::take_batch(self)
    }

    async fn ship(&self, batch: &BitBatch) -> Result<()> {
        BitmapStoreClient::ship(self, batch).await
    }
}
