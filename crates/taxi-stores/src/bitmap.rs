use crate::{send_text, with_content_type};
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode, Url};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taxi_config::BitmapStoreConfig;
use tracing::debug;

/// One buffered `SetBit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetBit {
    pub row_id: u64,
    pub column_id: u64,
    pub frame: String,
}

/// Set-bit calls shipped together as one PQL query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBatch {
    bits: Vec<SetBit>,
}

impl BitBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row_id: u64, column_id: u64, frame: &str) {
        self.bits.push(SetBit {
            row_id,
            column_id,
            frame: frame.to_string(),
        });
    }

    pub fn bits(&self) -> &[SetBit] {
        &self.bits
    }

    /// Column id of every call, in buffer order.
    pub fn columns(&self) -> impl Iterator<Item = u64> + '_ {
        self.bits.iter().map(|bit| bit.column_id)
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn to_pql(&self) -> String {
        self.bits
            .iter()
            .map(|bit| {
                format!(
                    "SetBit(frame=\"{}\", rowID={}, columnID={})",
                    bit.frame, bit.row_id, bit.column_id
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Bitmap index client that buffers `SetBit` calls and hands back a full batch
/// once `buffer_size` calls are pending. Shipping a batch is a separate call, so
/// a failed batch never re-enters the buffer.
#[derive(Clone)]
pub struct BitmapStoreClient {
    cfg: BitmapStoreConfig,
    http: Client,
    pending: Arc<Mutex<BitBatch>>,
}

impl BitmapStoreClient {
    pub fn new(cfg: BitmapStoreConfig) -> Result<Self> {
        let timeout = Duration::try_from_secs_f64(cfg.timeout_seconds.max(1.0))
            .context("invalid bitmap store timeout")?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to construct reqwest client")?;

        Ok(Self {
            cfg,
            http,
            pending: Arc::new(Mutex::new(BitBatch::new())),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        let base = Url::parse(&self.cfg.url).context("invalid bitmap store URL")?;
        base.join(path).context("invalid bitmap store path")
    }

    /// Creates the index and every frame, tolerating ones that already exist.
    pub async fn ensure_schema(&self, frames: &[&str]) -> Result<()> {
        self.create_if_missing(&format!("index/{}", self.cfg.index))
            .await?;
        for frame in frames {
            self.create_if_missing(&format!("index/{}/frame/{}", self.cfg.index, frame))
                .await?;
        }
        Ok(())
    }

    async fn create_if_missing(&self, path: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(path)?)
            .body("{}")
            .send()
            .await
            .with_context(|| format!("bitmap store request failed for {path}"))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(anyhow::anyhow!(
            "bitmap store returned {} creating {}: {}",
            status,
            path,
            text.trim()
        ))
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().expect("bitmap pending mutex poisoned").len()
    }

    /// Buffers one bit; returns the whole buffer once it reaches `buffer_size`.
    pub fn set_bit(&self, row_id: u64, column_id: u64, frame: &str) -> Option<BitBatch> {
        let mut pending = self.pending.lock().expect("bitmap pending mutex poisoned");
        pending.push(row_id, column_id, frame);
        if pending.len() >= self.cfg.buffer_size.max(1) {
            Some(std::mem::take(&mut *pending))
        } else {
            None
        }
    }

    /// Empties the buffer; `None` when nothing is pending.
    pub fn take_batch(&self) -> Option<BitBatch> {
        let mut pending = self.pending.lock().expect("bitmap pending mutex poisoned");
        if pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut *pending))
    }

    pub async fn ship(&self, batch: &BitBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let req = with_content_type(
            self.http
                .post(self.url(&format!("index/{}/query", self.cfg.index))?),
            "text/plain; charset=utf-8",
        )
        .body(batch.to_pql());

        send_text(req, "bitmap store").await?;
        debug!("bitmap store accepted {} set-bit calls", batch.len());
        Ok(())
    }
}
