use crate::{send_text, with_content_type};
use anyhow::{Context, Result};
use reqwest::{header::AUTHORIZATION, Client, Url};
use serde::Serialize;
use std::time::Duration;
use taxi_config::DocumentStoreConfig;

#[derive(Clone)]
pub struct DocumentStoreClient {
    cfg: DocumentStoreConfig,
    http: Client,
}

impl DocumentStoreClient {
    pub fn new(cfg: DocumentStoreConfig) -> Result<Self> {
        let timeout = Duration::try_from_secs_f64(cfg.timeout_seconds.max(1.0))
            .context("invalid document store timeout")?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to construct reqwest client")?;

        Ok(Self { cfg, http })
    }

    fn docs_url(&self) -> Result<Url> {
        let base = Url::parse(&self.cfg.url).context("invalid document store URL")?;
        base.join(&format!(
            "dbs/{}/colls/{}/docs",
            self.cfg.database, self.cfg.collection
        ))
        .context("invalid document store collection path")
    }

    /// Inserts one JSON document into the configured collection.
    pub async fn insert_document<T: Serialize + ?Sized>(&self, doc: &T) -> Result<()> {
        let body = serde_json::to_vec(doc).context("failed to encode document")?;
        let mut req = with_content_type(self.http.post(self.docs_url()?), "application/json")
            .body(body);

        if !self.cfg.api_key.is_empty() {
            req = req.header(AUTHORIZATION, self.cfg.api_key.clone());
        }

        send_text(req, "document store").await?;
        Ok(())
    }
}
