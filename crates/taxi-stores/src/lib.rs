//! Thin HTTP clients for the two ride stores.
//!
//! Neither client retries. Errors carry the HTTP status line and response body
//! verbatim so callers can recognise overload signals in the text.

mod bitmap;
mod document;

pub use bitmap::{BitBatch, BitmapStoreClient, SetBit};
pub use document::DocumentStoreClient;

use anyhow::{anyhow, Context, Result};
use reqwest::{header::CONTENT_TYPE, RequestBuilder};

pub(crate) async fn send_text(req: RequestBuilder, store: &str) -> Result<String> {
    let response = req
        .send()
        .await
        .with_context(|| format!("{store} request failed"))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("failed to read {store} response body (status {status})"))?;

    if !status.is_success() {
        return Err(anyhow!("{store} returned {}: {}", status, text.trim()));
    }

    Ok(text)
}

pub(crate) fn with_content_type(req: RequestBuilder, content_type: &'static str) -> RequestBuilder {
    req.header(CONTENT_TYPE, content_type)
}
