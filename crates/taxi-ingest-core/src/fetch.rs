use crate::metrics::OutcomeCounters;
use crate::record::RawRecord;
use crate::schema::RecordVariant;
use anyhow::{Context, Result};
use glob::glob;
use reqwest::Client;
use std::path::Path;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

/// Variant implied by the file name of a locator: `green…` or `yellow…`.
pub fn variant_for_locator(locator: &str) -> RecordVariant {
    let trimmed = locator.split(['?', '#']).next().unwrap_or(locator);
    let name = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .to_ascii_lowercase();
    if name.contains("green") {
        RecordVariant::Green
    } else if name.contains("yellow") {
        RecordVariant::Yellow
    } else {
        RecordVariant::Unknown
    }
}

/// Expands local glob patterns; URLs and patterns with no match pass through
/// unchanged so the fetch stage reports them.
pub fn expand_sources(sources: &[String]) -> Result<Vec<String>> {
    let mut expanded = Vec::new();
    for source in sources {
        let source = source.trim();
        if source.is_empty() {
            continue;
        }
        if is_remote(source) {
            expanded.push(source.to_string());
            continue;
        }

        let mut matches = Vec::new();
        for entry in glob(source).with_context(|| format!("invalid glob: {source}"))? {
            match entry {
                Ok(path) if path.is_file() => matches.push(path.to_string_lossy().to_string()),
                Ok(_) => {}
                Err(exc) => warn!("glob iteration error: {exc}"),
            }
        }
        if matches.is_empty() {
            expanded.push(source.to_string());
        } else {
            matches.sort();
            expanded.extend(matches);
        }
    }
    Ok(expanded)
}

struct LineEmitter<'a> {
    variant: RecordVariant,
    skip_header: bool,
    seen: u64,
    tx: &'a mpsc::Sender<RawRecord>,
    counters: &'a OutcomeCounters,
}

impl LineEmitter<'_> {
    /// Returns `false` once the receiver is gone.
    async fn emit(&mut self, bytes: &[u8]) -> bool {
        self.seen += 1;
        if self.skip_header && self.seen == 1 {
            return true;
        }

        let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        let line = String::from_utf8_lossy(bytes).into_owned();
        self.counters.lines_fetched.fetch_add(1, Ordering::Relaxed);
        self.tx.send(RawRecord::new(self.variant, line)).await.is_ok()
    }

    fn emitted(&self) -> u64 {
        if self.skip_header {
            self.seen.saturating_sub(1)
        } else {
            self.seen
        }
    }
}

/// Streams every line of one source into `tx`, tagged with the source's variant.
/// Returns the number of lines sent.
pub async fn fetch_source(
    http: &Client,
    locator: &str,
    skip_header: bool,
    tx: &mpsc::Sender<RawRecord>,
    counters: &OutcomeCounters,
) -> Result<u64> {
    let mut emitter = LineEmitter {
        variant: variant_for_locator(locator),
        skip_header,
        seen: 0,
        tx,
        counters,
    };

    if is_remote(locator) {
        fetch_remote(http, locator, &mut emitter).await?;
    } else {
        fetch_local(Path::new(locator), &mut emitter).await?;
    }

    debug!(
        "fetched {} lines from {} as {}",
        emitter.emitted(),
        locator,
        emitter.variant.as_str()
    );
    Ok(emitter.emitted())
}

async fn fetch_remote(http: &Client, url: &str, emitter: &mut LineEmitter<'_>) -> Result<()> {
    let mut response = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to request {url}"))?
        .error_for_status()
        .with_context(|| format!("source {url} returned an error status"))?;

    let mut pending = Vec::<u8>::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .with_context(|| format!("failed reading body of {url}"))?
    {
        pending.extend_from_slice(&chunk);
        let mut start = 0;
        while let Some(pos) = pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos + 1;
            if !emitter.emit(&pending[start..end]).await {
                return Ok(());
            }
            start = end;
        }
        pending.drain(..start);
    }

    if !pending.is_empty() {
        emitter.emit(&pending).await;
    }
    Ok(())
}

async fn fetch_local(path: &Path, emitter: &mut LineEmitter<'_>) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::<u8>::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .with_context(|| format!("failed reading {}", path.display()))?;
        if read == 0 || !emitter.emit(&buf).await {
            return Ok(());
        }
    }
}
