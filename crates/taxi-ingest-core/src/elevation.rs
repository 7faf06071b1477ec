use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// Elevation in meters per grid cell, indexed by cell id.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationTable {
    values: Vec<f64>,
}

impl ElevationTable {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn flat(elevation: f64, cells: usize) -> Self {
        Self::new(vec![elevation; cells])
    }

    /// Reads comma or whitespace separated floats, one per cell in cell-id order.
    pub fn parse(text: &str) -> Result<Self> {
        let values = text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .enumerate()
            .map(|(idx, token)| {
                token
                    .parse::<f64>()
                    .with_context(|| format!("invalid elevation `{token}` for cell {idx}"))
            })
            .collect::<Result<Vec<_>>>()?;

        if values.is_empty() {
            return Err(anyhow!("elevation table is empty"));
        }
        Ok(Self::new(values))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read elevation table {}", path.as_ref().display())
        })?;
        Self::parse(&text)
            .with_context(|| format!("failed to parse elevation table {}", path.as_ref().display()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, cell: u64) -> Option<f64> {
        usize::try_from(cell)
            .ok()
            .and_then(|idx| self.values.get(idx).copied())
    }
}
