use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use taxi_config::{AppConfig, IngestMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Both,
    Documents,
    Bitmap,
}

impl From<ModeArg> for IngestMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Both => IngestMode::Both,
            ModeArg::Documents => IngestMode::Documents,
            ModeArg::Bitmap => IngestMode::Bitmap,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "taxi-ingest",
    about = "Load taxi trip CSVs into a document store and a bitmap index"
)]
pub struct CliArgs {
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
    #[arg(long, value_name = "N")]
    pub write_workers: Option<usize>,
    /// URLs, files or glob patterns; replaces `ingest.sources` when given.
    #[arg(value_name = "SOURCE")]
    pub sources: Vec<String>,
}

impl CliArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(mode) = self.mode {
            config.ingest.mode = mode.into();
        }
        if let Some(workers) = self.write_workers {
            config.ingest.write_workers = workers;
        }
        if !self.sources.is_empty() {
            config.ingest.sources = self.sources.clone();
        }
    }
}

pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}
