mod cli;

use anyhow::{Context, Result};
use taxi_config::AppConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = cli::parse_args();
    let explicit = args.config.is_some();
    let config_path = taxi_config::resolve_config_path(args.config.clone());

    let mut config = if explicit || config_path.exists() {
        taxi_config::load_config(&config_path)
            .with_context(|| format!("failed to load config {}", config_path.display()))?
    } else {
        info!(
            "config {} not found; using built-in defaults",
            config_path.display()
        );
        AppConfig::default()
    };
    args.apply(&mut config);

    let summary = taxi_ingest_core::run_ingestor(config).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("failed to serialize summary")?
    );
    Ok(())
}
