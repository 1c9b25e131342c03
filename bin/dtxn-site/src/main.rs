use std::collections::HashMap;
use std::env;
use std::fs;
use std::sync::Arc;

use dtxn_core::Site;
use dtxn_types::{DtxnConfig, PartitionId, ProcedureCatalog, SiteId};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn load_config(path: Option<&str>) -> DtxnConfig {
    let Some(path) = path else { return DtxnConfig::default() };
    match fs::read_to_string(path) {
        Ok(contents) => DtxnConfig::from_toml(&contents).unwrap_or_else(|err| {
            tracing::warn!(%err, %path, "failed to parse config, falling back to defaults");
            DtxnConfig::default()
        }),
        Err(err) => {
            tracing::warn!(%err, %path, "failed to read config, falling back to defaults");
            DtxnConfig::default()
        }
    }
}

fn parse_partitions(raw: &str) -> Vec<PartitionId> {
    raw.split(',').filter(|s| !s.is_empty()).filter_map(|s| s.parse().ok()).collect()
}

#[tokio::main]
async fn main() {
    init_tracing();

    let mut site_id: SiteId = 0;
    let mut partitions: Vec<PartitionId> = vec![0];
    let mut config_path: Option<String> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--site-id" => site_id = args.next().and_then(|v| v.parse().ok()).unwrap_or(site_id),
            "--partitions" => {
                if let Some(raw) = args.next() {
                    partitions = parse_partitions(&raw);
                }
            }
            "--config" => config_path = args.next(),
            other => tracing::warn!(arg = other, "unrecognized argument, ignoring"),
        }
    }

    let config = load_config(config_path.as_deref());
    let catalog = Arc::new(ProcedureCatalog::build(HashMap::new(), vec![]));
    let site = Site::new(site_id, partitions.clone(), config, catalog);

    tracing::info!(site_id, ?partitions, "dtxn site started");

    let _site = site;
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    tracing::info!("shutdown signal received");
}
