//! Create a chain, feed it requests and print the responses.

use super::engine::{json_rpc_engine, reject_invalid_spec};
use anyhow::{bail, Context, Result};
use chainbridge_core::{Bridge, BridgeConfig, ChainConfig};
use futures::StreamExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct RunOptions {
    pub database: Option<PathBuf>,
    pub requests: Vec<String>,
    pub disable_json_rpc: bool,
    pub max_pending: Option<u32>,
    pub wait_ms: u64,
}

pub async fn run_chain(config: BridgeConfig, spec_path: &Path, opts: RunOptions) -> Result<()> {
    let spec = read_spec(spec_path)?;
    let mut chain_config = ChainConfig::new(spec.clone());
    if let Some(path) = &opts.database {
        let database = fs::read_to_string(path)
            .with_context(|| format!("Failed to read database {}", path.display()))?;
        chain_config = chain_config.with_database(database);
    }
    if opts.disable_json_rpc {
        chain_config = chain_config.with_json_rpc_disabled();
    }
    if let Some(max) = opts.max_pending {
        chain_config = chain_config.with_max_pending_requests(max);
    }

    let engine = json_rpc_engine();
    reject_invalid_spec(&engine, &spec);
    let bridge = Bridge::new(Arc::new(engine), config)?;

    let result = exchange(&bridge, chain_config, &opts).await;
    bridge.shutdown().await?;
    result
}

async fn exchange(bridge: &Bridge, config: ChainConfig, opts: &RunOptions) -> Result<()> {
    let chain = bridge.create_chain(config).await?;
    info!(chain = %chain.id(), "chain ready");

    let mut responses = chain.responses();
    for request in &opts.requests {
        chain
            .send_request(request)
            .await
            .with_context(|| format!("Failed to send request {request}"))?;
    }

    let wait = Duration::from_millis(opts.wait_ms);
    for received in 0..opts.requests.len() {
        match tokio::time::timeout(wait, responses.next()).await {
            Ok(Some(response)) => println!("{response}"),
            Ok(None) => bail!("{} closed after {received} responses", chain.id()),
            Err(_) => bail!("timed out waiting for response {}", received + 1),
        }
    }
    debug!(responses = opts.requests.len(), "all responses received");

    chain.close().await?;
    Ok(())
}

pub(crate) fn read_spec(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read chain specification {}", path.display()))
}
