//! Verify that a chain specification initializes.

use super::engine::{json_rpc_engine, reject_invalid_spec};
use super::run::read_spec;
use anyhow::Result;
use chainbridge_core::{Bridge, BridgeConfig, ChainConfig};
use std::path::Path;
use std::sync::Arc;

pub async fn check_chain(config: BridgeConfig, spec_path: &Path) -> Result<()> {
    let spec = read_spec(spec_path)?;
    let engine = json_rpc_engine();
    reject_invalid_spec(&engine, &spec);
    let bridge = Bridge::new(Arc::new(engine), config)?;

    let created = bridge.create_chain(ChainConfig::new(spec)).await;
    bridge.shutdown().await?;

    let chain = created?;
    println!("{} ready ({})", spec_path.display(), chain.id());
    Ok(())
}
