//! One-shot plugin load, useful for checking a plugin's handshake

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use pulse_control::NullEmitter;

use crate::config::PulseConfig;

#[derive(Args)]
pub struct LoadArgs {
    /// Path to the plugin executable
    pub path: PathBuf,
}

pub async fn run(config: PulseConfig, args: LoadArgs) -> Result<()> {
    let manager = super::start_manager(&config, Arc::new(NullEmitter)).await?;

    let result = manager.load(&args.path).await;
    manager.shutdown().await;

    let record = result?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
