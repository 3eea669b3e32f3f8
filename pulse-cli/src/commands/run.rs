//! Long-running control plane

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use pulse_control::{BroadcastEmitter, ControlEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::PulseConfig;

#[derive(Args)]
pub struct RunArgs {
    /// Plugins to load in addition to `plugins.autoload`
    pub plugins: Vec<PathBuf>,

    /// Subscribe to these metrics on start (dot-separated namespaces)
    #[arg(long = "subscribe", value_name = "METRIC")]
    pub subscribe: Vec<String>,
}

pub async fn run(config: PulseConfig, args: RunArgs) -> Result<()> {
    let emitter = Arc::new(BroadcastEmitter::default());
    let events = tokio::spawn(log_events(emitter.subscribe()));
    let manager = super::start_manager(&config, emitter).await?;

    let paths = config.plugins.autoload.iter().chain(args.plugins.iter());
    for path in paths {
        // A plugin that fails its handshake does not stop the others
        if let Err(e) = manager.load(path).await {
            warn!(path = %path.display(), kind = %e.kind(), "Failed to load plugin: {e}");
        }
    }

    for metric in &args.subscribe {
        let namespace: Vec<&str> = metric.split('.').collect();
        manager.subscribe_metric(&namespace);
    }

    info!(
        plugins = manager.loaded_plugins().await.len(),
        "Control plane running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    manager.shutdown().await;
    events.abort();
    Ok(())
}

async fn log_events(mut rx: tokio::sync::broadcast::Receiver<(u64, ControlEvent)>) {
    loop {
        match rx.recv().await {
            Ok((seq, event)) => match serde_json::to_string(&event) {
                Ok(json) => info!(
                    seq,
                    plugin = event.plugin_name(),
                    metric = event.metric_key().as_deref(),
                    event = %json,
                    "Control event"
                ),
                Err(e) => warn!(seq, "Failed to encode event: {e}"),
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
