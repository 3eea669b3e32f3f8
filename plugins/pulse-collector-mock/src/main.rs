//! A collector that serves a fixed set of `mock.*` metrics.
//!
//! Each collected value is the number of collect calls served so far, which
//! makes the output predictable in tests.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use pulse_plugin::{
    Arg, CollectorPlugin, MetricType, Plugin, PluginError, PluginMeta, PluginMetric,
    PluginOptions, PluginType, Response,
};

const NAME: &str = "mock";
const VERSION: u32 = 1;
const METRICS: [&[&str]; 2] = [&["mock", "foo"], &["mock", "bar"]];

#[derive(Default)]
struct MockCollector {
    calls: AtomicU64,
}

#[async_trait]
impl CollectorPlugin for MockCollector {
    async fn collect_metrics(
        &self,
        namespaces: Vec<Vec<String>>,
    ) -> Result<Vec<PluginMetric>, PluginError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        namespaces
            .iter()
            .map(|ns| {
                if METRICS.iter().any(|known| *known == ns.as_slice()) {
                    Ok(PluginMetric::new(ns, call))
                } else {
                    Err(PluginError::custom(format!("unknown metric {}", ns.join("."))))
                }
            })
            .collect()
    }

    async fn get_metric_types(&self) -> Result<Vec<MetricType>, PluginError> {
        Ok(METRICS.into_iter().map(MetricType::new).collect())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let meta = PluginMeta::new(NAME, VERSION);

    let arg = match Arg::from_env_args() {
        Ok(arg) => arg,
        Err(e) => {
            // No log path without an argument, so the response is all we can say
            let response = Response::failure(meta, PluginType::Collector, e.to_string());
            if let Ok(line) = response.to_line() {
                println!("{line}");
            }
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = pulse_plugin::init_logging(&meta, &arg) {
        eprintln!("failed to initialise logging: {e}");
    }

    let plugin = Plugin::Collector(Arc::new(MockCollector::default()));
    match pulse_plugin::start(meta, plugin, arg, PluginOptions::default()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Plugin stopped with error: {e}");
            ExitCode::FAILURE
        }
    }
}
