//! pulse-plugin - Plugin API for the pulse control plane
//!
//! This crate holds everything both sides of the process boundary agree on:
//! the launch argument, the handshake response, metric types, and the RPC
//! wire. Plugin authors implement one of the plugin traits and hand it to
//! [`start`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pulse_plugin::{
//!     Arg, PluginError, PluginMeta, PluginMetric, PluginOptions, Plugin, PublisherPlugin,
//! };
//!
//! struct StdoutPublisher;
//!
//! #[async_trait::async_trait]
//! impl PublisherPlugin for StdoutPublisher {
//!     async fn publish(&self, metrics: Vec<PluginMetric>) -> Result<(), PluginError> {
//!         for metric in metrics {
//!             tracing::info!(metric = %metric.key(), data = %metric.data, "published");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PluginError> {
//!     let meta = PluginMeta::new("stdout-publisher", 1);
//!     let arg = Arg::from_env_args()?;
//!     pulse_plugin::init_logging(&meta, &arg)?;
//!     let plugin = Plugin::Publisher(Arc::new(StdoutPublisher));
//!     pulse_plugin::start(meta, plugin, arg, PluginOptions::default()).await
//! }
//! ```

pub mod error;
pub mod proxy;
pub mod rpc;
pub mod runner;
pub mod security;
pub mod session;
pub mod types;

pub use error::PluginError;
pub use proxy::{
    CallError, CollectMetricsArgs, CollectMetricsReply, CollectorPlugin, CollectorProxy,
    GetMetricTypesReply, Plugin, PluginHandler, ProcessArgs, ProcessReply, ProcessorPlugin,
    ProcessorProxy, PublishArgs, PublishReply, PublisherPlugin, PublisherProxy,
};
pub use rpc::{RpcCall, RpcOutcome, RpcReply, RpcRequest, RpcResponse, RpcServer};
pub use runner::{PluginOptions, init_logging, start, start_with_writer};
pub use security::SessionVerifier;
pub use session::Session;
pub use types::*;
