//! pulse-control: control plane for out-of-process pulse plugins
//!
//! This crate launches plugin executables, admits them through a handshake,
//! supervises them and keeps reference-counted metric subscriptions:
//!
//! - **Plugin manager** - [`PluginManager`], the single entry point
//! - **Handshake** - [`HandshakeProtocol`] spawns a plugin and waits for its
//!   [`pulse_plugin::Response`]
//! - **Subscriptions** - [`SubscriptionRegistry`] counts subscribers per metric
//! - **Events** - [`EventEmitter`] and [`BroadcastEmitter`] for lifecycle and
//!   subscription events
//! - **RPC** - [`PluginClient`] calls into a running plugin
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use pulse_control::{BroadcastEmitter, ControlConfig, PluginManager};
//!
//! async fn example() -> Result<(), pulse_control::ControlError> {
//!     let emitter = Arc::new(BroadcastEmitter::default());
//!     let manager = PluginManager::new(ControlConfig::default(), emitter);
//!     manager.start();
//!
//!     let plugin = manager.load("/opt/pulse/plugins/collector-cpu").await?;
//!     println!("loaded {} v{}", plugin.meta.name, plugin.meta.version);
//!
//!     manager.subscribe_metric(&["cpu", "load"]);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handshake;
pub mod keys;
pub mod launcher;
pub mod loaded;
pub mod manager;
pub mod subscriptions;

pub use client::PluginClient;
pub use config::ControlConfig;
pub use error::{ControlError, ErrorKind, RpcCallError, SubscriptionError};
pub use events::{BroadcastEmitter, ControlEvent, EventEmitter, EventSeq, NullEmitter};
pub use handshake::{Admission, DEFAULT_HANDSHAKE_TIMEOUT, HandshakeProtocol};
pub use keys::ControlKeyPair;
pub use launcher::{LaunchedPlugin, PluginLauncher, PluginProcess, ProcessLauncher};
pub use loaded::{LoadedPlugin, PluginState};
pub use manager::PluginManager;
pub use subscriptions::{SubscriptionRegistry, metric_key};
