//! Plugin manager: the control plane's single entry point
//!
//! [`PluginManager`] admits plugins through the handshake, keeps the set of
//! running plugins, routes calls to them and owns the metric subscription
//! counts. Every state change it makes is followed by an event on the
//! injected [`EventEmitter`].
//!
//! Each admitted plugin gets a supervisor task that drains its stdout. When
//! the stream closes the plugin is considered gone: it is removed, reaped and
//! reported as unloaded, the same as an explicit [`PluginManager::unload`].

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use pulse_plugin::Arg;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::client::PluginClient;
use crate::config::ControlConfig;
use crate::error::ControlError;
use crate::events::{ControlEvent, EventEmitter};
use crate::handshake::{Admission, HandshakeProtocol};
use crate::keys::ControlKeyPair;
use crate::launcher::{PluginLauncher, PluginProcess, ProcessLauncher};
use crate::loaded::{LoadedPlugin, PluginState};
use crate::subscriptions::{SubscriptionRegistry, metric_key};

/// How long an unloaded plugin gets to exit on its own before it is killed
const UNLOAD_GRACE: Duration = Duration::from_millis(500);

type Roster = Arc<RwLock<Vec<RunningPlugin>>>;

/// A plugin admitted into the control plane
struct RunningPlugin {
    /// Distinguishes successive loads of the same name
    id: u64,
    record: LoadedPlugin,
    process: Mutex<Box<dyn PluginProcess>>,
    /// Absent for plugins that do not serve RPC
    client: Option<Arc<PluginClient>>,
    supervisor: JoinHandle<()>,
    keepalive: Option<JoinHandle<()>>,
}

impl RunningPlugin {
    fn matches(&self, name: &str) -> bool {
        self.record.meta.name == name
    }

    fn stop_tasks(&self) {
        self.supervisor.abort();
        if let Some(keepalive) = &self.keepalive {
            keepalive.abort();
        }
    }
}

/// Loads, supervises and talks to plugins
pub struct PluginManager {
    config: ControlConfig,
    started: AtomicBool,
    handshake: HandshakeProtocol,
    plugins: Roster,
    next_id: AtomicU64,
    subscriptions: SubscriptionRegistry,
    emitter: Arc<dyn EventEmitter>,
    keys: Option<ControlKeyPair>,
}

impl PluginManager {
    /// Create a manager that launches plugins as child processes
    pub fn new(config: ControlConfig, emitter: Arc<dyn EventEmitter>) -> Self {
        Self::with_launcher(config, emitter, Arc::new(ProcessLauncher::new()))
    }

    /// Create a manager with a custom launcher
    pub fn with_launcher(
        config: ControlConfig,
        emitter: Arc<dyn EventEmitter>,
        launcher: Arc<dyn PluginLauncher>,
    ) -> Self {
        let keys = config.sign_sessions.then(ControlKeyPair::generate);
        let handshake = HandshakeProtocol::new(launcher, config.handshake_timeout());
        Self {
            config,
            started: AtomicBool::new(false),
            handshake,
            plugins: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            subscriptions: SubscriptionRegistry::new(),
            emitter,
            keys,
        }
    }

    /// Use a specific control key instead of a generated one
    ///
    /// Has no effect unless `sign_sessions` is enabled.
    pub fn with_control_key(mut self, keys: ControlKeyPair) -> Self {
        if self.config.sign_sessions {
            self.keys = Some(keys);
        }
        self
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Accept plugin loads
    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        tracing::info!("Plugin control started");
    }

    /// Refuse further loads. Plugins already running keep running.
    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        tracing::info!("Plugin control stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Control public key handed to plugins, when sessions are signed
    pub fn public_key(&self) -> Option<&str> {
        self.keys.as_ref().map(ControlKeyPair::public_key)
    }

    /// Launch argument for a plugin
    pub fn generate_args(&self, run_as_daemon: bool) -> Arg {
        let arg = Arg::new(self.config.plugin_log_path.clone(), run_as_daemon);
        match self.public_key() {
            Some(key) => arg.with_control_public_key(key),
            None => arg,
        }
    }

    /// Launch the plugin at `path`, run the handshake and admit it
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<LoadedPlugin, ControlError> {
        let path = path.as_ref();
        if !self.is_started() {
            tracing::error!(path = %path.display(), "Plugin load requested before control started");
            return Err(ControlError::NotStarted);
        }

        let arg = self.generate_args(self.config.run_as_daemon);
        let Admission {
            record,
            mut process,
            stdout,
        } = match self.handshake.admit(path, &arg).await {
            Ok(admission) => admission,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Plugin load failed");
                return Err(e);
            }
        };

        let mut plugins = self.plugins.write().await;
        // Lookups are by name, so a name is admitted at most once whatever its version
        let loaded_version = plugins
            .iter()
            .find(|p| p.matches(record.name()))
            .map(|p| p.record.meta.version);
        if let Some(version) = loaded_version {
            drop(plugins);
            if let Err(e) = process.kill().await {
                tracing::debug!(
                    plugin = %record.name(),
                    error = %e,
                    "Failed to kill duplicate plugin"
                );
            }
            tracing::error!(
                plugin = %record.name(),
                version = record.meta.version,
                loaded_version = version,
                "Plugin already loaded"
            );
            return Err(ControlError::AlreadyLoaded {
                name: record.meta.name,
                version,
            });
        }

        let client = record.listen_address.as_ref().map(|address| {
            let signature = self.keys.as_ref().map(|k| k.sign_token(&record.token));
            Arc::new(PluginClient::new(
                record.name(),
                address.clone(),
                record.token.clone(),
                signature,
                self.config.call_timeout(),
            ))
        });

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Blocks on the roster lock held here, so it cannot act before the push
        let supervisor = tokio::spawn(supervise(
            id,
            record.name().to_string(),
            stdout,
            Arc::clone(&self.plugins),
            Arc::clone(&self.emitter),
        ));
        let keepalive = match (self.config.ping_interval(), &client) {
            (Some(every), Some(client)) => Some(spawn_keepalive(
                record.name().to_string(),
                Arc::clone(client),
                every,
            )),
            _ => None,
        };

        plugins.push(RunningPlugin {
            id,
            record: record.clone(),
            process: Mutex::new(process),
            client,
            supervisor,
            keepalive,
        });

        tracing::info!(
            plugin = %record.name(),
            version = record.meta.version,
            address = ?record.listen_address,
            "Plugin loaded"
        );
        // Emitted under the roster lock so it always precedes the matching PluginUnloaded
        if let Some(plugin_type) = record.plugin_type {
            self.emitter.emit(ControlEvent::PluginLoaded {
                name: record.meta.name.clone(),
                version: record.meta.version,
                plugin_type,
                path: record.path.clone(),
            });
        }
        drop(plugins);
        Ok(record)
    }

    /// Stop a plugin and forget about it
    pub async fn unload(&self, name: &str) -> Result<LoadedPlugin, ControlError> {
        let running = {
            let mut plugins = self.plugins.write().await;
            let index = plugins
                .iter()
                .position(|p| p.matches(name))
                .ok_or_else(|| ControlError::NotFound(name.to_string()))?;
            plugins.remove(index)
        };

        running.stop_tasks();
        let RunningPlugin {
            mut record,
            process,
            client,
            ..
        } = running;

        let mut process = process.into_inner();
        let asked = match &client {
            Some(client) => match client.kill("unloaded").await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(plugin = %name, error = %e, "Plugin did not accept kill");
                    false
                }
            },
            None => false,
        };
        if asked {
            let _ = tokio::time::timeout(UNLOAD_GRACE, process.wait()).await;
        }
        if let Err(e) = process.kill().await {
            tracing::warn!(plugin = %name, error = %e, "Failed to kill plugin process");
        }

        record.transition(PluginState::Unloaded)?;
        tracing::info!(plugin = %name, "Plugin unloaded");
        self.emitter.emit(ControlEvent::PluginUnloaded {
            name: record.meta.name.clone(),
            version: record.meta.version,
        });
        Ok(record)
    }

    /// Unload every plugin and stop accepting loads
    pub async fn shutdown(&self) {
        self.stop();
        let names: Vec<String> = self
            .plugins
            .read()
            .await
            .iter()
            .map(|p| p.record.meta.name.clone())
            .collect();
        for name in names {
            if let Err(e) = self.unload(&name).await {
                tracing::warn!(plugin = %name, error = %e, "Failed to unload plugin");
            }
        }
    }

    /// Snapshot of all admitted plugins
    pub async fn loaded_plugins(&self) -> Vec<LoadedPlugin> {
        self.plugins
            .read()
            .await
            .iter()
            .map(|p| p.record.clone())
            .collect()
    }

    pub async fn get_plugin(&self, name: &str) -> Option<LoadedPlugin> {
        self.plugins
            .read()
            .await
            .iter()
            .find(|p| p.matches(name))
            .map(|p| p.record.clone())
    }

    /// RPC client bound to a plugin's session
    pub async fn client(&self, name: &str) -> Result<Arc<PluginClient>, ControlError> {
        let plugins = self.plugins.read().await;
        let plugin = plugins
            .iter()
            .find(|p| p.matches(name))
            .ok_or_else(|| ControlError::NotFound(name.to_string()))?;
        plugin
            .client
            .clone()
            .ok_or_else(|| ControlError::NotFound(format!("{name} (no RPC address)")))
    }

    /// Add a subscriber to a metric, returns the new count
    ///
    /// The event is emitted before the next change to the same registry, so
    /// listeners see counts in the order they happened.
    pub fn subscribe_metric<S: AsRef<str>>(&self, namespace: &[S]) -> u64 {
        let key = metric_key(namespace);
        self.subscriptions.subscribe_with(&key, |count| {
            tracing::debug!(metric = %key, count, "Metric subscribed");
            self.emitter.emit(ControlEvent::MetricSubscription {
                namespace: to_owned(namespace),
                count,
            });
        })
    }

    /// Remove a subscriber from a metric, returns the new count
    ///
    /// Removing more subscribers than were added is a
    /// [`ControlError::Subscription`] error and emits nothing.
    pub fn unsubscribe_metric<S: AsRef<str>>(&self, namespace: &[S]) -> Result<u64, ControlError> {
        let key = metric_key(namespace);
        let unsubscribed = self.subscriptions.unsubscribe_with(&key, |count| {
            tracing::debug!(metric = %key, count, "Metric unsubscribed");
            self.emitter.emit(ControlEvent::MetricUnsubscription {
                namespace: to_owned(namespace),
                count,
            });
        });
        unsubscribed.map_err(|e| {
            tracing::error!(metric = %key, "Metric unsubscribed more times than subscribed");
            e.into()
        })
    }

    /// Current subscriber count for a metric
    pub fn subscription_count<S: AsRef<str>>(&self, namespace: &[S]) -> u64 {
        self.subscriptions.count(&metric_key(namespace))
    }

    /// Metrics with at least one subscriber
    pub fn subscribed_metrics(&self) -> Vec<String> {
        self.subscriptions.keys()
    }
}

fn to_owned<S: AsRef<str>>(namespace: &[S]) -> Vec<String> {
    namespace.iter().map(|s| s.as_ref().to_string()).collect()
}

/// Drain a plugin's stdout, then retire it once the stream closes
async fn supervise(
    id: u64,
    name: String,
    stdout: Box<dyn AsyncBufRead + Send + Unpin>,
    plugins: Roster,
    emitter: Arc<dyn EventEmitter>,
) {
    let mut lines = stdout.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(plugin = %name, stream = "stdout", "{line}");
    }

    let running = {
        let mut plugins = plugins.write().await;
        match plugins.iter().position(|p| p.id == id) {
            Some(index) => plugins.remove(index),
            // Already unloaded
            None => return,
        }
    };
    if let Some(keepalive) = &running.keepalive {
        keepalive.abort();
    }
    let RunningPlugin {
        mut record,
        process,
        ..
    } = running;

    let mut process = process.into_inner();
    let code = match tokio::time::timeout(UNLOAD_GRACE, process.wait()).await {
        Ok(Ok(code)) => code,
        _ => None,
    };
    if let Err(e) = process.kill().await {
        tracing::warn!(plugin = %name, error = %e, "Failed to kill plugin process");
    }
    tracing::warn!(plugin = %name, code = ?code, "Plugin went away, unloading");

    if let Err(e) = record.transition(PluginState::Unloaded) {
        tracing::error!(plugin = %name, error = %e, "Plugin could not be unloaded");
        return;
    }
    emitter.emit(ControlEvent::PluginUnloaded {
        name: record.meta.name,
        version: record.meta.version,
    });
}

fn spawn_keepalive(name: String, client: Arc<PluginClient>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = client.ping().await {
                tracing::warn!(plugin = %name, error = %e, "Plugin keepalive failed");
            }
        }
    })
}
