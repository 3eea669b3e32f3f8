pub mod load;
pub mod run;

use std::sync::Arc;

use anyhow::Result;
use pulse_control::{ControlKeyPair, EventEmitter, PluginManager};

use crate::config::PulseConfig;

/// Print the merged configuration as TOML
pub fn show_config(config: &PulseConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{}", toml_str);
    Ok(())
}

/// Build a started manager, loading the control key from disk when configured
pub(crate) async fn start_manager(
    config: &PulseConfig,
    emitter: Arc<dyn EventEmitter>,
) -> Result<PluginManager> {
    let mut manager = PluginManager::new(config.control.clone(), emitter);
    if config.control.sign_sessions
        && let Some(path) = &config.control.key_path
    {
        manager = manager.with_control_key(ControlKeyPair::load_or_generate(path).await?);
    }
    manager.start();
    Ok(manager)
}
