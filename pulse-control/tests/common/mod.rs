//! Shell-script plugins for process-level tests

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pulse_control::{BroadcastEmitter, ControlConfig, PluginManager};
use pulse_plugin::{PluginMeta, PluginType, Response};

/// Write an executable `/bin/sh` script
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A plugin that answers the handshake and then keeps running
pub fn responsive_plugin(dir: &Path, name: &str) -> PathBuf {
    let line = Response::success(
        PluginMeta::new(name, 1),
        PluginType::Collector,
        format!("{name}-token"),
        None,
    )
    .to_line()
    .unwrap();
    let pid_file = dir.join(format!("{name}.pid"));
    script(
        dir,
        name,
        &format!(
            "echo $$ > '{}'\nprintf '%s\\n' '{line}'\nexec sleep 30",
            pid_file.display()
        ),
    )
}

/// A plugin that never answers
pub fn silent_plugin(dir: &Path, name: &str) -> PathBuf {
    let pid_file = dir.join(format!("{name}.pid"));
    script(
        dir,
        name,
        &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
    )
}

/// A plugin that answers with a failure and exits
pub fn rejecting_plugin(dir: &Path, name: &str, message: &str) -> PathBuf {
    let line = Response::failure(PluginMeta::new(name, 1), PluginType::Publisher, message)
        .to_line()
        .unwrap();
    script(dir, name, &format!("printf '%s\\n' '{line}'\nexit 1"))
}

pub fn read_pid(dir: &Path, name: &str) -> Option<u32> {
    std::fs::read_to_string(dir.join(format!("{name}.pid")))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Whether a process exists. Only answers on Linux; elsewhere always false.
pub fn process_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        Path::new(&format!("/proc/{pid}")).exists()
    } else {
        false
    }
}

pub fn manager(config: ControlConfig) -> (PluginManager, Arc<BroadcastEmitter>) {
    let emitter = Arc::new(BroadcastEmitter::default());
    let manager = PluginManager::new(config, emitter.clone());
    (manager, emitter)
}

pub fn config(log_dir: &Path) -> ControlConfig {
    ControlConfig {
        plugin_log_path: log_dir.to_path_buf(),
        ..ControlConfig::default()
    }
}
