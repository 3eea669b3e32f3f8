//! Plugin process launching
//!
//! The handshake only needs three things from a launched plugin: its stdout,
//! a way to wait for it, and a way to kill it. [`PluginLauncher`] and
//! [`PluginProcess`] capture exactly that so the handshake can be driven by
//! real processes or by test doubles.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pulse_plugin::Arg;
use tokio::io::AsyncBufRead;

use crate::error::ControlError;

/// A running plugin process
#[async_trait]
pub trait PluginProcess: Send {
    /// OS process id, if the process is still known to the OS
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit, returns its exit code
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Kill the process and reap it
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// A freshly launched plugin
pub struct LaunchedPlugin {
    pub process: Box<dyn PluginProcess>,
    /// The plugin's stdout; the first line is the handshake response
    pub stdout: Box<dyn AsyncBufRead + Send + Unpin>,
}

/// Starts plugin executables
#[async_trait]
pub trait PluginLauncher: Send + Sync {
    async fn launch(&self, path: &Path, arg: &Arg) -> Result<LaunchedPlugin, ControlError>;
}

/// Launches plugins as child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
mod unix {
    use std::process::Stdio;

    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::process::{Child, Command};

    use super::*;

    struct ChildProcess {
        child: Child,
    }

    #[async_trait]
    impl PluginProcess for ChildProcess {
        fn id(&self) -> Option<u32> {
            self.child.id()
        }

        async fn wait(&mut self) -> std::io::Result<Option<i32>> {
            let status = self.child.wait().await?;
            Ok(status.code())
        }

        async fn kill(&mut self) -> std::io::Result<()> {
            if self.child.try_wait()?.is_some() {
                return Ok(());
            }
            self.child.kill().await
        }
    }

    fn check_executable(path: &Path) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "not an executable file",
            ));
        }
        Ok(())
    }

    #[async_trait]
    impl PluginLauncher for ProcessLauncher {
        async fn launch(&self, path: &Path, arg: &Arg) -> Result<LaunchedPlugin, ControlError> {
            let spawn_error = |source| ControlError::Spawn {
                path: path.to_path_buf(),
                source,
            };
            check_executable(path).map_err(spawn_error)?;

            let encoded = arg
                .to_json()
                .map_err(|e| spawn_error(std::io::Error::other(e.to_string())))?;

            let mut child = Command::new(path)
                .arg(encoded)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(spawn_error)?;

            let stdout = child.stdout.take().ok_or_else(|| {
                spawn_error(std::io::Error::other("plugin stdout was not captured"))
            })?;
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(drain_stderr(path.to_path_buf(), stderr));
            }

            tracing::debug!(path = %path.display(), pid = ?child.id(), "Plugin process spawned");
            Ok(LaunchedPlugin {
                process: Box::new(ChildProcess { child }),
                stdout: Box::new(BufReader::new(stdout)),
            })
        }
    }

    async fn drain_stderr(path: PathBuf, stderr: tokio::process::ChildStderr) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(path = %path.display(), stream = "stderr", "{line}");
        }
    }
}

#[cfg(not(unix))]
#[async_trait]
impl PluginLauncher for ProcessLauncher {
    async fn launch(&self, _path: &Path, _arg: &Arg) -> Result<LaunchedPlugin, ControlError> {
        Err(ControlError::UnsupportedPlatform(std::env::consts::OS))
    }
}
