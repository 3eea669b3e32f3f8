//! Plugin admission handshake
//!
//! A plugin is admitted when, within the handshake timeout, it writes a
//! successful [`Response`] carrying a token as its first line on stdout.
//! Any other outcome kills the process and leaves no record behind.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pulse_plugin::{Arg, Response};
use pulse_plugin::rpc::MAX_FRAME_BYTES;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::ControlError;
use crate::launcher::{LaunchedPlugin, PluginLauncher, PluginProcess};
use crate::loaded::{LoadedPlugin, PluginState};

/// Default time a plugin has to answer the handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// A plugin that passed the handshake
pub struct Admission {
    pub record: LoadedPlugin,
    pub process: Box<dyn PluginProcess>,
    /// Remainder of the plugin's stdout
    pub stdout: Box<dyn AsyncBufRead + Send + Unpin>,
}

/// Spawns a plugin and exchanges the handshake with it
pub struct HandshakeProtocol {
    launcher: Arc<dyn PluginLauncher>,
    timeout: Duration,
    max_response_bytes: usize,
}

impl HandshakeProtocol {
    pub fn new(launcher: Arc<dyn PluginLauncher>, timeout: Duration) -> Self {
        Self {
            launcher,
            timeout,
            max_response_bytes: MAX_FRAME_BYTES,
        }
    }

    /// Longest handshake line accepted, newline included
    pub fn with_max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    /// Launch the plugin at `path` and admit it
    pub async fn admit(&self, path: &Path, arg: &Arg) -> Result<Admission, ControlError> {
        let mut record = LoadedPlugin::detected(path);

        let LaunchedPlugin {
            mut process,
            mut stdout,
        } = self.launcher.launch(path, arg).await?;

        let outcome: Result<(), ControlError> = async {
            record.transition(PluginState::Loading)?;
            let line = self.read_response(path, process.as_mut(), &mut stdout).await?;
            let response = validate(path, &line)?;
            record.admit(response)
        }
        .await;

        match outcome {
            Ok(()) => {
                tracing::info!(
                    plugin = %record.name(),
                    version = record.meta.version,
                    path = %path.display(),
                    "Plugin handshake complete"
                );
                Ok(Admission {
                    record,
                    process,
                    stdout,
                })
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Plugin handshake failed");
                terminate(path, process.as_mut()).await;
                Err(e)
            }
        }
    }

    async fn read_response(
        &self,
        path: &Path,
        process: &mut dyn PluginProcess,
        stdout: &mut (dyn AsyncBufRead + Send + Unpin),
    ) -> Result<String, ControlError> {
        let transport = |source| ControlError::HandshakeTransport {
            path: path.to_path_buf(),
            source,
        };
        let exited = |code| ControlError::PluginExited {
            path: path.to_path_buf(),
            code,
        };

        let cap = self.max_response_bytes;
        let mut line = String::new();
        let exchange = async {
            tokio::select! {
                biased;
                read = read_capped(stdout, &mut line, cap) => match read {
                    Ok(0) => Err(exited(None)),
                    Ok(_) => Ok(()),
                    Err(source) => Err(transport(source)),
                },
                status = process.wait() => match status {
                    // The response may already be sitting in the pipe
                    Ok(code) => match read_capped(stdout, &mut line, cap).await {
                        Ok(n) if n > 0 => Ok(()),
                        Ok(_) => Err(exited(code)),
                        Err(source) => Err(transport(source)),
                    },
                    Err(source) => Err(transport(source)),
                },
            }
        };

        let line = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result.map(|()| line)?,
            Err(_) => {
                return Err(ControlError::HandshakeTimeout {
                    path: path.to_path_buf(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };
        if line.len() >= cap && !line.ends_with('\n') {
            return Err(ControlError::InvalidResponse {
                path: path.to_path_buf(),
                message: format!("handshake response exceeds {cap} bytes"),
            });
        }
        Ok(line)
    }
}

/// `read_line` that stops after `cap` bytes
async fn read_capped(
    stdout: &mut (dyn AsyncBufRead + Send + Unpin),
    line: &mut String,
    cap: usize,
) -> std::io::Result<usize> {
    let limit = u64::try_from(cap).unwrap_or(u64::MAX);
    (&mut *stdout).take(limit).read_line(line).await
}

fn validate(path: &Path, line: &str) -> Result<Response, ControlError> {
    let response: Response =
        serde_json::from_str(line.trim()).map_err(|e| ControlError::InvalidResponse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if !response.is_success() {
        return Err(ControlError::HandshakeRejected {
            path: path.to_path_buf(),
            message: response
                .error_message
                .unwrap_or_else(|| "no error message".to_string()),
        });
    }
    if response.token.is_empty() {
        return Err(ControlError::MissingToken {
            path: path.to_path_buf(),
        });
    }
    Ok(response)
}

async fn terminate(path: &Path, process: &mut dyn PluginProcess) {
    if let Err(e) = process.kill().await {
        tracing::debug!(path = %path.display(), error = %e, "Failed to kill plugin process");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeLauncher, Script};
    use super::*;
    use crate::error::ErrorKind;
    use pulse_plugin::{PluginMeta, PluginType};

    fn protocol(launcher: &Arc<FakeLauncher>) -> HandshakeProtocol {
        HandshakeProtocol::new(launcher.clone(), DEFAULT_HANDSHAKE_TIMEOUT)
    }

    fn arg() -> Arg {
        Arg::new("/tmp/pulse-logs", true)
    }

    #[tokio::test]
    async fn successful_handshake_populates_record() {
        let launcher = Arc::new(FakeLauncher::new(Script::success("mock", "tok-1")));
        let started = chrono::Utc::now();

        let admission = protocol(&launcher)
            .admit(Path::new("/opt/plugins/mock"), &arg())
            .await
            .unwrap();

        let record = admission.record;
        assert_eq!(record.state, PluginState::Loaded);
        assert_eq!(record.name(), "mock");
        assert_eq!(record.token, "tok-1");
        assert_eq!(record.plugin_type, Some(PluginType::Collector));
        assert!(record.loaded_time.unwrap() >= started);
        assert!(!launcher.was_killed());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_plugin_times_out_and_is_killed() {
        let launcher = Arc::new(FakeLauncher::new(Script::Silent));
        let started = tokio::time::Instant::now();

        let err = protocol(&launcher)
            .admit(Path::new("/opt/plugins/silent"), &arg())
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::HandshakeTimeout);
        assert!(started.elapsed() >= DEFAULT_HANDSHAKE_TIMEOUT);
        assert!(started.elapsed() < DEFAULT_HANDSHAKE_TIMEOUT + Duration::from_millis(100));
        assert!(launcher.was_killed());
    }

    #[tokio::test]
    async fn failure_response_is_rejected_with_message() {
        let line = Response::failure(
            PluginMeta::new("bad", 1),
            PluginType::Publisher,
            "missing credentials",
        )
        .to_line()
        .unwrap();
        let launcher = Arc::new(FakeLauncher::new(Script::RespondAndExit(line, 1)));

        let err = protocol(&launcher)
            .admit(Path::new("/opt/plugins/bad"), &arg())
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::HandshakeRejected);
        assert!(err.to_string().contains("missing credentials"));
        assert!(launcher.was_killed());
    }

    #[tokio::test]
    async fn garbage_response_is_invalid() {
        let launcher = Arc::new(FakeLauncher::new(Script::Respond("hello world".into())));

        let err = protocol(&launcher)
            .admit(Path::new("/p"), &arg())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ControlError::InvalidResponse { .. }));
        assert!(launcher.was_killed());
    }

    #[tokio::test]
    async fn oversized_response_is_cut_off() {
        let launcher = Arc::new(FakeLauncher::new(Script::Respond("x".repeat(4096))));

        let err = protocol(&launcher)
            .with_max_response_bytes(256)
            .admit(Path::new("/p"), &arg())
            .await
            .err()
            .unwrap();

        assert!(matches!(
            &err,
            ControlError::InvalidResponse { message, .. } if message.contains("exceeds 256 bytes")
        ));
        assert_eq!(err.kind(), ErrorKind::HandshakeFailed);
        assert!(launcher.was_killed());
    }

    #[tokio::test]
    async fn response_at_the_limit_is_accepted() {
        let line = Script::success("mock", "tok");
        let Script::Respond(text) = &line else {
            unreachable!()
        };
        let cap = text.len() + 1;
        let launcher = Arc::new(FakeLauncher::new(line));

        let admission = protocol(&launcher)
            .with_max_response_bytes(cap)
            .admit(Path::new("/p"), &arg())
            .await
            .unwrap();
        assert_eq!(admission.record.name(), "mock");
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let launcher = Arc::new(FakeLauncher::new(Script::success("mock", "")));

        let err = protocol(&launcher)
            .admit(Path::new("/p"), &arg())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ControlError::MissingToken { .. }));
    }

    #[tokio::test]
    async fn early_exit_is_a_handshake_failure() {
        let launcher = Arc::new(FakeLauncher::new(Script::Exit(2)));

        let err = protocol(&launcher)
            .admit(Path::new("/p"), &arg())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::HandshakeFailed);
    }

    #[tokio::test]
    async fn response_then_exit_is_admitted() {
        let line = Response::success(
            PluginMeta::new("oneshot", 1),
            PluginType::Processor,
            "t",
            None,
        )
        .to_line()
        .unwrap();
        let launcher = Arc::new(FakeLauncher::new(Script::RespondAndExit(line, 0)));

        let admission = protocol(&launcher)
            .admit(Path::new("/p"), &arg())
            .await
            .unwrap();
        assert!(admission.record.is_loaded());
        assert!(admission.record.listen_address.is_none());
    }
}
