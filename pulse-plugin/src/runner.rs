//! Plugin bootstrap
//!
//! [`start`] is what a plugin's `main` calls. It answers the control plane's
//! handshake on stdout and, for daemon runs, serves RPC until the session is
//! killed or the heartbeat watchdog fires.

use std::fs::{self, OpenOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::error::PluginError;
use crate::proxy::Plugin;
use crate::rpc::RpcServer;
use crate::security::SessionVerifier;
use crate::session::{DEFAULT_HEARTBEAT_TIMEOUT, Session};
use crate::types::{Arg, PluginMeta, Response};

/// Runtime options for a plugin process
#[derive(Debug, Clone)]
pub struct PluginOptions {
    /// Stop serving after this long without a call
    pub heartbeat_timeout: Duration,
    /// Address to bind the RPC listener to
    pub listen_address: String,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            listen_address: "127.0.0.1:0".to_string(),
        }
    }
}

/// Run a plugin, answering the handshake on stdout
pub async fn start(
    meta: PluginMeta,
    plugin: Plugin,
    arg: Arg,
    options: PluginOptions,
) -> Result<(), PluginError> {
    start_with_writer(meta, plugin, arg, options, tokio::io::stdout()).await
}

/// Run a plugin, writing the handshake response to `out`
pub async fn start_with_writer<W>(
    meta: PluginMeta,
    plugin: Plugin,
    arg: Arg,
    options: PluginOptions,
    mut out: W,
) -> Result<(), PluginError>
where
    W: AsyncWrite + Unpin,
{
    let plugin_type = plugin.plugin_type();

    let prepared = prepare(&meta, &arg, &options).await;
    let (session, listener) = match prepared {
        Ok(ready) => ready,
        Err(e) => {
            let response = Response::failure(meta, plugin_type, e.to_string());
            write_response(&mut out, &response).await?;
            return Err(e);
        }
    };

    let listen_address = match &listener {
        Some(listener) => Some(listener.local_addr()?.to_string()),
        None => None,
    };
    let response = Response::success(
        meta.clone(),
        plugin_type,
        session.token(),
        listen_address.clone(),
    );
    write_response(&mut out, &response).await?;

    let Some(listener) = listener else {
        tracing::info!(plugin = %meta.name, "Handshake answered, not running as daemon");
        return Ok(());
    };

    tracing::info!(
        plugin = %meta.name,
        plugin_type = %plugin_type,
        address = ?listen_address,
        "Plugin serving"
    );
    let watchdog = session.spawn_watchdog(options.heartbeat_timeout);
    let handler = plugin.into_handler(Arc::clone(&session));
    let served = RpcServer::new(Arc::clone(&session), handler)
        .serve(listener)
        .await;

    session.kill("server stopped");
    let _ = watchdog.await;
    served
}

async fn prepare(
    meta: &PluginMeta,
    arg: &Arg,
    options: &PluginOptions,
) -> Result<(Arc<Session>, Option<TcpListener>), PluginError> {
    let verifier = arg
        .control_public_key
        .as_deref()
        .map(SessionVerifier::from_public_key)
        .transpose()?;
    let session = Arc::new(Session::new(meta, verifier));

    let listener = if arg.run_as_daemon {
        Some(TcpListener::bind(&options.listen_address).await?)
    } else {
        None
    };
    Ok((session, listener))
}

async fn write_response<W>(out: &mut W, response: &Response) -> Result<(), PluginError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = response.to_line()?;
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

/// Send this process's `tracing` output to `<plugin_log_path>/<name>.log`.
///
/// Stdout carries the handshake, so plugins must never log there.
pub fn init_logging(meta: &PluginMeta, arg: &Arg) -> Result<(), PluginError> {
    fs::create_dir_all(&arg.plugin_log_path)?;
    let path = arg.plugin_log_path.join(format!("{}.log", meta.name));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| PluginError::Logging(e.to_string()))
}
