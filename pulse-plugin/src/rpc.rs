//! JSON-lines RPC between the control plane and a plugin
//!
//! Each request and response is one JSON document on its own line:
//!
//! ```text
//! -> {"id":1,"token":"...","call":{"method":"Publish","args":{"plugin_metrics":[]}}}
//! <- {"id":1,"outcome":{"status":"ok","body":{"kind":"published"}}}
//! ```
//!
//! The plugin side of the wire is [`RpcServer`]. The control plane side
//! lives in `pulse-control`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};

use crate::error::PluginError;
use crate::proxy::{
    CollectMetricsArgs, CollectMetricsReply, GetMetricTypesReply, PluginHandler, ProcessArgs,
    ProcessReply, PublishArgs,
};
use crate::session::Session;

/// Largest single line accepted on the wire
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Build the line codec used on both ends of the connection
pub fn codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_FRAME_BYTES)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub call: RpcCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum RpcCall {
    Ping,
    Kill { reason: String },
    Publish(PublishArgs),
    CollectMetrics(CollectMetricsArgs),
    GetMetricTypes,
    Process(ProcessArgs),
}

impl RpcCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::Kill { .. } => "Kill",
            Self::Publish(_) => "Publish",
            Self::CollectMetrics(_) => "CollectMetrics",
            Self::GetMetricTypes => "GetMetricTypes",
            Self::Process(_) => "Process",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RpcReply {
    Pong,
    Killed,
    Published,
    Metrics(CollectMetricsReply),
    MetricTypes(GetMetricTypesReply),
    Processed(ProcessReply),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum RpcOutcome {
    Ok(RpcReply),
    /// The call failed. `message` is the cause, without the call name.
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub outcome: RpcOutcome,
}

impl RpcResponse {
    pub fn ok(id: u64, reply: RpcReply) -> Self {
        Self {
            id,
            outcome: RpcOutcome::Ok(reply),
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: RpcOutcome::Error {
                message: message.into(),
            },
        }
    }
}

impl PluginHandler {
    /// Route a call to the proxy for this plugin type
    pub async fn handle(&self, call: RpcCall) -> Result<RpcReply, PluginError> {
        let unsupported = |call: &RpcCall| PluginError::UnsupportedCall {
            method: call.name().to_string(),
            plugin_type: self.plugin_type().to_string(),
        };

        let reply = match (self, call) {
            (Self::Publisher(proxy), RpcCall::Publish(args)) => {
                proxy.publish(args).await.map(|_| RpcReply::Published)
            }
            (Self::Collector(proxy), RpcCall::CollectMetrics(args)) => {
                proxy.collect_metrics(args).await.map(RpcReply::Metrics)
            }
            (Self::Collector(proxy), RpcCall::GetMetricTypes) => {
                proxy.get_metric_types().await.map(RpcReply::MetricTypes)
            }
            (Self::Processor(proxy), RpcCall::Process(args)) => {
                proxy.process(args).await.map(RpcReply::Processed)
            }
            (_, other) => return Err(unsupported(&other)),
        };

        reply.map_err(|err| {
            tracing::warn!(error = %err, "Plugin call failed");
            err.source
        })
    }
}

/// Serves RPC for one plugin session
pub struct RpcServer {
    session: Arc<Session>,
    handler: Arc<PluginHandler>,
}

impl RpcServer {
    pub fn new(session: Arc<Session>, handler: PluginHandler) -> Self {
        Self {
            session,
            handler: Arc::new(handler),
        }
    }

    /// Accept connections until the session is killed
    pub async fn serve(self, listener: TcpListener) -> Result<(), PluginError> {
        let shutdown = self.session.shutdown_token();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(parent: self.session.logger(), "RPC server stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::debug!(parent: self.session.logger(), %peer, "Control connection accepted");
                    let session = Arc::clone(&self.session);
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, session, handler).await {
                            tracing::debug!(error = %e, "Control connection closed");
                        }
                    });
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    session: Arc<Session>,
    handler: Arc<PluginHandler>,
) -> Result<(), PluginError> {
    let mut framed = Framed::new(stream, codec());
    let shutdown = session.shutdown_token();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = framed.next() => match next {
                Some(line) => line.map_err(|e| PluginError::custom(e.to_string()))?,
                None => return Ok(()),
            },
        };

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let response = RpcResponse::error(0, format!("malformed request: {e}"));
                send(&mut framed, &response).await?;
                continue;
            }
        };

        let id = request.id;
        if let Err(e) = session.authenticate(&request.token, request.signature.as_deref()) {
            tracing::warn!(parent: session.logger(), call = request.call.name(), "Rejected unauthenticated call");
            send(&mut framed, &RpcResponse::error(id, e.to_string())).await?;
            continue;
        }

        let response = match request.call {
            RpcCall::Ping => {
                session.reset_heartbeat();
                RpcResponse::ok(id, RpcReply::Pong)
            }
            RpcCall::Kill { reason } => {
                send(&mut framed, &RpcResponse::ok(id, RpcReply::Killed)).await?;
                session.kill(&reason);
                return Ok(());
            }
            call => match handler.handle(call).await {
                Ok(reply) => RpcResponse::ok(id, reply),
                Err(e) => RpcResponse::error(id, e.to_string()),
            },
        };
        send(&mut framed, &response).await?;
    }
}

async fn send(
    framed: &mut Framed<TcpStream, LinesCodec>,
    response: &RpcResponse,
) -> Result<(), PluginError> {
    let line = serde_json::to_string(response)?;
    framed
        .send(line)
        .await
        .map_err(|e| PluginError::custom(e.to_string()))
}
