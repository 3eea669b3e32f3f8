//! Control-side RPC client for a running plugin

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pulse_plugin::rpc::codec;
use pulse_plugin::{
    CollectMetricsArgs, MetricType, PluginMetric, ProcessArgs, PublishArgs, RpcCall, RpcOutcome,
    RpcReply, RpcRequest, RpcResponse,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LinesCodec};

use crate::error::RpcCallError;

type Connection = Framed<TcpStream, LinesCodec>;

/// Session-bound caller for one plugin
///
/// Calls are serialised over a single connection that is opened on first use
/// and reopened after a transport failure.
pub struct PluginClient {
    name: String,
    address: String,
    token: String,
    signature: Option<String>,
    call_timeout: Duration,
    next_id: AtomicU64,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginClient")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl PluginClient {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        token: impl Into<String>,
        signature: Option<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            token: token.into(),
            signature,
            call_timeout,
            next_id: AtomicU64::new(1),
            connection: Mutex::new(None),
        }
    }

    pub async fn ping(&self) -> Result<(), RpcCallError> {
        match self.call(RpcCall::Ping).await? {
            RpcReply::Pong => Ok(()),
            other => Err(unexpected("Ping", &other)),
        }
    }

    pub async fn publish(&self, plugin_metrics: Vec<PluginMetric>) -> Result<(), RpcCallError> {
        match self
            .call(RpcCall::Publish(PublishArgs { plugin_metrics }))
            .await?
        {
            RpcReply::Published => Ok(()),
            other => Err(unexpected("Publish", &other)),
        }
    }

    pub async fn collect_metrics(
        &self,
        namespaces: Vec<Vec<String>>,
    ) -> Result<Vec<PluginMetric>, RpcCallError> {
        match self
            .call(RpcCall::CollectMetrics(CollectMetricsArgs { namespaces }))
            .await?
        {
            RpcReply::Metrics(reply) => Ok(reply.plugin_metrics),
            other => Err(unexpected("CollectMetrics", &other)),
        }
    }

    pub async fn get_metric_types(&self) -> Result<Vec<MetricType>, RpcCallError> {
        match self.call(RpcCall::GetMetricTypes).await? {
            RpcReply::MetricTypes(reply) => Ok(reply.metric_types),
            other => Err(unexpected("GetMetricTypes", &other)),
        }
    }

    pub async fn process(
        &self,
        plugin_metrics: Vec<PluginMetric>,
    ) -> Result<Vec<PluginMetric>, RpcCallError> {
        match self
            .call(RpcCall::Process(ProcessArgs { plugin_metrics }))
            .await?
        {
            RpcReply::Processed(reply) => Ok(reply.plugin_metrics),
            other => Err(unexpected("Process", &other)),
        }
    }

    /// Ask the plugin to stop serving
    pub async fn kill(&self, reason: &str) -> Result<(), RpcCallError> {
        let result = self
            .call(RpcCall::Kill {
                reason: reason.to_string(),
            })
            .await;
        // The plugin closes the connection after answering
        *self.connection.lock().await = None;
        match result? {
            RpcReply::Killed => Ok(()),
            other => Err(unexpected("Kill", &other)),
        }
    }

    /// Send one call and wait for its reply
    pub async fn call(&self, call: RpcCall) -> Result<RpcReply, RpcCallError> {
        let name = call.name();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            id,
            token: self.token.clone(),
            signature: self.signature.clone(),
            call,
        };
        tracing::debug!(plugin = %self.name, call = name, id, "Calling plugin");

        let mut guard = self.connection.lock().await;
        let exchanged = tokio::time::timeout(self.call_timeout, async {
            if guard.is_none() {
                let stream = TcpStream::connect(&self.address)
                    .await
                    .map_err(|e| RpcCallError::new(name, format!("connect failed: {e}")))?;
                *guard = Some(Framed::new(stream, codec()));
            }
            let Some(connection) = guard.as_mut() else {
                return Err(RpcCallError::new(name, "no connection"));
            };
            exchange(connection, name, &request).await
        })
        .await;

        let response = match exchanged {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                *guard = None;
                return Err(e);
            }
            Err(_) => {
                *guard = None;
                return Err(RpcCallError::new(
                    name,
                    format!("timed out after {}ms", self.call_timeout.as_millis()),
                ));
            }
        };
        drop(guard);

        if response.id != id {
            return Err(RpcCallError::new(
                name,
                format!("response id {} does not match request {id}", response.id),
            ));
        }
        match response.outcome {
            RpcOutcome::Ok(reply) => Ok(reply),
            RpcOutcome::Error { message } => {
                tracing::debug!(plugin = %self.name, call = name, error = %message, "Plugin call failed");
                Err(RpcCallError::new(name, message))
            }
        }
    }
}

async fn exchange(
    connection: &mut Connection,
    name: &'static str,
    request: &RpcRequest,
) -> Result<RpcResponse, RpcCallError> {
    let line = serde_json::to_string(request).map_err(|e| RpcCallError::new(name, e))?;
    connection
        .send(line)
        .await
        .map_err(|e| RpcCallError::new(name, e))?;

    let reply = connection
        .next()
        .await
        .ok_or_else(|| RpcCallError::new(name, "connection closed"))?
        .map_err(|e| RpcCallError::new(name, e))?;
    serde_json::from_str(&reply).map_err(|e| RpcCallError::new(name, e))
}

fn unexpected(name: &'static str, reply: &RpcReply) -> RpcCallError {
    RpcCallError::new(name, format!("unexpected reply {reply:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use pulse_plugin::{
        CollectorPlugin, Plugin, PluginError, PluginMeta, RpcServer, Session,
    };
    use tokio::net::TcpListener;

    struct CpuCollector;

    #[async_trait]
    impl CollectorPlugin for CpuCollector {
        async fn collect_metrics(
            &self,
            namespaces: Vec<Vec<String>>,
        ) -> Result<Vec<PluginMetric>, PluginError> {
            if namespaces.is_empty() {
                return Err(PluginError::custom("no namespaces requested"));
            }
            Ok(namespaces
                .iter()
                .map(|ns| PluginMetric::new(ns, 0.42))
                .collect())
        }

        async fn get_metric_types(&self) -> Result<Vec<MetricType>, PluginError> {
            Ok(vec![MetricType::new(&["cpu", "load"])])
        }
    }

    async fn serve(token: &str) -> (String, Arc<Session>) {
        let session = Arc::new(Session::with_token(&PluginMeta::new("cpu", 1), token, None));
        let handler = Plugin::Collector(Arc::new(CpuCollector)).into_handler(Arc::clone(&session));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(RpcServer::new(Arc::clone(&session), handler).serve(listener));
        (address, session)
    }

    fn client(address: &str, token: &str) -> PluginClient {
        PluginClient::new("cpu", address, token, None, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn collect_metrics_round_trip() {
        let (address, _session) = serve("tok").await;
        let client = client(&address, "tok");

        let metrics = client
            .collect_metrics(vec![vec!["cpu".into(), "load".into()]])
            .await
            .unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].key(), "cpu.load");

        let types = client.get_metric_types().await.unwrap();
        assert_eq!(types[0].namespace, vec!["cpu", "load"]);
    }

    #[tokio::test]
    async fn plugin_error_is_wrapped_with_call_name() {
        let (address, session) = serve("tok").await;
        let client = client(&address, "tok");

        let err = client.collect_metrics(Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "CollectMetrics call error: no namespaces requested");

        // The session survives a failed call
        assert!(!session.is_killed());
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_call_is_an_error() {
        let (address, _session) = serve("tok").await;
        let err = client(&address, "tok").publish(Vec::new()).await.unwrap_err();
        assert_eq!(err.call, "Publish");
        assert!(err.cause.contains("not supported by collector plugins"));
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let (address, _session) = serve("tok").await;
        let err = client(&address, "other").ping().await.unwrap_err();
        assert!(err.cause.contains("Unauthorized"));
    }

    #[tokio::test]
    async fn kill_stops_the_session() {
        let (address, session) = serve("tok").await;
        client(&address, "tok").kill("unload").await.unwrap();
        assert!(session.is_killed());
    }

    #[tokio::test]
    async fn unreachable_plugin_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = client(&address, "tok").ping().await.unwrap_err();
        assert_eq!(err.call, "Ping");
        assert!(err.cause.contains("connect failed"));
    }
}
