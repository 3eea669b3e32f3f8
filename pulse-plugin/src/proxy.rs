//! Session-bound RPC proxies
//!
//! A plugin author implements one of [`CollectorPlugin`], [`PublisherPlugin`]
//! or [`ProcessorPlugin`]. The runtime wraps that implementation in the
//! matching proxy, which logs each call on the session span, refreshes the
//! heartbeat and wraps failures as `"<Call> call error: <cause>"`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PluginError;
use crate::session::Session;
use crate::types::{MetricType, PluginMetric, PluginType};

/// A plugin that produces metrics
#[async_trait]
pub trait CollectorPlugin: Send + Sync {
    /// Collect the current values for the requested namespaces
    async fn collect_metrics(
        &self,
        namespaces: Vec<Vec<String>>,
    ) -> Result<Vec<PluginMetric>, PluginError>;

    /// Metrics this collector knows how to produce
    async fn get_metric_types(&self) -> Result<Vec<MetricType>, PluginError>;
}

/// A plugin that ships metrics out of the system
#[async_trait]
pub trait PublisherPlugin: Send + Sync {
    async fn publish(&self, metrics: Vec<PluginMetric>) -> Result<(), PluginError>;
}

/// A plugin that transforms metrics in flight
#[async_trait]
pub trait ProcessorPlugin: Send + Sync {
    async fn process(&self, metrics: Vec<PluginMetric>) -> Result<Vec<PluginMetric>, PluginError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishArgs {
    pub plugin_metrics: Vec<PluginMetric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishReply {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectMetricsArgs {
    pub namespaces: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectMetricsReply {
    pub plugin_metrics: Vec<PluginMetric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetMetricTypesReply {
    pub metric_types: Vec<MetricType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessArgs {
    pub plugin_metrics: Vec<PluginMetric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessReply {
    pub plugin_metrics: Vec<PluginMetric>,
}

/// A failed proxied call
#[derive(Error, Debug)]
#[error("{call} call error: {source}")]
pub struct CallError {
    /// Call name (`Publish`, `CollectMetrics`, ...)
    pub call: &'static str,
    #[source]
    pub source: PluginError,
}

impl CallError {
    fn wrap(call: &'static str) -> impl FnOnce(PluginError) -> Self {
        move |source| Self { call, source }
    }
}

pub struct PublisherProxy {
    plugin: Arc<dyn PublisherPlugin>,
    session: Arc<Session>,
}

impl PublisherProxy {
    pub fn new(plugin: Arc<dyn PublisherPlugin>, session: Arc<Session>) -> Self {
        Self { plugin, session }
    }

    pub async fn publish(&self, args: PublishArgs) -> Result<PublishReply, CallError> {
        tracing::debug!(
            parent: self.session.logger(),
            metrics = args.plugin_metrics.len(),
            "Publish called"
        );
        self.session.reset_heartbeat();
        self.plugin
            .publish(args.plugin_metrics)
            .await
            .map_err(CallError::wrap("Publish"))?;
        Ok(PublishReply {})
    }
}

pub struct CollectorProxy {
    plugin: Arc<dyn CollectorPlugin>,
    session: Arc<Session>,
}

impl CollectorProxy {
    pub fn new(plugin: Arc<dyn CollectorPlugin>, session: Arc<Session>) -> Self {
        Self { plugin, session }
    }

    pub async fn collect_metrics(
        &self,
        args: CollectMetricsArgs,
    ) -> Result<CollectMetricsReply, CallError> {
        tracing::debug!(
            parent: self.session.logger(),
            namespaces = args.namespaces.len(),
            "CollectMetrics called"
        );
        self.session.reset_heartbeat();
        let plugin_metrics = self
            .plugin
            .collect_metrics(args.namespaces)
            .await
            .map_err(CallError::wrap("CollectMetrics"))?;
        Ok(CollectMetricsReply { plugin_metrics })
    }

    pub async fn get_metric_types(&self) -> Result<GetMetricTypesReply, CallError> {
        tracing::debug!(parent: self.session.logger(), "GetMetricTypes called");
        self.session.reset_heartbeat();
        let metric_types = self
            .plugin
            .get_metric_types()
            .await
            .map_err(CallError::wrap("GetMetricTypes"))?;
        Ok(GetMetricTypesReply { metric_types })
    }
}

pub struct ProcessorProxy {
    plugin: Arc<dyn ProcessorPlugin>,
    session: Arc<Session>,
}

impl ProcessorProxy {
    pub fn new(plugin: Arc<dyn ProcessorPlugin>, session: Arc<Session>) -> Self {
        Self { plugin, session }
    }

    pub async fn process(&self, args: ProcessArgs) -> Result<ProcessReply, CallError> {
        tracing::debug!(
            parent: self.session.logger(),
            metrics = args.plugin_metrics.len(),
            "Process called"
        );
        self.session.reset_heartbeat();
        let plugin_metrics = self
            .plugin
            .process(args.plugin_metrics)
            .await
            .map_err(CallError::wrap("Process"))?;
        Ok(ProcessReply { plugin_metrics })
    }
}

/// A plugin implementation, tagged with its type
#[derive(Clone)]
pub enum Plugin {
    Collector(Arc<dyn CollectorPlugin>),
    Publisher(Arc<dyn PublisherPlugin>),
    Processor(Arc<dyn ProcessorPlugin>),
}

impl Plugin {
    pub fn plugin_type(&self) -> PluginType {
        match self {
            Self::Collector(_) => PluginType::Collector,
            Self::Publisher(_) => PluginType::Publisher,
            Self::Processor(_) => PluginType::Processor,
        }
    }

    /// Bind the implementation to a session
    pub fn into_handler(self, session: Arc<Session>) -> PluginHandler {
        match self {
            Self::Collector(p) => PluginHandler::Collector(CollectorProxy::new(p, session)),
            Self::Publisher(p) => PluginHandler::Publisher(PublisherProxy::new(p, session)),
            Self::Processor(p) => PluginHandler::Processor(ProcessorProxy::new(p, session)),
        }
    }
}

/// The proxy serving a running plugin
pub enum PluginHandler {
    Collector(CollectorProxy),
    Publisher(PublisherProxy),
    Processor(ProcessorProxy),
}

impl PluginHandler {
    pub fn plugin_type(&self) -> PluginType {
        match self {
            Self::Collector(_) => PluginType::Collector,
            Self::Publisher(_) => PluginType::Publisher,
            Self::Processor(_) => PluginType::Processor,
        }
    }
}
