use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{api::ListParams, Api, Client};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::Result;

/// Resource usage per node as reported by metrics.k8s.io, still as quantity strings.
pub type NodeUsage = BTreeMap<String, BTreeMap<String, String>>;

/// Read-only view of the cluster used by the collectors.
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>>;
    async fn list_all_pods(&self) -> Result<Vec<Pod>>;
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    async fn node_usage(&self) -> Result<NodeUsage>;
}

/// Build a client from an explicit kubeconfig, else in-cluster / default kubeconfig.
pub async fn connect(kubeconfig_path: Option<&str>) -> anyhow::Result<Client> {
    let client = match kubeconfig_path {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("reading kubeconfig {}", path))?;
            let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("loading kubeconfig {}", path))?;
            Client::try_from(config)?
        }
        None => Client::try_default().await?,
    };
    info!("Kubernetes client initialized");
    Ok(client)
}

pub struct KubernetesSource {
    client: Client,
}

impl KubernetesSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterSource for KubernetesSource {
    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>> {
        debug!(namespace, label_selector, "Listing pods");
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        Ok(api.list(&lp).await?.items)
    }

    async fn list_all_pods(&self) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn node_usage(&self) -> Result<NodeUsage> {
        let items = list_node_metrics_http(&self.client).await?;
        Ok(build_node_usage_map(items))
    }
}

// Node metrics structures
#[derive(Debug, Deserialize)]
struct NodeMetricsItem {
    metadata: serde_json::Value,
    #[serde(default)]
    usage: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct NodeMetricsList {
    items: Vec<NodeMetricsItem>,
}

async fn list_node_metrics_http(client: &Client) -> Result<Vec<NodeMetricsItem>> {
    use http::Request as HttpRequest;
    let req = HttpRequest::builder()
        .method("GET")
        .uri("/apis/metrics.k8s.io/v1beta1/nodes")
        .body(Vec::new())
        .map_err(kube::Error::HttpError)?;
    let list: NodeMetricsList = client.request(req).await?;
    Ok(list.items)
}

fn build_node_usage_map(items: Vec<NodeMetricsItem>) -> NodeUsage {
    items
        .into_iter()
        .filter_map(|item| {
            let name = item.metadata.get("name")?.as_str()?.to_string();
            (!name.is_empty()).then_some((name, item.usage))
        })
        .collect()
}
