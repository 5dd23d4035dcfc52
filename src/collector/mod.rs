use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::kubernetes::ClusterSource;
use crate::normalize;
use crate::report::ClusterSummary;
use crate::types::{NodeRecord, PodRecord, VmRecord};
use crate::vsphere::VmSource;

/// Fetches one kind of snapshot from its source and normalizes it.
pub struct Collector<'a> {
    cluster: &'a dyn ClusterSource,
    vms: Option<&'a dyn VmSource>,
    config: &'a Config,
}

impl<'a> Collector<'a> {
    pub fn new(cluster: &'a dyn ClusterSource, vms: Option<&'a dyn VmSource>, config: &'a Config) -> Self {
        Self { cluster, vms, config }
    }

    /// Pods of one namespace, filtered by the configured label selector.
    pub async fn collect_pods(&self, namespace: &str) -> Result<Vec<PodRecord>> {
        let selector = self.config.label_selector();
        let pods = self.cluster.list_pods(namespace, selector.as_deref()).await?;
        let records = normalize::pod_records(&pods, namespace);
        debug!(namespace, count = records.len(), "Collected pods");
        Ok(records)
    }

    /// All nodes, or only those named in `only`.
    pub async fn collect_nodes(&self, only: Option<&BTreeSet<String>>) -> Result<Vec<NodeRecord>> {
        let nodes = self.cluster.list_nodes().await?;
        let records = normalize::node_records(&nodes, only);
        debug!(count = records.len(), "Collected nodes");
        Ok(records)
    }

    /// VM records for the nodes' linked machines. Empty when no VM source is configured.
    pub async fn collect_vms(&self, nodes: &[NodeRecord]) -> Result<Vec<VmRecord>> {
        let Some(source) = self.vms else {
            return Ok(Vec::new());
        };
        let targets = normalize::vm_targets(nodes);
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let snapshots = source.fetch_vms(&targets).await?;
        Ok(normalize::vm_records(&snapshots))
    }

    /// Nodes with usage and pod counts, plus cluster totals.
    ///
    /// Pods are counted in `namespace` when given, else across the cluster.
    /// Nodes whose quantities fail to parse are left out of the summary.
    pub async fn collect_cluster_summary(&self, namespace: Option<&str>) -> Result<ClusterSummary> {
        let nodes = self.cluster.list_nodes().await?;
        let usage = self.cluster.node_usage().await?;
        let pods = match namespace {
            Some(ns) => self.cluster.list_pods(ns, None).await?,
            None => self.cluster.list_all_pods().await?,
        };

        let pod_records = normalize::pod_records(&pods, namespace.unwrap_or_default());
        let per_node = normalize::pods_per_node(&pod_records);

        let mut records = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let name = node.metadata.name.as_deref().unwrap_or_default();
            let running = per_node.get(name).copied().unwrap_or(0);
            match normalize::node_record_with_usage(node, usage.get(name), running) {
                Some(Ok(record)) => records.push(record),
                Some(Err(e)) => warn!(node = name, error = %e, "Skipping node with unreadable resources"),
                None => {}
            }
        }

        Ok(ClusterSummary::new(records, pod_records.len(), namespace.map(str::to_string)))
    }
}
