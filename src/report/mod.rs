use clap::ValueEnum;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::types::NodeRecord;

/// How `cluster` prints a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Console,
    Json,
    Prometheus,
}

/// Point-in-time view of cluster capacity and health
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub nodes: Vec<NodeRecord>,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub total_pods: usize,
    pub namespace: Option<String>,
}

#[derive(Serialize)]
struct NodeView<'a> {
    name: &'a str,
    cpu_usage: f64,
    memory_usage: f64,
    cpu_capacity: f64,
    memory_capacity: f64,
    cpu_percent: f64,
    memory_percent: f64,
    pods_running: usize,
    conditions: BTreeMap<&'a str, bool>,
}

#[derive(Serialize)]
struct SummaryView<'a> {
    total_nodes: usize,
    healthy_nodes: usize,
    total_pods: usize,
    namespace: Option<&'a str>,
    nodes: Vec<NodeView<'a>>,
}

impl ClusterSummary {
    /// A node counts as healthy when its `Ready` condition is true.
    pub fn new(nodes: Vec<NodeRecord>, total_pods: usize, namespace: Option<String>) -> Self {
        let healthy_nodes = nodes
            .iter()
            .filter(|n| n.condition("Ready") == Some(true))
            .count();
        Self {
            total_nodes: nodes.len(),
            healthy_nodes,
            total_pods,
            namespace,
            nodes,
        }
    }

    pub fn render(&self, format: OutputFormat) -> serde_json::Result<String> {
        match format {
            OutputFormat::Console => Ok(self.render_console()),
            OutputFormat::Json => self.render_json(),
            OutputFormat::Prometheus => Ok(self.render_prometheus().join("\n")),
        }
    }

    pub fn render_console(&self) -> String {
        let mut out = String::new();
        let scope = self.namespace.as_deref().unwrap_or("all namespaces");
        let _ = writeln!(out, "Cluster Metrics ({})", scope);
        let _ = writeln!(
            out,
            "  nodes: {} ({} healthy)  pods: {}",
            self.total_nodes, self.healthy_nodes, self.total_pods
        );
        for node in &self.nodes {
            let ready = match node.condition("Ready") {
                Some(true) => "Ready",
                Some(false) => "NotReady",
                None => "Unknown",
            };
            let _ = writeln!(
                out,
                "  {:<24} {:<8} cpu {:>5.1}% ({:.2}/{:.2} cores)  mem {:>5.1}% ({}/{})  pods {}",
                node.name,
                ready,
                node.cpu_percent(),
                node.resources.cpu_usage,
                node.resources.cpu_capacity,
                node.memory_percent(),
                human_bytes(node.resources.memory_usage),
                human_bytes(node.resources.memory_capacity),
                node.pods_running,
            );
        }
        out
    }

    pub fn render_json(&self) -> serde_json::Result<String> {
        let view = SummaryView {
            total_nodes: self.total_nodes,
            healthy_nodes: self.healthy_nodes,
            total_pods: self.total_pods,
            namespace: self.namespace.as_deref(),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeView {
                    name: &n.name,
                    cpu_usage: n.resources.cpu_usage,
                    memory_usage: n.resources.memory_usage,
                    cpu_capacity: n.resources.cpu_capacity,
                    memory_capacity: n.resources.memory_capacity,
                    cpu_percent: n.cpu_percent(),
                    memory_percent: n.memory_percent(),
                    pods_running: n.pods_running,
                    conditions: n.conditions.iter().map(|(c, v)| (c.as_str(), *v)).collect(),
                })
                .collect(),
        };
        serde_json::to_string_pretty(&view)
    }

    /// One exposition line per value, cluster totals first.
    pub fn render_prometheus(&self) -> Vec<String> {
        let scope = self
            .namespace
            .as_deref()
            .map(|ns| format!("{{namespace=\"{}\"}}", ns))
            .unwrap_or_default();

        let mut lines = vec![
            format!("cluster_total_nodes{} {}", scope, self.total_nodes),
            format!("cluster_healthy_nodes{} {}", scope, self.healthy_nodes),
            format!("cluster_total_pods{} {}", scope, self.total_pods),
        ];

        for node in &self.nodes {
            let n = &node.name;
            lines.push(format!("node_cpu_usage{{node=\"{}\"}} {}", n, node.resources.cpu_usage));
            lines.push(format!("node_memory_usage{{node=\"{}\"}} {}", n, node.resources.memory_usage));
            lines.push(format!("node_cpu_percent{{node=\"{}\"}} {}", n, node.cpu_percent()));
            lines.push(format!("node_memory_percent{{node=\"{}\"}} {}", n, node.memory_percent()));
            lines.push(format!("node_pods_running{{node=\"{}\"}} {}", n, node.pods_running));
            for (condition, status) in &node.conditions {
                lines.push(format!(
                    "node_condition{{node=\"{}\",condition=\"{}\"}} {}",
                    n,
                    condition,
                    u8::from(*status)
                ));
            }
        }
        lines
    }
}

fn human_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "Ki", "Mi", "Gi", "Ti"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", value, UNITS[unit])
}
