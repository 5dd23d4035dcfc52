//! Alert evaluation over normalized records.
//!
//! Every function is pure: output order follows input order, nothing is
//! de-duplicated, and calling twice on the same records yields the same list.

use chrono::{DateTime, Utc};

use crate::types::{NodeRecord, PodRecord, PodStatus, VmRecord};

/// Pods not Running for longer than this many seconds raise an alert.
pub const DEFAULT_POD_PROBLEMATIC_THRESHOLD_SECS: u64 = 300;

/// VM CPU or memory usage above this percentage raises an alert.
pub const HIGH_USAGE_PERCENT: f64 = 90.0;

/// Node conditions that alert when true.
const PRESSURE_CONDITIONS: &[&str] = &[
    "DiskPressure",
    "MemoryPressure",
    "PIDPressure",
    "NetworkUnavailable",
];

/// Resource kind an alert was raised for, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Pod,
    Node,
    Vmware,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::Node => "node",
            ResourceKind::Vmware => "vmware",
        }
    }
}

pub fn pod_alerts(pods: &[PodRecord], threshold_secs: u64) -> Vec<String> {
    pod_alerts_at(pods, threshold_secs, Utc::now())
}

/// Pod alerts with pod age measured against `now`.
pub fn pod_alerts_at(pods: &[PodRecord], threshold_secs: u64, now: DateTime<Utc>) -> Vec<String> {
    let mut alerts = Vec::new();

    for pod in pods {
        if pod.is_problematic() {
            alerts.push(format!(
                "Pod {} in namespace {} is in {} state",
                pod.name, pod.namespace, pod.status
            ));
        }

        if pod.status != PodStatus::Running {
            if let Some(age) = pod.age_at(now).filter(|a| *a > threshold_secs as f64) {
                alerts.push(format!(
                    "Pod {} in namespace {} has been in {} state for {:.1} seconds (threshold: {}s)",
                    pod.name, pod.namespace, pod.status, age, threshold_secs
                ));
            }
        }

        for (container, state) in &pod.container_states {
            if state != "running" {
                alerts.push(format!(
                    "Container {} in pod {} (namespace {}) is in {} state",
                    container, pod.name, pod.namespace, state
                ));
            }
        }
    }

    alerts
}

/// A NotReady node yields both a state alert and a "not Ready" alert.
pub fn node_alerts(nodes: &[NodeRecord]) -> Vec<String> {
    let mut alerts = Vec::new();

    for node in nodes {
        if node.is_problematic() {
            alerts.push(format!("Node {} is in {} state", node.name, node.status));
        }

        for (condition, status) in &node.conditions {
            if condition == "Ready" && !status {
                alerts.push(format!("Node {} is not Ready", node.name));
            } else if *status && PRESSURE_CONDITIONS.contains(&condition.as_str()) {
                alerts.push(format!("Node {} has condition {}", node.name, condition));
            }
        }
    }

    alerts
}

pub fn vm_alerts(vms: &[VmRecord]) -> Vec<String> {
    let mut alerts = Vec::new();

    for vm in vms {
        if vm.is_problematic() {
            alerts.push(format!(
                "VMware machine {} (node {}) is in {} state",
                vm.name, vm.node_name, vm.status
            ));
        }

        if let Some(cpu) = vm.cpu_percent().filter(|p| *p > HIGH_USAGE_PERCENT) {
            alerts.push(format!(
                "VMware machine {} (node {}) has high CPU usage: {:.1}%",
                vm.name, vm.node_name, cpu
            ));
        }

        if let Some(mem) = vm.memory_percent().filter(|p| *p > HIGH_USAGE_PERCENT) {
            alerts.push(format!(
                "VMware machine {} (node {}) has high memory usage: {:.1}%",
                vm.name, vm.node_name, mem
            ));
        }
    }

    alerts
}
