use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use std::collections::BTreeMap;

use crate::types::{PodRecord, PodStatus};

/// Derive the pod status from its phase, overridden by any container
/// waiting in `CrashLoopBackOff`.
pub fn pod_status(pod: &Pod) -> PodStatus {
    let Some(status) = pod.status.as_ref() else {
        return PodStatus::Unknown;
    };
    let Some(phase) = status.phase.as_deref() else {
        return PodStatus::Unknown;
    };

    let crash_looping = status
        .container_statuses
        .as_ref()
        .map(|statuses| {
            statuses.iter().any(|cs| {
                cs.state
                    .as_ref()
                    .and_then(|s| s.waiting.as_ref())
                    .and_then(|w| w.reason.as_deref())
                    == Some("CrashLoopBackOff")
            })
        })
        .unwrap_or(false);

    if crash_looping {
        PodStatus::CrashLoopBackOff
    } else {
        PodStatus::from_phase(phase)
    }
}

/// "running", the waiting/terminated reason (or the bare state name), or "unknown".
pub fn container_state(cs: &ContainerStatus) -> String {
    let Some(state) = cs.state.as_ref() else {
        return "unknown".to_string();
    };
    if state.running.is_some() {
        "running".to_string()
    } else if let Some(waiting) = state.waiting.as_ref() {
        waiting.reason.clone().unwrap_or_else(|| "waiting".to_string())
    } else if let Some(terminated) = state.terminated.as_ref() {
        terminated
            .reason
            .clone()
            .unwrap_or_else(|| "terminated".to_string())
    } else {
        "unknown".to_string()
    }
}

/// Build a record for one pod. `namespace` is used when the object carries none.
/// Returns `None` for pods without a name.
pub fn pod_record(pod: &Pod, namespace: &str) -> Option<PodRecord> {
    let name = pod.metadata.name.clone()?;
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| namespace.to_string());

    let mut record = PodRecord::new(name, namespace, pod_status(pod));
    record.node_name = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.clone())
        .filter(|n| !n.is_empty());
    record.start_time = pod
        .status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .map(|t| t.0);
    record.containers = pod
        .spec
        .as_ref()
        .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default();
    record.container_states = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| (cs.name.clone(), container_state(cs)))
                .collect()
        })
        .unwrap_or_default();
    record.labels = pod.metadata.labels.clone().unwrap_or_default();

    Some(record)
}

pub fn pod_records(pods: &[Pod], namespace: &str) -> Vec<PodRecord> {
    pods.iter().filter_map(|p| pod_record(p, namespace)).collect()
}

/// Count pods per scheduled node; unscheduled pods are ignored.
pub fn pods_per_node(pods: &[PodRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for pod in pods {
        if let Some(node) = pod.node_name.as_ref() {
            *counts.entry(node.clone()).or_insert(0) += 1;
        }
    }
    counts
}
