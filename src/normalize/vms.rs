use std::collections::BTreeSet;

use crate::types::{NodeRecord, VmRecord, VmStatus};

/// Raw VM state as returned by a VM source, before classification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmSnapshot {
    pub name: String,
    pub node_name: String,
    /// `None` when the VM could not be located or queried.
    pub power_state: Option<String>,
    /// MHz
    pub cpu_usage: Option<f64>,
    /// MHz
    pub cpu_capacity: Option<f64>,
    /// bytes
    pub memory_usage: Option<f64>,
    /// bytes
    pub memory_capacity: Option<f64>,
}

impl VmSnapshot {
    pub fn unreachable(name: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_name: node_name.into(),
            ..Default::default()
        }
    }
}

/// Accepts both managed-object (`poweredOn`) and REST (`POWERED_ON`) spellings.
pub fn vm_status(power_state: Option<&str>) -> VmStatus {
    match power_state {
        None => VmStatus::Disconnected,
        Some("poweredOn") | Some("POWERED_ON") => VmStatus::PoweredOn,
        Some("poweredOff") | Some("POWERED_OFF") => VmStatus::PoweredOff,
        Some("suspended") | Some("SUSPENDED") => VmStatus::Suspended,
        Some(_) => VmStatus::Unknown,
    }
}

pub fn vm_record(snapshot: &VmSnapshot) -> VmRecord {
    let mut record = VmRecord::new(
        snapshot.name.clone(),
        vm_status(snapshot.power_state.as_deref()),
        snapshot.node_name.clone(),
    );
    record.cpu_usage = snapshot.cpu_usage;
    record.memory_usage = snapshot.memory_usage;
    record.cpu_capacity = snapshot.cpu_capacity;
    record.memory_capacity = snapshot.memory_capacity;
    record
}

pub fn vm_records(snapshots: &[VmSnapshot]) -> Vec<VmRecord> {
    snapshots.iter().map(vm_record).collect()
}

/// (vm name, node name) pairs for nodes carrying a VM link, first node wins
/// when several nodes point at the same VM.
pub fn vm_targets(nodes: &[NodeRecord]) -> Vec<(String, String)> {
    let mut seen = BTreeSet::new();
    nodes
        .iter()
        .filter_map(|n| {
            n.vmware_machine_name
                .as_ref()
                .map(|vm| (vm.clone(), n.name.clone()))
        })
        .filter(|(vm, _)| seen.insert(vm.clone()))
        .collect()
}
