use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::parsing::percent_of;

/// Node health derived from its `Ready` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    Ready,
    NotReady,
    Unknown,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Ready => "Ready",
            NodeStatus::NotReady => "NotReady",
            NodeStatus::Unknown => "Unknown",
        }
    }

    pub fn is_problematic(&self) -> bool {
        *self != NodeStatus::Ready
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pod phase, with `CrashLoopBackOff` promoted to a status of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PodStatus {
    Running,
    Pending,
    Succeeded,
    Failed,
    Unknown,
    CrashLoopBackOff,
}

impl PodStatus {
    /// Map a raw `status.phase`; unrecognised phases become `Unknown`.
    pub fn from_phase(phase: &str) -> Self {
        match phase {
            "Running" => PodStatus::Running,
            "Pending" => PodStatus::Pending,
            "Succeeded" => PodStatus::Succeeded,
            "Failed" => PodStatus::Failed,
            "CrashLoopBackOff" => PodStatus::CrashLoopBackOff,
            _ => PodStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodStatus::Running => "Running",
            PodStatus::Pending => "Pending",
            PodStatus::Succeeded => "Succeeded",
            PodStatus::Failed => "Failed",
            PodStatus::Unknown => "Unknown",
            PodStatus::CrashLoopBackOff => "CrashLoopBackOff",
        }
    }

    pub fn is_problematic(&self) -> bool {
        matches!(
            self,
            PodStatus::Pending | PodStatus::Failed | PodStatus::Unknown | PodStatus::CrashLoopBackOff
        )
    }
}

impl fmt::Display for PodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Power/connection state of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VmStatus {
    PoweredOn,
    PoweredOff,
    Suspended,
    Disconnected,
    Unknown,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::PoweredOn => "poweredOn",
            VmStatus::PoweredOff => "poweredOff",
            VmStatus::Suspended => "suspended",
            VmStatus::Disconnected => "disconnected",
            VmStatus::Unknown => "unknown",
        }
    }

    pub fn is_problematic(&self) -> bool {
        matches!(
            self,
            VmStatus::PoweredOff | VmStatus::Suspended | VmStatus::Disconnected
        )
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU (cores) and memory (bytes) usage and capacity of a node.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NodeResources {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub cpu_capacity: f64,
    pub memory_capacity: f64,
}

/// Snapshot of one cluster node for a single polling cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub name: String,
    pub status: NodeStatus,
    pub resources: NodeResources,
    /// Condition type -> status == "True", in the order the API reported them.
    pub conditions: Vec<(String, bool)>,
    pub labels: BTreeMap<String, String>,
    pub vmware_machine_name: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub pods_running: usize,
}

impl NodeRecord {
    pub fn new(name: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            name: name.into(),
            status,
            resources: NodeResources::default(),
            conditions: Vec::new(),
            labels: BTreeMap::new(),
            vmware_machine_name: None,
            creation_time: None,
            pods_running: 0,
        }
    }

    pub fn is_problematic(&self) -> bool {
        self.status.is_problematic()
    }

    pub fn condition(&self, name: &str) -> Option<bool> {
        self.conditions
            .iter()
            .find(|(c, _)| c == name)
            .map(|(_, v)| *v)
    }

    pub fn cpu_percent(&self) -> f64 {
        percent_of(self.resources.cpu_usage, self.resources.cpu_capacity)
    }

    pub fn memory_percent(&self) -> f64 {
        percent_of(self.resources.memory_usage, self.resources.memory_capacity)
    }
}

/// Snapshot of one pod for a single polling cycle. Keyed by (namespace, name).
#[derive(Debug, Clone, PartialEq)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    pub status: PodStatus,
    pub node_name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub containers: Vec<String>,
    /// Container name -> "running", a waiting/terminated reason, or "unknown".
    pub container_states: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
}

impl PodRecord {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, status: PodStatus) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            status,
            node_name: None,
            start_time: None,
            containers: Vec::new(),
            container_states: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn is_problematic(&self) -> bool {
        self.status.is_problematic()
    }

    /// Seconds since `start_time`, measured against the current clock.
    pub fn age(&self) -> Option<f64> {
        self.age_at(Utc::now())
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Option<f64> {
        self.start_time
            .map(|st| (now - st).num_milliseconds() as f64 / 1000.0)
    }
}

/// Snapshot of one virtual machine backing a node.
#[derive(Debug, Clone, PartialEq)]
pub struct VmRecord {
    pub name: String,
    pub status: VmStatus,
    pub node_name: String,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub cpu_capacity: Option<f64>,
    pub memory_capacity: Option<f64>,
}

impl VmRecord {
    pub fn new(name: impl Into<String>, status: VmStatus, node_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            node_name: node_name.into(),
            cpu_usage: None,
            memory_usage: None,
            cpu_capacity: None,
            memory_capacity: None,
        }
    }

    pub fn is_problematic(&self) -> bool {
        self.status.is_problematic()
    }

    pub fn cpu_percent(&self) -> Option<f64> {
        optional_percent(self.cpu_usage, self.cpu_capacity)
    }

    pub fn memory_percent(&self) -> Option<f64> {
        optional_percent(self.memory_usage, self.memory_capacity)
    }
}

fn optional_percent(usage: Option<f64>, capacity: Option<f64>) -> Option<f64> {
    match (usage, capacity) {
        (Some(u), Some(c)) if c > 0.0 => Some(u / c * 100.0),
        _ => None,
    }
}
