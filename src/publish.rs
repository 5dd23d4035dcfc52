//! Prometheus publication of normalized records.
//!
//! Each `update_*` call resets every series of that record kind before
//! writing the new cycle's values, so entities that disappeared between
//! cycles leave no stale series behind.

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::alerts::ResourceKind;
use crate::types::{NodeRecord, PodRecord, VmRecord};

const UNKNOWN_LABEL: &str = "unknown";

#[derive(Clone)]
pub struct MetricsPublisher {
    registry: Registry,
    pod_status: GaugeVec,
    pod_age: GaugeVec,
    container_status: GaugeVec,
    node_status: GaugeVec,
    node_condition: GaugeVec,
    vm_status: GaugeVec,
    vm_cpu_usage: GaugeVec,
    vm_memory_usage: GaugeVec,
    vm_cpu_percent: GaugeVec,
    vm_memory_percent: GaugeVec,
    alerts: CounterVec,
}

fn gauge(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    let g = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

impl MetricsPublisher {
    /// Create a publisher with its own registry.
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let pod_labels = &["namespace", "pod", "status", "node"];
        let vm_labels = &["vmware_machine", "node"];

        let alerts = CounterVec::new(
            Opts::new("k8s_monitor_alerts_total", "Total number of alerts generated"),
            &["alert_type", "resource_type"],
        )?;
        registry.register(Box::new(alerts.clone()))?;

        Ok(Self {
            pod_status: gauge(
                &registry,
                "k8s_pod_status",
                "Status of Kubernetes pods (0=problematic, 1=ok)",
                pod_labels,
            )?,
            pod_age: gauge(
                &registry,
                "k8s_pod_age_seconds",
                "Age of Kubernetes pods in seconds",
                pod_labels,
            )?,
            container_status: gauge(
                &registry,
                "k8s_container_status",
                "Status of Kubernetes containers (0=problematic, 1=ok)",
                &["namespace", "pod", "container", "status"],
            )?,
            node_status: gauge(
                &registry,
                "k8s_node_status",
                "Status of Kubernetes nodes (0=problematic, 1=ok)",
                &["node", "status", "vmware_machine"],
            )?,
            node_condition: gauge(
                &registry,
                "k8s_node_condition",
                "Conditions of Kubernetes nodes (0=false, 1=true)",
                &["node", "condition"],
            )?,
            vm_status: gauge(
                &registry,
                "vmware_machine_status",
                "Status of VMware machines (0=problematic, 1=ok)",
                &["vmware_machine", "status", "node"],
            )?,
            vm_cpu_usage: gauge(
                &registry,
                "vmware_machine_cpu_usage",
                "CPU usage of VMware machines in MHz",
                vm_labels,
            )?,
            vm_memory_usage: gauge(
                &registry,
                "vmware_machine_memory_usage",
                "Memory usage of VMware machines in bytes",
                vm_labels,
            )?,
            vm_cpu_percent: gauge(
                &registry,
                "vmware_machine_cpu_percent",
                "CPU usage percentage of VMware machines",
                vm_labels,
            )?,
            vm_memory_percent: gauge(
                &registry,
                "vmware_machine_memory_percent",
                "Memory usage percentage of VMware machines",
                vm_labels,
            )?,
            alerts,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn update_pod_metrics(&self, pods: &[PodRecord]) {
        self.pod_status.reset();
        self.pod_age.reset();
        self.container_status.reset();

        for pod in pods {
            let node = pod.node_name.as_deref().unwrap_or(UNKNOWN_LABEL);
            let labels = [pod.namespace.as_str(), pod.name.as_str(), pod.status.as_str(), node];

            self.pod_status
                .with_label_values(&labels)
                .set(ok_value(!pod.is_problematic()));

            if let Some(age) = pod.age() {
                self.pod_age.with_label_values(&labels).set(age);
            }

            for (container, state) in &pod.container_states {
                self.container_status
                    .with_label_values(&[&pod.namespace, &pod.name, container, state])
                    .set(ok_value(state == "running"));
            }
        }
    }

    pub fn update_node_metrics(&self, nodes: &[NodeRecord]) {
        self.node_status.reset();
        self.node_condition.reset();

        for node in nodes {
            let vm = node.vmware_machine_name.as_deref().unwrap_or(UNKNOWN_LABEL);
            self.node_status
                .with_label_values(&[&node.name, node.status.as_str(), vm])
                .set(ok_value(!node.is_problematic()));

            for (condition, value) in &node.conditions {
                self.node_condition
                    .with_label_values(&[&node.name, condition])
                    .set(ok_value(*value));
            }
        }
    }

    pub fn update_vm_metrics(&self, vms: &[VmRecord]) {
        self.vm_status.reset();
        self.vm_cpu_usage.reset();
        self.vm_memory_usage.reset();
        self.vm_cpu_percent.reset();
        self.vm_memory_percent.reset();

        for vm in vms {
            self.vm_status
                .with_label_values(&[&vm.name, vm.status.as_str(), &vm.node_name])
                .set(ok_value(!vm.is_problematic()));

            let labels = [vm.name.as_str(), vm.node_name.as_str()];
            let series = [
                (&self.vm_cpu_usage, vm.cpu_usage),
                (&self.vm_memory_usage, vm.memory_usage),
                (&self.vm_cpu_percent, vm.cpu_percent()),
                (&self.vm_memory_percent, vm.memory_percent()),
            ];
            for (gauge, value) in series {
                if let Some(v) = value {
                    gauge.with_label_values(&labels).set(v);
                }
            }
        }
    }

    pub fn record_alert(&self, alert_type: &str, resource: ResourceKind) {
        self.alerts
            .with_label_values(&[alert_type, resource.as_str()])
            .inc();
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn ok_value(ok: bool) -> f64 {
    if ok {
        1.0
    } else {
        0.0
    }
}
