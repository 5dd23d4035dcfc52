//! Polling orchestrator.
//!
//! One cycle fetches pods per namespace, the nodes they run on and the VMs
//! behind those nodes, evaluates alerts and republishes every metric kind.
//! A failing namespace or source is logged and skipped; the rest of the
//! cycle still runs.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alerts::{self, ResourceKind};
use crate::collector::Collector;
use crate::config::Config;
use crate::health::HealthState;
use crate::kubernetes::ClusterSource;
use crate::publish::MetricsPublisher;
use crate::types::{NodeRecord, PodRecord, VmRecord};
use crate::vsphere::VmSource;

const ALERT_TYPE_STATUS: &str = "status";

/// Everything the loop and the HTTP surface share, built once at startup.
pub struct AppContext {
    pub config: Config,
    pub cluster: Arc<dyn ClusterSource>,
    pub vms: Option<Arc<dyn VmSource>>,
    pub publisher: MetricsPublisher,
    pub health: HealthState,
}

/// Outcome of one polling cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub pods: usize,
    pub nodes: usize,
    pub vms: usize,
    pub alerts: Vec<String>,
    pub errors: Vec<String>,
}

impl AppContext {
    fn collector(&self) -> Collector<'_> {
        Collector::new(self.cluster.as_ref(), self.vms.as_deref(), &self.config)
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let collector = self.collector();
        let mut report = CycleReport::default();

        let pods = self.pods_cycle(&collector, &mut report).await;

        let selected = if self.config.monitor_all_nodes {
            None
        } else {
            Some(pods.iter().filter_map(|p| p.node_name.clone()).collect::<BTreeSet<_>>())
        };

        if let Some(nodes) = self.nodes_cycle(&collector, selected.as_ref(), &mut report).await {
            self.vms_cycle(&collector, &nodes, &mut report).await;
        }

        self.health.record_cycle(&report.errors).await;
        report
    }

    async fn pods_cycle(&self, collector: &Collector<'_>, report: &mut CycleReport) -> Vec<PodRecord> {
        let mut pods = Vec::new();
        for ns in &self.config.namespaces {
            match collector.collect_pods(ns).await {
                Ok(records) => pods.extend(records),
                Err(e) => {
                    error!(namespace = %ns, error = %e, "Error monitoring pods");
                    report.errors.push(format!("namespace {}: {}", ns, e));
                }
            }
        }

        let found = alerts::pod_alerts(&pods, self.config.pod_problematic_threshold);
        self.raise(ResourceKind::Pod, found, report);

        self.publisher.update_pod_metrics(&pods);
        report.pods = pods.len();
        pods
    }

    /// Returns `None` when the node source failed.
    async fn nodes_cycle(
        &self,
        collector: &Collector<'_>,
        selected: Option<&BTreeSet<String>>,
        report: &mut CycleReport,
    ) -> Option<Vec<NodeRecord>> {
        let nodes = match selected {
            Some(names) if names.is_empty() => Vec::new(),
            _ => match collector.collect_nodes(selected).await {
                Ok(nodes) => nodes,
                Err(e) => {
                    error!(error = %e, "Error monitoring nodes");
                    report.errors.push(format!("nodes: {}", e));
                    return None;
                }
            },
        };

        let found = alerts::node_alerts(&nodes);
        self.raise(ResourceKind::Node, found, report);

        self.publisher.update_node_metrics(&nodes);
        report.nodes = nodes.len();
        Some(nodes)
    }

    async fn vms_cycle(&self, collector: &Collector<'_>, nodes: &[NodeRecord], report: &mut CycleReport) {
        let Some(source) = self.vms.as_deref() else {
            return;
        };

        let vms: Vec<VmRecord> = match collector.collect_vms(nodes).await {
            Ok(vms) => vms,
            Err(e) => {
                error!(error = %e, "Error monitoring VMware machines");
                report.errors.push(format!("vmware: {}", e));
                return;
            }
        };

        let mut found = alerts::vm_alerts(&vms);
        for vm in vms.iter().filter(|vm| vm.is_problematic()) {
            found.extend(source.infrastructure_alerts(vm).await);
        }
        self.raise(ResourceKind::Vmware, found, report);

        self.publisher.update_vm_metrics(&vms);
        report.vms = vms.len();
    }

    fn raise(&self, kind: ResourceKind, found: Vec<String>, report: &mut CycleReport) {
        for alert in found {
            match kind {
                ResourceKind::Pod => warn!("Pod Alert: {}", alert),
                ResourceKind::Node => warn!("Node Alert: {}", alert),
                ResourceKind::Vmware => warn!("VMware Alert: {}", alert),
            }
            self.publisher.record_alert(ALERT_TYPE_STATUS, kind);
            report.alerts.push(alert);
        }
    }
}

/// Run cycles every `monitoring_interval` seconds until `shutdown` fires.
/// A cycle in progress finishes; only the wait between cycles is interrupted.
pub async fn run(ctx: Arc<AppContext>, shutdown: CancellationToken) {
    let interval = Duration::from_secs(ctx.config.monitoring_interval);
    info!(
        interval_secs = ctx.config.monitoring_interval,
        namespaces = ?ctx.config.namespaces,
        "Starting monitoring loop"
    );

    while !shutdown.is_cancelled() {
        debug!("Collecting");
        let report = ctx.run_cycle().await;
        info!(
            pods = report.pods,
            nodes = report.nodes,
            vms = report.vms,
            alerts = report.alerts.len(),
            errors = report.errors.len(),
            "Monitoring cycle complete"
        );

        debug!("Idle");
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }

    info!("Monitoring loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MonitorError, Result};
    use crate::health::HealthStatus;
    use crate::kubernetes::NodeUsage;
    use crate::normalize::VmSnapshot;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{Node, Pod};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCluster {
        pods: Mutex<Vec<Pod>>,
        nodes: Vec<Node>,
        broken_namespaces: Vec<String>,
        nodes_fail: bool,
    }

    #[async_trait]
    impl ClusterSource for FakeCluster {
        async fn list_pods(&self, namespace: &str, _label_selector: Option<&str>) -> Result<Vec<Pod>> {
            if self.broken_namespaces.iter().any(|n| n == namespace) {
                return Err(MonitorError::Config(format!("namespace {} unavailable", namespace)));
            }
            Ok(self
                .pods
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
                .cloned()
                .collect())
        }

        async fn list_all_pods(&self) -> Result<Vec<Pod>> {
            Ok(self.pods.lock().unwrap().clone())
        }

        async fn list_nodes(&self) -> Result<Vec<Node>> {
            if self.nodes_fail {
                return Err(MonitorError::Config("nodes unavailable".to_string()));
            }
            Ok(self.nodes.clone())
        }

        async fn node_usage(&self) -> Result<NodeUsage> {
            Ok(NodeUsage::new())
        }
    }

    struct FakeVms {
        power_state: &'static str,
    }

    #[async_trait]
    impl VmSource for FakeVms {
        async fn fetch_vms(&self, targets: &[(String, String)]) -> Result<Vec<VmSnapshot>> {
            Ok(targets
                .iter()
                .map(|(vm, node)| VmSnapshot {
                    power_state: Some(self.power_state.to_string()),
                    ..VmSnapshot::unreachable(vm.clone(), node.clone())
                })
                .collect())
        }

        async fn infrastructure_alerts(&self, vm: &VmRecord) -> Vec<String> {
            vec![format!("Datastore ds1 for VM {} is low on space: 4.0% free", vm.name)]
        }
    }

    fn pod(name: &str, namespace: &str, node: &str, phase: &str) -> Pod {
        serde_json::from_value(serde_json::json!({
            "metadata": {"name": name, "namespace": namespace},
            "spec": {"nodeName": node, "containers": [{"name": "app"}]},
            "status": {
                "phase": phase,
                "containerStatuses": [{
                    "name": "app", "image": "app:1", "imageID": "", "ready": true,
                    "restartCount": 0, "state": {"running": {}}
                }]
            }
        }))
        .unwrap()
    }

    fn node(name: &str, ready: &str) -> Node {
        serde_json::from_value(serde_json::json!({
            "metadata": {"name": name, "labels": {"vm-name": format!("vm-{}", name)}},
            "status": {"conditions": [{"type": "Ready", "status": ready}]}
        }))
        .unwrap()
    }

    fn context(cluster: FakeCluster, vms: Option<Arc<dyn VmSource>>, config: Config) -> AppContext {
        AppContext {
            config,
            cluster: Arc::new(cluster),
            vms,
            publisher: MetricsPublisher::new().unwrap(),
            health: HealthState::new(),
        }
    }

    fn config(namespaces: &[&str]) -> Config {
        Config {
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_failing_namespace_does_not_stop_cycle() {
        let cluster = FakeCluster {
            pods: Mutex::new(vec![pod("web-0", "prod", "n1", "Running")]),
            nodes: vec![node("n1", "True"), node("n2", "True")],
            broken_namespaces: vec!["broken".to_string()],
            ..Default::default()
        };
        let ctx = context(cluster, None, config(&["broken", "prod"]));

        let report = ctx.run_cycle().await;
        assert_eq!(report.pods, 1);
        // only the node hosting a monitored pod
        assert_eq!(report.nodes, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("broken"));

        let text = ctx.publisher.render().unwrap();
        assert!(text.contains(r#"pod="web-0""#));
        assert!(text.contains(r#"k8s_node_status{node="n1",status="Ready",vmware_machine="vm-n1"} 1"#));
        assert!(!text.contains(r#"node="n2""#));

        let health = ctx.health.snapshot().await;
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_departed_pods_are_removed() {
        let cluster = Arc::new(FakeCluster {
            pods: Mutex::new(vec![
                pod("web-0", "prod", "n1", "Running"),
                pod("web-1", "prod", "n1", "Running"),
            ]),
            nodes: vec![node("n1", "True")],
            ..Default::default()
        });
        let ctx = AppContext {
            config: config(&["prod"]),
            cluster: cluster.clone(),
            vms: None,
            publisher: MetricsPublisher::new().unwrap(),
            health: HealthState::new(),
        };

        ctx.run_cycle().await;
        assert!(ctx.publisher.render().unwrap().contains(r#"pod="web-1""#));

        cluster.pods.lock().unwrap().retain(|p| p.metadata.name.as_deref() == Some("web-0"));
        let report = ctx.run_cycle().await;
        assert!(report.errors.is_empty());
        let text = ctx.publisher.render().unwrap();
        assert!(text.contains(r#"pod="web-0""#));
        assert!(!text.contains(r#"pod="web-1""#));
        assert_eq!(ctx.health.snapshot().await.status, HealthStatus::Ok);
    }

    #[tokio::test]
    async fn test_no_pods_clears_nodes() {
        let cluster = FakeCluster {
            nodes: vec![node("n1", "True")],
            nodes_fail: true,
            ..Default::default()
        };
        let ctx = context(cluster, None, config(&["prod"]));

        // nothing selected, so the node source is never asked
        let report = ctx.run_cycle().await;
        assert!(report.errors.is_empty());
        assert_eq!(report.nodes, 0);
    }

    #[tokio::test]
    async fn test_alerts_counted_per_resource() {
        let cluster = FakeCluster {
            pods: Mutex::new(vec![pod("job-0", "prod", "n1", "Failed")]),
            nodes: vec![node("n1", "False")],
            ..Default::default()
        };
        let vms: Arc<dyn VmSource> = Arc::new(FakeVms { power_state: "POWERED_OFF" });
        let mut cfg = config(&["prod"]);
        cfg.monitor_all_nodes = true;
        let ctx = context(cluster, Some(vms), cfg);

        let report = ctx.run_cycle().await;
        assert_eq!(report.vms, 1);
        assert_eq!(
            report.alerts,
            vec![
                "Pod job-0 in namespace prod is in Failed state",
                "Node n1 is in NotReady state",
                "Node n1 is not Ready",
                "VMware machine vm-n1 (node n1) is in poweredOff state",
                "Datastore ds1 for VM vm-n1 is low on space: 4.0% free",
            ]
        );

        let text = ctx.publisher.render().unwrap();
        assert!(text.contains(r#"k8s_monitor_alerts_total{alert_type="status",resource_type="pod"} 1"#));
        assert!(text.contains(r#"k8s_monitor_alerts_total{alert_type="status",resource_type="node"} 2"#));
        assert!(text.contains(r#"k8s_monitor_alerts_total{alert_type="status",resource_type="vmware"} 2"#));
    }

    #[tokio::test]
    async fn test_node_failure_skips_vms() {
        let cluster = FakeCluster {
            pods: Mutex::new(vec![pod("web-0", "prod", "n1", "Running")]),
            nodes_fail: true,
            ..Default::default()
        };
        let vms: Arc<dyn VmSource> = Arc::new(FakeVms { power_state: "POWERED_ON" });
        let ctx = context(cluster, Some(vms), config(&["prod"]));

        let report = ctx.run_cycle().await;
        assert_eq!(report.pods, 1);
        assert_eq!(report.vms, 0);
        assert_eq!(report.errors, vec!["nodes: configuration: nodes unavailable"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut cfg = config(&["prod"]);
        cfg.monitoring_interval = 3600;
        let ctx = Arc::new(context(FakeCluster::default(), None, cfg));
        let token = CancellationToken::new();

        let handle = tokio::spawn(run(ctx.clone(), token.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert!(ctx.health.snapshot().await.last_cycle.is_some());
    }
}
