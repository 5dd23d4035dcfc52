use chrono::{Duration, Utc};
use k8s_node_monitor::normalize::{self, VmSnapshot};
use k8s_node_monitor::{
    load_config_with_env, node_alerts, parse_cpu, parse_memory, pod_alerts_at, vm_alerts,
    ClusterSummary, MetricsPublisher, MockEnvironment, NodeRecord, NodeResources, NodeStatus,
    PodStatus, VmRecord, VmStatus,
};
use k8s_openapi::api::core::v1::{Node, Pod};
use std::io::Write;

#[test]
fn test_quantity_parsing() {
    assert_eq!(parse_memory("1Gi").unwrap(), 1073741824.0);
    assert_eq!(parse_memory("2M").unwrap(), 2_000_000.0);
    assert_eq!(parse_memory("2m").unwrap(), 2_000_000.0);
    assert_eq!(parse_memory("  512Mi ").unwrap(), 512.0 * 1024.0 * 1024.0);
    assert_eq!(parse_memory("1000").unwrap(), 1000.0);
    assert_eq!(parse_cpu("250m").unwrap(), 0.25);
    assert_eq!(parse_cpu("2").unwrap(), 2.0);

    // lowercase binary suffixes are not recognised
    assert!(parse_memory("1gi").is_err());
    assert!(parse_memory("Gi").is_err());
    assert!(parse_cpu("fast").is_err());
}

#[test]
fn test_zero_capacity_percentages() {
    let mut node = NodeRecord::new("n", NodeStatus::Ready);
    node.resources = NodeResources {
        cpu_usage: 2.0,
        memory_usage: 1024.0,
        cpu_capacity: 0.0,
        memory_capacity: 0.0,
    };
    assert_eq!(node.cpu_percent(), 0.0);
    assert_eq!(node.memory_percent(), 0.0);

    let mut vm = VmRecord::new("vm", VmStatus::PoweredOn, "n");
    vm.cpu_usage = Some(100.0);
    vm.cpu_capacity = Some(0.0);
    assert_eq!(vm.cpu_percent(), None);
}

#[test]
fn test_crash_looping_pod_end_to_end() {
    let pod: Pod = serde_json::from_value(serde_json::json!({
        "metadata": {"name": "api-7f9", "namespace": "shop"},
        "spec": {"nodeName": "worker-1", "containers": [{"name": "api"}]},
        "status": {
            "phase": "Running",
            "startTime": (Utc::now() - Duration::seconds(900)).to_rfc3339(),
            "containerStatuses": [{
                "name": "api", "image": "api:2", "imageID": "", "ready": false,
                "restartCount": 12,
                "state": {"waiting": {"reason": "CrashLoopBackOff"}}
            }]
        }
    }))
    .unwrap();

    let record = normalize::pod_record(&pod, "shop").unwrap();
    assert_eq!(record.status, PodStatus::CrashLoopBackOff);
    assert!(record.is_problematic());

    let alerts = pod_alerts_at(&[record], 300, Utc::now());
    assert_eq!(alerts.len(), 3);
    assert_eq!(alerts[0], "Pod api-7f9 in namespace shop is in CrashLoopBackOff state");
    assert!(alerts[1].starts_with("Pod api-7f9 in namespace shop has been in CrashLoopBackOff state for"));
    assert!(alerts[1].ends_with("(threshold: 300s)"));
    assert_eq!(
        alerts[2],
        "Container api in pod api-7f9 (namespace shop) is in CrashLoopBackOff state"
    );
}

#[test]
fn test_not_ready_node_alert_order() {
    let node: Node = serde_json::from_value(serde_json::json!({
        "metadata": {"name": "worker-2"},
        "status": {"conditions": [
            {"type": "Ready", "status": "False"},
            {"type": "DiskPressure", "status": "True"}
        ]}
    }))
    .unwrap();

    let record = normalize::node_record(&node).unwrap();
    let alerts = node_alerts(&[record]);
    assert_eq!(
        alerts,
        vec![
            "Node worker-2 is in NotReady state",
            "Node worker-2 is not Ready",
            "Node worker-2 has condition DiskPressure",
        ]
    );
    assert_eq!(alerts, node_alerts(&[normalize::node_record(&node).unwrap()]));
}

#[test]
fn test_vm_cpu_threshold() {
    let snapshot = VmSnapshot {
        name: "vm-1".to_string(),
        node_name: "worker-1".to_string(),
        power_state: Some("poweredOn".to_string()),
        cpu_usage: Some(1000.0),
        cpu_capacity: Some(4000.0),
        ..Default::default()
    };
    let record = normalize::vm_record(&snapshot);
    assert_eq!(record.cpu_percent(), Some(25.0));
    assert!(vm_alerts(&[record]).is_empty());

    let busy = normalize::vm_record(&VmSnapshot {
        cpu_usage: Some(3700.0),
        ..snapshot
    });
    assert_eq!(
        vm_alerts(&[busy]),
        vec!["VMware machine vm-1 (node worker-1) has high CPU usage: 92.5%"]
    );

    let missing = normalize::vm_record(&VmSnapshot::unreachable("vm-2", "worker-2"));
    assert_eq!(missing.status, VmStatus::Disconnected);
}

#[test]
fn test_publication_drops_departed_entities() {
    let publisher = MetricsPublisher::new().unwrap();
    let vm = |name: &str| VmRecord::new(name, VmStatus::PoweredOn, "worker-1");

    publisher.update_vm_metrics(&[vm("vm-a"), vm("vm-b")]);
    publisher.update_node_metrics(&[NodeRecord::new("worker-1", NodeStatus::Ready)]);
    let first = publisher.render().unwrap();
    assert!(first.contains(r#"vmware_machine="vm-b""#));

    publisher.update_vm_metrics(&[vm("vm-a")]);
    let second = publisher.render().unwrap();
    assert!(second.contains(r#"vmware_machine="vm-a""#));
    assert!(!second.contains(r#"vmware_machine="vm-b""#));
    // other kinds are untouched
    assert!(second.contains(r#"k8s_node_status{node="worker-1",status="Ready",vmware_machine="unknown"} 1"#));
}

#[test]
fn test_config_file_and_env_layers() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "namespaces: [prod, staging]\nmonitoring_interval: 30\nvmware:\n  host: vcenter.local\n  username: monitor\n  password: secret"
    )
    .unwrap();

    let env = MockEnvironment::new()
        .with_var("POD_MONITOR_MONITORING_INTERVAL", "10")
        .with_var("POD_MONITOR_VMWARE_DISABLE_SSL_VERIFICATION", "TRUE");
    let config = load_config_with_env(Some(file.path()), &env).unwrap();

    assert_eq!(config.namespaces, vec!["prod", "staging"]);
    assert_eq!(config.monitoring_interval, 10);
    let vmware = config.vmware.unwrap();
    assert_eq!(vmware.host, "vcenter.local");
    assert_eq!(vmware.port, 443);
    assert!(vmware.disable_ssl_verification);
}

#[test]
fn test_cluster_summary_from_nodes() {
    let node: Node = serde_json::from_value(serde_json::json!({
        "metadata": {"name": "worker-1"},
        "status": {
            "capacity": {"cpu": "4", "memory": "16Gi"},
            "conditions": [{"type": "Ready", "status": "True"}]
        }
    }))
    .unwrap();
    let usage = std::collections::BTreeMap::from([
        ("cpu".to_string(), "500m".to_string()),
        ("memory".to_string(), "4Gi".to_string()),
    ]);

    let record = normalize::node_record_with_usage(&node, Some(&usage), 5)
        .unwrap()
        .unwrap();
    let summary = ClusterSummary::new(vec![record], 5, None);

    assert_eq!(summary.healthy_nodes, 1);
    let lines = summary.render_prometheus();
    assert!(lines.contains(&r#"node_cpu_percent{node="worker-1"} 12.5"#.to_string()));
    assert!(lines.contains(&r#"node_memory_percent{node="worker-1"} 25"#.to_string()));
}
