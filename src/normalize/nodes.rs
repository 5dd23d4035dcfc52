use k8s_openapi::api::core::v1::Node;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::parsing::{parse_cpu, parse_memory, parse_usage_cpu};
use crate::types::{NodeRecord, NodeResources, NodeStatus};

/// Labels consulted, in order, to find the VM backing a node.
const VM_NAME_LABELS: &[&str] = &["vm-name", "vsphere-vm-name"];

/// `Ready` condition "True" -> Ready, anything else -> NotReady,
/// no `Ready` condition (or no conditions at all) -> Unknown.
pub fn node_status(node: &Node) -> NodeStatus {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|ready| {
            if ready.status == "True" {
                NodeStatus::Ready
            } else {
                NodeStatus::NotReady
            }
        })
        .unwrap_or(NodeStatus::Unknown)
}

pub fn node_conditions(node: &Node) -> Vec<(String, bool)> {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .map(|c| (c.type_.clone(), c.status == "True"))
                .collect()
        })
        .unwrap_or_default()
}

/// Best-effort VM link: the first non-empty VM label, else the node name itself.
pub fn vmware_machine_name(node_name: &str, labels: &BTreeMap<String, String>) -> String {
    VM_NAME_LABELS
        .iter()
        .filter_map(|key| labels.get(*key))
        .find(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| node_name.to_string())
}

/// Build a record without resource figures. Returns `None` for unnamed nodes.
pub fn node_record(node: &Node) -> Option<NodeRecord> {
    let name = node.metadata.name.clone()?;
    let labels = node.metadata.labels.clone().unwrap_or_default();

    let mut record = NodeRecord::new(name, node_status(node));
    record.conditions = node_conditions(node);
    record.vmware_machine_name = Some(vmware_machine_name(&record.name, &labels));
    record.labels = labels;
    record.creation_time = node.metadata.creation_timestamp.as_ref().map(|t| t.0);
    Some(record)
}

/// Records for all named nodes, optionally restricted to `only`.
pub fn node_records(nodes: &[Node], only: Option<&BTreeSet<String>>) -> Vec<NodeRecord> {
    nodes
        .iter()
        .filter_map(node_record)
        .filter(|r| only.map(|names| names.contains(&r.name)).unwrap_or(true))
        .collect()
}

/// Build a record including usage (from metrics.k8s.io) and capacity.
/// Missing figures count as "0"; malformed quantities fail the record.
pub fn node_record_with_usage(
    node: &Node,
    usage: Option<&BTreeMap<String, String>>,
    pods_running: usize,
) -> Option<Result<NodeRecord>> {
    let mut record = node_record(node)?;

    let capacity = node.status.as_ref().and_then(|s| s.capacity.as_ref());
    let capacity_of = |key: &str| {
        capacity
            .and_then(|c| c.get(key))
            .map(|q| q.0.as_str())
            .unwrap_or("0")
    };
    let usage_of = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .map(String::as_str)
            .unwrap_or("0")
    };

    let resources = (|| -> Result<NodeResources> {
        Ok(NodeResources {
            cpu_usage: parse_usage_cpu(usage_of("cpu"))?,
            memory_usage: parse_memory(usage_of("memory"))?,
            cpu_capacity: parse_cpu(capacity_of("cpu"))?,
            memory_capacity: parse_memory(capacity_of("memory"))?,
        })
    })();

    Some(resources.map(|resources| {
        record.resources = resources;
        record.pods_running = pods_running;
        record
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus as K8sNodeStatus};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn node(name: &str, conditions: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(K8sNodeStatus {
                conditions: Some(
                    conditions
                        .iter()
                        .map(|(t, s)| NodeCondition {
                            type_: t.to_string(),
                            status: s.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_node_status_from_ready_condition() {
        assert_eq!(node_status(&node("a", &[("Ready", "True")])), NodeStatus::Ready);
        assert_eq!(node_status(&node("a", &[("Ready", "False")])), NodeStatus::NotReady);
        assert_eq!(node_status(&node("a", &[("Ready", "Unknown")])), NodeStatus::NotReady);
        assert_eq!(
            node_status(&node("a", &[("DiskPressure", "False")])),
            NodeStatus::Unknown
        );
        assert_eq!(node_status(&node("a", &[])), NodeStatus::Unknown);

        let bare = Node {
            status: None,
            ..node("a", &[])
        };
        assert_eq!(node_status(&bare), NodeStatus::Unknown);
    }

    #[test]
    fn test_conditions_keep_api_order() {
        let n = node("a", &[("Ready", "False"), ("DiskPressure", "True")]);
        assert_eq!(
            node_conditions(&n),
            vec![("Ready".to_string(), false), ("DiskPressure".to_string(), true)]
        );
    }

    #[test]
    fn test_vmware_machine_name_lookup() {
        let mut labels = BTreeMap::new();
        assert_eq!(vmware_machine_name("worker-1", &labels), "worker-1");

        labels.insert("vsphere-vm-name".to_string(), "vs-vm".to_string());
        assert_eq!(vmware_machine_name("worker-1", &labels), "vs-vm");

        labels.insert("vm-name".to_string(), "vm-1".to_string());
        assert_eq!(vmware_machine_name("worker-1", &labels), "vm-1");
    }

    #[test]
    fn test_node_records_filter() {
        let nodes = vec![node("a", &[("Ready", "True")]), node("b", &[("Ready", "True")])];
        assert_eq!(node_records(&nodes, None).len(), 2);

        let only: BTreeSet<String> = ["b".to_string()].into();
        let records = node_records(&nodes, Some(&only));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "b");
        assert_eq!(records[0].vmware_machine_name.as_deref(), Some("b"));
    }

    #[test]
    fn test_node_record_with_usage() {
        let mut n = node("a", &[("Ready", "True")]);
        let capacity: BTreeMap<String, Quantity> = [
            ("cpu".to_string(), Quantity("4".to_string())),
            ("memory".to_string(), Quantity("8Gi".to_string())),
        ]
        .into();
        n.status.as_mut().unwrap().capacity = Some(capacity);

        let usage: BTreeMap<String, String> = [
            ("cpu".to_string(), "2000m".to_string()),
            ("memory".to_string(), "2Gi".to_string()),
        ]
        .into();

        let record = node_record_with_usage(&n, Some(&usage), 7).unwrap().unwrap();
        assert_eq!(record.resources.cpu_capacity, 4.0);
        assert_eq!(record.resources.cpu_usage, 2.0);
        assert_eq!(record.cpu_percent(), 50.0);
        assert_eq!(record.memory_percent(), 25.0);
        assert_eq!(record.pods_running, 7);

        // no metrics and no capacity -> zeros, not an error
        let bare = node_record_with_usage(&node("b", &[]), None, 0).unwrap().unwrap();
        assert_eq!(bare.cpu_percent(), 0.0);
    }

    #[test]
    fn test_node_record_with_nanocore_usage() {
        let mut n = node("a", &[("Ready", "True")]);
        n.status.as_mut().unwrap().capacity =
            Some([("cpu".to_string(), Quantity("4".to_string()))].into());

        let usage: BTreeMap<String, String> = [
            ("cpu".to_string(), "2000000000n".to_string()),
            ("memory".to_string(), "2048000Ki".to_string()),
        ]
        .into();

        let record = node_record_with_usage(&n, Some(&usage), 0).unwrap().unwrap();
        assert_eq!(record.resources.cpu_usage, 2.0);
        assert_eq!(record.cpu_percent(), 50.0);
        assert_eq!(record.resources.memory_usage, 2048000.0 * 1024.0);
    }

    #[test]
    fn test_node_record_with_bad_quantity() {
        let usage: BTreeMap<String, String> = [("cpu".to_string(), "lots".to_string())].into();
        let result = node_record_with_usage(&node("a", &[]), Some(&usage), 0).unwrap();
        assert!(result.is_err());
    }
}
