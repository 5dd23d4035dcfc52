// Adapters from raw cluster/VM objects into the typed records in `types`.
pub mod pods;
pub mod nodes;
pub mod vms;

pub use pods::{container_state, pod_record, pod_records, pod_status, pods_per_node};
pub use nodes::{
    node_conditions, node_record, node_record_with_usage, node_records, node_status,
    vmware_machine_name,
};
pub use vms::{vm_record, vm_records, vm_status, vm_targets, VmSnapshot};
