// Public modules
pub mod types;
pub mod error;
pub mod config;
pub mod parsing;
pub mod normalize;
pub mod alerts;
pub mod publish;
pub mod kubernetes;
pub mod vsphere;
pub mod collector;
pub mod report;
pub mod health;
pub mod monitor;
pub mod api;

// Re-export commonly used items
pub use types::*;
pub use error::{MonitorError, Result};
pub use config::{load_config, load_config_with_env, Config, VmwareConfig, EnvironmentProvider, SystemEnvironment, MockEnvironment};
pub use parsing::{parse_cpu, parse_memory, parse_usage_cpu, percent_of};
pub use alerts::{node_alerts, pod_alerts, pod_alerts_at, vm_alerts, ResourceKind};
pub use publish::MetricsPublisher;
pub use kubernetes::{ClusterSource, KubernetesSource};
pub use vsphere::{VmSource, VsphereClient};
pub use collector::Collector;
pub use report::{ClusterSummary, OutputFormat};
pub use health::{HealthState, HealthStatus};
pub use monitor::{AppContext, CycleReport};
