//! VM state from vCenter.
//!
//! Lookup, power state and datastores come from the vSphere Automation REST
//! API. Quick stats and host health come from the VI/JSON API, which accepts
//! the same session header.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::VmwareConfig;
use crate::error::{MonitorError, Result};
use crate::normalize::VmSnapshot;
use crate::types::VmRecord;

const SESSION_HEADER: &str = "vmware-api-session-id";

/// VI/JSON release path segment; vCenter 8.0U1 and later serve it.
const VIM_RELEASE: &str = "8.0.1.0";

const MIB: f64 = 1024.0 * 1024.0;

/// Datastores with less free space than this percentage raise an alert.
const LOW_DATASTORE_FREE_PERCENT: f64 = 10.0;

/// Source of VM snapshots for (vm name, node name) pairs.
#[async_trait]
pub trait VmSource: Send + Sync {
    /// One snapshot per target, in target order. VMs that cannot be found
    /// come back as unreachable snapshots rather than errors.
    async fn fetch_vms(&self, targets: &[(String, String)]) -> Result<Vec<VmSnapshot>>;

    /// Extra alerts about the infrastructure under a problematic VM.
    async fn infrastructure_alerts(&self, _vm: &VmRecord) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Deserialize)]
struct VmSummary {
    vm: String,
    name: String,
    power_state: String,
    #[serde(default)]
    cpu_count: Option<u32>,
    #[serde(default, rename = "memory_size_MiB")]
    memory_size_mib: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct VmInfo {
    #[serde(default)]
    disks: HashMap<String, DiskInfo>,
}

#[derive(Debug, Deserialize)]
struct DiskInfo {
    #[serde(default)]
    backing: Option<DiskBacking>,
}

#[derive(Debug, Deserialize)]
struct DiskBacking {
    #[serde(default)]
    vmdk_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DatastoreSummary {
    name: String,
    #[serde(default)]
    free_space: Option<u64>,
    #[serde(default)]
    capacity: Option<u64>,
}

/// `VirtualMachine/{id}/summary` from the VI/JSON API.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VimVmSummary {
    #[serde(default)]
    runtime: VimVmRuntime,
    #[serde(default)]
    config: VimVmConfig,
    #[serde(default)]
    quick_stats: VimVmQuickStats,
}

#[derive(Debug, Default, Deserialize)]
struct VimVmRuntime {
    #[serde(default)]
    host: Option<ManagedObjectRef>,
}

#[derive(Debug, Deserialize)]
struct ManagedObjectRef {
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VimVmConfig {
    #[serde(default)]
    num_cpu: Option<u32>,
    #[serde(default, rename = "memorySizeMB")]
    memory_size_mb: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VimVmQuickStats {
    /// MHz
    #[serde(default)]
    overall_cpu_usage: Option<u64>,
    /// MB
    #[serde(default)]
    guest_memory_usage: Option<u64>,
}

/// `HostSystem/{id}/summary` from the VI/JSON API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VimHostSummary {
    #[serde(default)]
    hardware: Option<VimHostHardware>,
    overall_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VimHostHardware {
    #[serde(default)]
    cpu_mhz: Option<u32>,
}

pub struct VsphereClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    session: Mutex<Option<String>>,
    vm_ids: Mutex<HashMap<String, String>>,
}

impl VsphereClient {
    pub fn new(cfg: &VmwareConfig) -> Result<Self> {
        let base_url = format!("https://{}:{}", cfg.host, cfg.port);
        let http = Client::builder()
            .danger_accept_invalid_certs(cfg.disable_ssl_verification)
            .build()?;
        Ok(Self::with_client(http, base_url, &cfg.username, &cfg.password))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, username: &str, password: &str) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            session: Mutex::new(None),
            vm_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Open a session eagerly so bad credentials fail at startup.
    pub async fn connect(&self) -> Result<()> {
        self.session_token().await?;
        info!(url = %self.base_url, "Connected to vCenter");
        Ok(())
    }

    async fn session_token(&self) -> Result<String> {
        let cached = self.session.lock().map_err(poisoned)?.clone();
        if let Some(token) = cached {
            return Ok(token);
        }

        let resp = self
            .http
            .post(format!("{}/api/session", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(MonitorError::Vsphere(format!(
                "session login failed with status {}",
                resp.status()
            )));
        }
        let token: String = resp.json().await?;
        *self.session.lock().map_err(poisoned)? = Some(token.clone());
        Ok(token)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let token = self.session_token().await?;
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header(SESSION_HEADER, token)
            .query(query)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json().await?),
            StatusCode::UNAUTHORIZED => {
                // Session expired; the next call logs in again.
                *self.session.lock().map_err(poisoned)? = None;
                Err(MonitorError::Vsphere(format!("{} unauthorized", path)))
            }
            s => Err(MonitorError::Vsphere(format!("{} returned {}", path, s))),
        }
    }

    async fn find_vm(&self, name: &str) -> Result<Option<VmSummary>> {
        let found: Vec<VmSummary> = self.get_json("/api/vcenter/vm", &[("names", name)]).await?;
        let summary = found.into_iter().find(|vm| vm.name == name);
        if let Some(vm) = summary.as_ref() {
            self.vm_ids
                .lock()
                .map_err(poisoned)?
                .insert(name.to_string(), vm.vm.clone());
        }
        Ok(summary)
    }

    async fn vm_id(&self, name: &str) -> Result<Option<String>> {
        let cached = self.vm_ids.lock().map_err(poisoned)?.get(name).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        Ok(self.find_vm(name).await?.map(|vm| vm.vm))
    }

    async fn vm_summary(&self, id: &str) -> Result<VimVmSummary> {
        self.get_json(&format!("/sdk/vim25/{}/VirtualMachine/{}/summary", VIM_RELEASE, id), &[])
            .await
    }

    async fn host_summary(&self, id: &str) -> Result<VimHostSummary> {
        self.get_json(&format!("/sdk/vim25/{}/HostSystem/{}/summary", VIM_RELEASE, id), &[])
            .await
    }

    /// Usage and capacity figures for a located VM.
    ///
    /// CPU capacity is vCPUs times the host clock, so it stays empty when
    /// the host cannot be read.
    async fn fill_usage(&self, id: &str, snapshot: &mut VmSnapshot) -> Result<()> {
        let summary = self.vm_summary(id).await?;

        snapshot.cpu_usage = summary.quick_stats.overall_cpu_usage.map(|mhz| mhz as f64);
        snapshot.memory_usage = summary
            .quick_stats
            .guest_memory_usage
            .map(|mb| mb as f64 * MIB);
        if let Some(mb) = summary.config.memory_size_mb {
            snapshot.memory_capacity = Some(mb as f64 * MIB);
        }

        if let (Some(cpus), Some(host)) = (summary.config.num_cpu, summary.runtime.host) {
            let host = self.host_summary(&host.value).await?;
            snapshot.cpu_capacity = host
                .hardware
                .and_then(|h| h.cpu_mhz)
                .map(|mhz| f64::from(cpus) * f64::from(mhz));
        }
        Ok(())
    }

    async fn host_alert(&self, vm: &VmRecord) -> Result<Option<String>> {
        let Some(id) = self.vm_id(&vm.name).await? else {
            return Ok(None);
        };
        let Some(host) = self.vm_summary(&id).await?.runtime.host else {
            return Ok(None);
        };
        let status = self.host_summary(&host.value).await?.overall_status;
        Ok(Some(format!(
            "ESXi host for problematic VM {} (node {}) has status: {}",
            vm.name, vm.node_name, status
        )))
    }

    async fn datastore_alerts(&self, vm_name: &str) -> Result<Vec<String>> {
        let Some(id) = self.vm_id(vm_name).await? else {
            return Ok(Vec::new());
        };
        let info: VmInfo = self.get_json(&format!("/api/vcenter/vm/{}", id), &[]).await?;

        let mut alerts = Vec::new();
        for ds_name in datastore_names(&info) {
            let found: Vec<DatastoreSummary> = self
                .get_json("/api/vcenter/datastore", &[("names", ds_name.as_str())])
                .await?;
            for ds in found.iter().filter(|d| d.name == ds_name) {
                if let (Some(free), Some(capacity)) = (ds.free_space, ds.capacity) {
                    if capacity == 0 {
                        continue;
                    }
                    let free_percent = free as f64 / capacity as f64 * 100.0;
                    if free_percent < LOW_DATASTORE_FREE_PERCENT {
                        alerts.push(format!(
                            "Datastore {} for VM {} is low on space: {:.1}% free",
                            ds.name, vm_name, free_percent
                        ));
                    }
                }
            }
        }
        Ok(alerts)
    }
}

#[async_trait]
impl VmSource for VsphereClient {
    async fn fetch_vms(&self, targets: &[(String, String)]) -> Result<Vec<VmSnapshot>> {
        // Fail the whole source when no session can be opened.
        self.session_token().await?;
        info!(count = targets.len(), "Fetching VMware machine state");

        let mut snapshots = Vec::with_capacity(targets.len());
        for (vm_name, node_name) in targets {
            let snapshot = match self.find_vm(vm_name).await {
                Ok(Some(vm)) => {
                    debug!(
                        vm = %vm_name,
                        power_state = %vm.power_state,
                        cpu_count = ?vm.cpu_count,
                        "VM located"
                    );
                    let mut snapshot = VmSnapshot {
                        name: vm_name.clone(),
                        node_name: node_name.clone(),
                        power_state: Some(vm.power_state),
                        memory_capacity: vm.memory_size_mib.map(|mib| mib as f64 * MIB),
                        ..Default::default()
                    };
                    if let Err(e) = self.fill_usage(&vm.vm, &mut snapshot).await {
                        warn!(vm = %vm_name, error = %e, "VM usage unavailable");
                    }
                    snapshot
                }
                Ok(None) => {
                    warn!(vm = %vm_name, "VM not found");
                    VmSnapshot::unreachable(vm_name.clone(), node_name.clone())
                }
                Err(e) => {
                    error!(vm = %vm_name, error = %e, "Error getting VM state");
                    VmSnapshot::unreachable(vm_name.clone(), node_name.clone())
                }
            };
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    async fn infrastructure_alerts(&self, vm: &VmRecord) -> Vec<String> {
        let mut alerts = Vec::new();
        match self.host_alert(vm).await {
            Ok(alert) => alerts.extend(alert),
            Err(e) => error!(vm = %vm.name, error = %e, "Error checking ESXi host status"),
        }
        match self.datastore_alerts(&vm.name).await {
            Ok(found) => alerts.extend(found),
            Err(e) => error!(vm = %vm.name, error = %e, "Error checking datastore status"),
        }
        alerts
    }
}

/// Datastore names referenced by disk backings like "[datastore1] vm/vm.vmdk".
fn datastore_names(info: &VmInfo) -> BTreeSet<String> {
    info.disks
        .values()
        .filter_map(|d| d.backing.as_ref()?.vmdk_file.as_deref())
        .filter_map(|file| {
            let rest = file.strip_prefix('[')?;
            let (name, _) = rest.split_once(']')?;
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> MonitorError {
    MonitorError::Vsphere("client state lock poisoned".into())
}
