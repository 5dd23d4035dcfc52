use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::MonitorError;

const ENV_PREFIX: &str = "POD_MONITOR_";

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Production implementation using std::env
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mock implementation for testing
#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    pub fn set_var<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_var(key, value);
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmwareConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub disable_ssl_verification: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub kubeconfig_path: Option<String>,
    pub namespaces: Vec<String>,
    pub pod_label_selectors: BTreeMap<String, String>,
    pub monitor_all_nodes: bool,
    /// seconds
    pub pod_problematic_threshold: u64,
    /// seconds
    pub monitoring_interval: u64,
    pub prometheus_port: u16,
    pub log_level: String,
    pub vmware: Option<VmwareConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig_path: None,
            namespaces: vec!["default".to_string()],
            pod_label_selectors: BTreeMap::new(),
            monitor_all_nodes: false,
            pod_problematic_threshold: 300,
            monitoring_interval: 60,
            prometheus_port: 9090,
            log_level: "info".to_string(),
            vmware: None,
        }
    }
}

impl Config {
    /// Label selector string ("k=v,k2=v2") for pod listing, if any selectors are set.
    pub fn label_selector(&self) -> Option<String> {
        if self.pod_label_selectors.is_empty() {
            return None;
        }
        Some(
            self.pod_label_selectors
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.namespaces.is_empty() {
            return Err(MonitorError::Config("at least one namespace is required".into()));
        }
        if self.monitoring_interval == 0 {
            return Err(MonitorError::Config("monitoring_interval must be positive".into()));
        }
        if let Some(vm) = &self.vmware {
            if vm.username.is_empty() || vm.password.is_empty() {
                return Err(MonitorError::Config(format!(
                    "vmware host {} configured without username/password",
                    vm.host
                )));
            }
        }
        Ok(())
    }
}

/// YAML file shape; every field optional so defaults fill the gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    kubeconfig_path: Option<String>,
    namespaces: Option<Vec<String>>,
    pod_label_selectors: Option<BTreeMap<String, String>>,
    monitor_all_nodes: Option<bool>,
    pod_problematic_threshold: Option<u64>,
    monitoring_interval: Option<u64>,
    prometheus_port: Option<u16>,
    log_level: Option<String>,
    vmware: Option<FileVmwareConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileVmwareConfig {
    host: Option<String>,
    username: Option<String>,
    password: Option<String>,
    port: Option<u16>,
    disable_ssl_verification: Option<bool>,
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    load_config_with_env(path, &SystemEnvironment)
}

/// Defaults, then the YAML file, then `POD_MONITOR_*` variables (env wins).
pub fn load_config_with_env<E: EnvironmentProvider>(path: Option<&Path>, env: &E) -> Result<Config> {
    let file = match locate_config_file(path, env) {
        Some(p) => match read_config_file(&p) {
            Ok(fc) => {
                info!(path = %p.display(), "Loaded configuration file");
                fc
            }
            Err(e) => {
                warn!(path = %p.display(), error = %e, "Failed to load configuration file");
                FileConfig::default()
            }
        },
        None => FileConfig::default(),
    };

    let mut cfg = Config::default();
    let mut vmware = merge_file(&mut cfg, file);
    apply_env(&mut cfg, &mut vmware, env)?;
    cfg.vmware = build_vmware(vmware);
    cfg.validate()?;
    Ok(cfg)
}

fn locate_config_file<E: EnvironmentProvider>(path: Option<&Path>, env: &E) -> Option<PathBuf> {
    if let Some(p) = path {
        if p.exists() {
            return Some(p.to_path_buf());
        }
        warn!(path = %p.display(), "Configuration file not found, falling back to defaults");
        return None;
    }

    let mut candidates = vec![PathBuf::from("config.yaml")];
    if let Some(home) = env.get_var("HOME") {
        candidates.push(Path::new(&home).join(".config/k8s_node_monitor/config.yaml"));
    }
    candidates.push(PathBuf::from("/etc/k8s_node_monitor/config.yaml"));

    candidates.into_iter().find(|c| {
        let found = c.exists();
        debug!(path = %c.display(), found, "Probing configuration location");
        found
    })
}

fn read_config_file(path: &Path) -> Result<FileConfig> {
    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
        .build()
        .with_context(|| format!("reading {}", path.display()))?;
    settings
        .try_deserialize()
        .with_context(|| format!("parsing {}", path.display()))
}

fn merge_file(cfg: &mut Config, file: FileConfig) -> FileVmwareConfig {
    if file.kubeconfig_path.is_some() {
        cfg.kubeconfig_path = file.kubeconfig_path;
    }
    if let Some(ns) = file.namespaces {
        cfg.namespaces = ns;
    }
    if let Some(sel) = file.pod_label_selectors {
        cfg.pod_label_selectors = sel;
    }
    if let Some(v) = file.monitor_all_nodes {
        cfg.monitor_all_nodes = v;
    }
    if let Some(v) = file.pod_problematic_threshold {
        cfg.pod_problematic_threshold = v;
    }
    if let Some(v) = file.monitoring_interval {
        cfg.monitoring_interval = v;
    }
    if let Some(v) = file.prometheus_port {
        cfg.prometheus_port = v;
    }
    if let Some(v) = file.log_level {
        cfg.log_level = v;
    }
    file.vmware.unwrap_or_default()
}

fn apply_env<E: EnvironmentProvider>(
    cfg: &mut Config,
    vmware: &mut FileVmwareConfig,
    env: &E,
) -> Result<()> {
    let var = |key: &str| env.get_var(&format!("{}{}", ENV_PREFIX, key));

    if let Some(v) = var("KUBECONFIG_PATH") {
        cfg.kubeconfig_path = Some(v);
    }
    if let Some(v) = var("NAMESPACES") {
        cfg.namespaces = split_list(&v);
        if cfg.namespaces.is_empty() {
            return Err(anyhow!("{}NAMESPACES must list at least one namespace", ENV_PREFIX));
        }
    }
    if let Some(v) = var("POD_LABEL_SELECTORS") {
        cfg.pod_label_selectors = parse_selectors(&v)?;
    }
    if let Some(v) = var("MONITOR_ALL_NODES") {
        cfg.monitor_all_nodes = parse_bool(&v);
    }
    if let Some(v) = var("POD_PROBLEMATIC_THRESHOLD") {
        cfg.pod_problematic_threshold = parse_number(&v, "POD_PROBLEMATIC_THRESHOLD")?;
    }
    if let Some(v) = var("MONITORING_INTERVAL") {
        cfg.monitoring_interval = parse_number(&v, "MONITORING_INTERVAL")?;
    }
    if let Some(v) = var("PROMETHEUS_PORT") {
        cfg.prometheus_port = parse_number(&v, "PROMETHEUS_PORT")?;
    }
    if let Some(v) = var("LOG_LEVEL") {
        cfg.log_level = v;
    }

    if let Some(v) = var("VMWARE_HOST") {
        vmware.host = Some(v);
    }
    if let Some(v) = var("VMWARE_USERNAME") {
        vmware.username = Some(v);
    }
    if let Some(v) = var("VMWARE_PASSWORD") {
        vmware.password = Some(v);
    }
    if let Some(v) = var("VMWARE_PORT") {
        vmware.port = Some(parse_number(&v, "VMWARE_PORT")?);
    }
    if let Some(v) = var("VMWARE_DISABLE_SSL_VERIFICATION") {
        vmware.disable_ssl_verification = Some(parse_bool(&v));
    }
    Ok(())
}

/// A VMware block only counts when it names a host.
fn build_vmware(vm: FileVmwareConfig) -> Option<VmwareConfig> {
    let host = vm.host.filter(|h| !h.trim().is_empty())?;
    Some(VmwareConfig {
        host,
        username: vm.username.unwrap_or_default(),
        password: vm.password.unwrap_or_default(),
        port: vm.port.unwrap_or(443),
        disable_ssl_verification: vm.disable_ssl_verification.unwrap_or(false),
    })
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_selectors(v: &str) -> Result<BTreeMap<String, String>> {
    split_list(v)
        .into_iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| anyhow!("Invalid {}POD_LABEL_SELECTORS entry {:?}", ENV_PREFIX, pair))
        })
        .collect()
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_number<T: std::str::FromStr>(v: &str, key: &str) -> Result<T> {
    v.trim()
        .parse()
        .map_err(|_| anyhow!("Invalid {}{}: {:?}", ENV_PREFIX, key, v))
}
