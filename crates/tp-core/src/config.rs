use crate::error::{ConfigError, ConfigResult};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_INBOUND_PORT: u16 = 15006;
pub const DEFAULT_OUTBOUND_PORT: u16 = 15001;
pub const DEFAULT_PROXY_UID: u32 = 5678;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub redirect: RedirectConfig,
    #[serde(default)]
    pub ebpf: EbpfConfig,
    /// Render the annotated form of the ruleset
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    /// Prefix for every custom chain name, e.g. `MESH_` -> `MESH_INBOUND`
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    #[serde(default)]
    pub inbound: InboundRedirect,
    #[serde(default)]
    pub outbound: OutboundRedirect,
    /// UID of the proxy process, its own traffic is never redirected
    #[serde(default = "default_uid")]
    pub uid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRedirect {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_inbound_port")]
    pub port: u16,
    #[serde(default)]
    pub excluded_ports: Vec<u16>,
    #[serde(default)]
    pub included_ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundRedirect {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_outbound_port")]
    pub port: u16,
    #[serde(default)]
    pub excluded_ports: Vec<u16>,
    #[serde(default)]
    pub included_ports: Vec<u16>,
    #[serde(default)]
    pub excluded_ranges: Vec<IpNet>,
    #[serde(default)]
    pub included_ranges: Vec<IpNet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EbpfConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub instance_ip: Option<String>,
    #[serde(default = "default_bpffs_path")]
    pub bpffs_path: PathBuf,
    #[serde(default = "default_cgroup_path")]
    pub cgroup_path: PathBuf,
    #[serde(default = "default_programs_source_path")]
    pub programs_source_path: PathBuf,
    #[serde(default)]
    pub tc_attach_iface: Option<String>,
    /// Port of the sidecar's readiness endpoint, 0 disables the exemption
    #[serde(default)]
    pub status_port: u16,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub policy: LoadPolicy,
}

/// How a batch of loader programs is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPolicy {
    #[default]
    Sequential,
    Concurrent,
}

fn default_name_prefix() -> String {
    "MESH_".to_string()
}

fn default_uid() -> u32 {
    DEFAULT_PROXY_UID
}

fn default_true() -> bool {
    true
}

fn default_inbound_port() -> u16 {
    DEFAULT_INBOUND_PORT
}

fn default_outbound_port() -> u16 {
    DEFAULT_OUTBOUND_PORT
}

fn default_bpffs_path() -> PathBuf {
    PathBuf::from("/run/kuma/bpf")
}

fn default_cgroup_path() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_programs_source_path() -> PathBuf {
    PathBuf::from("/kuma/ebpf")
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            inbound: InboundRedirect::default(),
            outbound: OutboundRedirect::default(),
            uid: DEFAULT_PROXY_UID,
        }
    }
}

impl Default for InboundRedirect {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_INBOUND_PORT,
            excluded_ports: vec![],
            included_ports: vec![],
        }
    }
}

impl Default for OutboundRedirect {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_OUTBOUND_PORT,
            excluded_ports: vec![],
            included_ports: vec![],
            excluded_ranges: vec![],
            included_ranges: vec![],
        }
    }
}

impl Default for EbpfConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            instance_ip: None,
            bpffs_path: default_bpffs_path(),
            cgroup_path: default_cgroup_path(),
            programs_source_path: default_programs_source_path(),
            tc_attach_iface: None,
            status_port: 0,
            timeout_secs: default_timeout_secs(),
            policy: LoadPolicy::Sequential,
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the values serde cannot: port sanity, addresses and paths
    pub fn validate(&self) -> ConfigResult<()> {
        let inbound = &self.redirect.inbound;
        let outbound = &self.redirect.outbound;

        if inbound.enabled && inbound.port == 0 {
            return Err(ConfigError::InvalidPort {
                field: "redirect.inbound.port",
                port: 0,
            });
        }

        if outbound.enabled && outbound.port == 0 {
            return Err(ConfigError::InvalidPort {
                field: "redirect.outbound.port",
                port: 0,
            });
        }

        if inbound.enabled && outbound.enabled && inbound.port == outbound.port {
            return Err(ConfigError::PortClash(inbound.port));
        }

        if self.ebpf.enabled {
            self.ebpf.instance_ip()?;

            for path in [&self.ebpf.bpffs_path, &self.ebpf.programs_source_path] {
                if !path.is_absolute() {
                    return Err(ConfigError::InvalidDirectory {
                        path: path.clone(),
                        reason: "path must be absolute".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl EbpfConfig {
    /// The pod IP the loaders key their maps by
    pub fn instance_ip(&self) -> ConfigResult<IpAddr> {
        let raw = self.instance_ip.as_deref().unwrap_or_default();
        raw.parse().map_err(|_| ConfigError::InvalidAddress {
            value: raw.to_string(),
        })
    }
}
