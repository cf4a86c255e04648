//! Records shared with the external eBPF programs through pinned maps.
//!
//! The layouts below are a binary contract with the loader binaries: field
//! order, padding and the per-category item cap must not change on this side
//! alone.
//!
//! ```text
//! Cidr                                   8 bytes
//!   net   (network order)                4
//!   mask                                 1
//!   pad                                  3
//!
//! PodConfig                            244 bytes
//!   status_port                          2
//!   pad                                  2
//!   exclude_out_ranges (10 x Cidr)      80
//!   include_out_ranges (10 x Cidr)      80
//!   include_in_ports   (10 x u16)       20
//!   include_out_ports  (10 x u16)       20
//!   exclude_in_ports   (10 x u16)       20
//!   exclude_out_ports  (10 x u16)       20
//! ```

use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tp_core::{Config, ConfigError, ConfigResult};

/// Maximum number of ranges or ports per category
pub const MAX_ITEM_LEN: usize = 10;

pub const CIDR_SIZE: usize = 8;
pub const POD_CONFIG_SIZE: usize = 244;

/// Where `local_pod_ips` is pinned, relative to the BPF filesystem root.
/// The loader programs hardcode it.
pub const LOCAL_POD_IPS_PINNED_MAP: &str = "tc/globals/local_pod_ips";
pub const MARK_POD_IPS_PINNED_MAP: &str = "mark_pod_ips";

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cidr {
    /// IPv4 network address, bytes in network order
    net: u32,
    mask: u8,
    _pad: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodConfig {
    pub status_port: u16,
    _pad: u16,
    pub exclude_out_ranges: [Cidr; MAX_ITEM_LEN],
    pub include_out_ranges: [Cidr; MAX_ITEM_LEN],
    pub include_in_ports: [u16; MAX_ITEM_LEN],
    pub include_out_ports: [u16; MAX_ITEM_LEN],
    pub exclude_in_ports: [u16; MAX_ITEM_LEN],
    pub exclude_out_ports: [u16; MAX_ITEM_LEN],
}

const _: () = assert!(std::mem::size_of::<Cidr>() == CIDR_SIZE);
const _: () = assert!(std::mem::size_of::<PodConfig>() == POD_CONFIG_SIZE);

impl Cidr {
    pub fn new(addr: Ipv4Addr, mask: u8) -> Self {
        Self {
            net: u32::from_ne_bytes(addr.octets()),
            mask,
            _pad: [0; 3],
        }
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.net.to_ne_bytes())
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn to_bytes(&self) -> [u8; CIDR_SIZE] {
        let mut out = [0u8; CIDR_SIZE];
        out[..4].copy_from_slice(&self.net.to_ne_bytes());
        out[4] = self.mask;
        out
    }
}

impl TryFrom<&IpNet> for Cidr {
    type Error = ConfigError;

    fn try_from(net: &IpNet) -> ConfigResult<Self> {
        match net {
            IpNet::V4(v4) => Ok(Cidr::new(v4.network(), v4.prefix_len())),
            IpNet::V6(_) => Err(ConfigError::InvalidAddress {
                value: net.to_string(),
            }),
        }
    }
}

fn fill_ranges(field: &'static str, nets: &[IpNet]) -> ConfigResult<[Cidr; MAX_ITEM_LEN]> {
    check_len(field, nets.len())?;
    let mut out = [Cidr::default(); MAX_ITEM_LEN];
    for (slot, net) in out.iter_mut().zip(nets) {
        *slot = Cidr::try_from(net)?;
    }
    Ok(out)
}

fn fill_ports(field: &'static str, ports: &[u16]) -> ConfigResult<[u16; MAX_ITEM_LEN]> {
    check_len(field, ports.len())?;
    let mut out = [0u16; MAX_ITEM_LEN];
    out[..ports.len()].copy_from_slice(ports);
    Ok(out)
}

fn check_len(field: &'static str, count: usize) -> ConfigResult<()> {
    if count > MAX_ITEM_LEN {
        return Err(ConfigError::TooManyItems {
            field,
            count,
            max: MAX_ITEM_LEN,
        });
    }
    Ok(())
}

impl PodConfig {
    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        let inbound = &config.redirect.inbound;
        let outbound = &config.redirect.outbound;

        Ok(Self {
            status_port: config.ebpf.status_port,
            _pad: 0,
            exclude_out_ranges: fill_ranges(
                "redirect.outbound.excluded_ranges",
                &outbound.excluded_ranges,
            )?,
            include_out_ranges: fill_ranges(
                "redirect.outbound.included_ranges",
                &outbound.included_ranges,
            )?,
            include_in_ports: fill_ports("redirect.inbound.included_ports", &inbound.included_ports)?,
            include_out_ports: fill_ports(
                "redirect.outbound.included_ports",
                &outbound.included_ports,
            )?,
            exclude_in_ports: fill_ports("redirect.inbound.excluded_ports", &inbound.excluded_ports)?,
            exclude_out_ports: fill_ports(
                "redirect.outbound.excluded_ports",
                &outbound.excluded_ports,
            )?,
        })
    }

    /// Serialise exactly as the C struct is laid out in the map value
    pub fn to_bytes(&self) -> [u8; POD_CONFIG_SIZE] {
        let mut out = [0u8; POD_CONFIG_SIZE];
        let mut offset = 0;

        let mut put = |bytes: &[u8]| {
            out[offset..offset + bytes.len()].copy_from_slice(bytes);
            offset += bytes.len();
        };

        put(&self.status_port.to_ne_bytes());
        put(&[0, 0]);
        for cidr in self.exclude_out_ranges.iter().chain(&self.include_out_ranges) {
            put(&cidr.to_bytes());
        }
        for port in self
            .include_in_ports
            .iter()
            .chain(&self.include_out_ports)
            .chain(&self.exclude_in_ports)
            .chain(&self.exclude_out_ports)
        {
            put(&port.to_ne_bytes());
        }

        out
    }
}

/// Key of the pod-IP maps: IPv4 addresses take the last four bytes with the
/// first twelve zeroed, IPv6 addresses fill all sixteen
pub fn ip_map_key(ip: &str) -> ConfigResult<[u8; 16]> {
    let addr: IpAddr = ip.parse().map_err(|_| ConfigError::InvalidAddress {
        value: ip.to_string(),
    })?;

    let mut key = [0u8; 16];
    match addr {
        IpAddr::V4(v4) => key[12..].copy_from_slice(&v4.octets()),
        IpAddr::V6(v6) => key.copy_from_slice(&v6.octets()),
    }
    Ok(key)
}

pub fn local_pod_ips_path(bpffs: &Path) -> PathBuf {
    bpffs.join(LOCAL_POD_IPS_PINNED_MAP)
}

pub fn mark_pod_ips_path(bpffs: &Path) -> PathBuf {
    bpffs.join(MARK_POD_IPS_PINNED_MAP)
}
