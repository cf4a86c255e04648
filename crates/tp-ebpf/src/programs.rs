use crate::loader::Program;
use crate::maps::{LOCAL_POD_IPS_PINNED_MAP, ip_map_key};
use anyhow::{Context, anyhow};
use tp_core::Config;

fn bpffs_flags(config: &Config) -> anyhow::Result<Vec<String>> {
    Ok(vec![
        "--bpffs".to_string(),
        config.ebpf.bpffs_path.display().to_string(),
    ])
}

fn cgroup_flags(config: &Config) -> anyhow::Result<Vec<String>> {
    let mut flags = bpffs_flags(config)?;
    flags.push("--cgroup".to_string());
    flags.push(config.ebpf.cgroup_path.display().to_string());
    Ok(flags)
}

fn tc_flags(config: &Config) -> anyhow::Result<Vec<String>> {
    let iface = config
        .ebpf
        .tc_attach_iface
        .as_deref()
        .filter(|iface| !iface.is_empty())
        .ok_or_else(|| anyhow!("no interface configured to attach the tc program to"))?;

    let mut flags = bpffs_flags(config)?;
    flags.push("--iface".to_string());
    flags.push(iface.to_string());
    Ok(flags)
}

fn redir_flags(config: &Config) -> anyhow::Result<Vec<String>> {
    let ip = config
        .ebpf
        .instance_ip
        .as_deref()
        .context("instance IP is required to register the pod")?;
    // reject early so the loader never sees a malformed key
    ip_map_key(ip)?;

    let mut flags = bpffs_flags(config)?;
    flags.push("--pinned-map".to_string());
    flags.push(LOCAL_POD_IPS_PINNED_MAP.to_string());
    flags.push("--pod-ip".to_string());
    flags.push(ip.to_string());
    Ok(flags)
}

/// The loader programs for sockmap based redirection, in attach order
pub fn default_programs() -> Vec<Program> {
    vec![
        Program::new("mb_connect", cgroup_flags),
        Program::new("mb_sockops", cgroup_flags),
        Program::new("mb_get_sockopts", cgroup_flags),
        Program::new("mb_sendmsg", cgroup_flags),
        Program::new("mb_recvmsg", cgroup_flags),
        Program::new("mb_redir", redir_flags),
        Program::new("mb_tc", tc_flags),
    ]
}
