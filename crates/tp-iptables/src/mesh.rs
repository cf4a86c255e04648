//! Composition of the sidecar interception chains in the nat table.
//!
//! Inbound TCP is sent from PREROUTING through `<prefix>INBOUND` to a REDIRECT
//! towards the inbound listener of the proxy. Locally generated TCP goes from
//! OUTPUT through `<prefix>OUTPUT` to a REDIRECT towards the outbound listener,
//! except for the proxy's own traffic, loopback destinations and excluded
//! ports or ranges.

use crate::chain::Chain;
use crate::flags::Flag;
use crate::rule::{Parameter, Rule};
use crate::table::NatTable;
use ipnet::IpNet;
use tp_core::RedirectConfig;

const LOCALHOST: &str = "127.0.0.1/32";

/// Names of the custom chains created for a given prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNames {
    pub inbound: String,
    pub inbound_redirect: String,
    pub output: String,
    pub outbound_redirect: String,
}

impl ChainNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            inbound: format!("{}INBOUND", prefix),
            inbound_redirect: format!("{}INBOUND_REDIRECT", prefix),
            output: format!("{}OUTPUT", prefix),
            outbound_redirect: format!("{}OUTBOUND_REDIRECT", prefix),
        }
    }
}

/// Build the nat table for a sidecar from its redirect configuration
pub fn build_nat_table(config: &RedirectConfig) -> NatTable {
    let names = ChainNames::with_prefix(&config.name_prefix);
    let mut table = NatTable::new();

    if config.inbound.enabled {
        let (inbound, redirect) = inbound_chains(config, &names);

        table.prerouting().append(vec![
            Parameter::protocol("tcp"),
            Parameter::jump(&names.inbound),
        ]);
        table.add_chain(inbound).add_chain(redirect);
    }

    if config.outbound.enabled {
        let (output, redirect) = outbound_chains(config, &names);

        table.output().append(vec![
            Parameter::protocol("tcp"),
            Parameter::jump(&names.output),
        ]);
        table.add_chain(output).add_chain(redirect);
    }

    table
}

fn redirect_chain(name: &str, port: u16) -> Chain {
    let mut chain = Chain::new(name);
    chain.append(vec![
        Parameter::protocol("tcp"),
        Parameter::jump("REDIRECT"),
        Parameter::to_ports(port),
    ]);
    chain
}

fn inbound_chains(config: &RedirectConfig, names: &ChainNames) -> (Chain, Chain) {
    let inbound = &config.inbound;
    let mut chain = Chain::new(&names.inbound);

    for port in &inbound.excluded_ports {
        chain.append(vec![
            Parameter::protocol("tcp"),
            Parameter::destination_port(*port),
            Parameter::jump("RETURN"),
        ]);
    }

    if inbound.included_ports.is_empty() {
        chain.append(vec![
            Parameter::protocol("tcp"),
            Parameter::jump(&names.inbound_redirect),
        ]);
    } else {
        for port in &inbound.included_ports {
            chain.append(vec![
                Parameter::protocol("tcp"),
                Parameter::destination_port(*port),
                Parameter::jump(&names.inbound_redirect),
            ]);
        }
    }

    (chain, redirect_chain(&names.inbound_redirect, inbound.port))
}

fn outbound_chains(config: &RedirectConfig, names: &ChainNames) -> (Chain, Chain) {
    let outbound = &config.outbound;
    let uid = config.uid.to_string();
    let mut chain = Chain::new(&names.output);

    if config.inbound.enabled {
        chain.push(
            Rule::append(
                &names.output,
                vec![
                    Parameter::out_interface("lo"),
                    Parameter::not(Flag::Destination, LOCALHOST),
                    Parameter::match_module("owner"),
                    Parameter::new(Flag::UidOwner, uid.clone()),
                    Parameter::jump(&names.inbound_redirect),
                ],
            )
            .with_comment("proxy talking to its own pod over loopback"),
        );
    }

    chain
        .push(
            Rule::append(
                &names.output,
                vec![
                    Parameter::out_interface("lo"),
                    Parameter::match_module("owner"),
                    Parameter::not(Flag::UidOwner, uid),
                    Parameter::jump("RETURN"),
                ],
            )
            .with_comment("application loopback traffic"),
        )
        .push(
            Rule::append(
                &names.output,
                vec![
                    Parameter::match_module("owner"),
                    Parameter::uid_owner(config.uid),
                    Parameter::jump("RETURN"),
                ],
            )
            .with_comment("traffic of the proxy itself"),
        )
        .append(vec![Parameter::destination(LOCALHOST), Parameter::jump("RETURN")]);

    for port in &outbound.excluded_ports {
        chain.append(vec![
            Parameter::protocol("tcp"),
            Parameter::destination_port(*port),
            Parameter::jump("RETURN"),
        ]);
    }

    for net in &outbound.excluded_ranges {
        chain.append(vec![
            Parameter::destination(&net.to_string()),
            Parameter::jump("RETURN"),
        ]);
    }

    let ranges: Vec<Option<&IpNet>> = if outbound.included_ranges.is_empty() {
        vec![None]
    } else {
        outbound.included_ranges.iter().map(Some).collect()
    };
    let ports: Vec<Option<u16>> = if outbound.included_ports.is_empty() {
        vec![None]
    } else {
        outbound.included_ports.iter().copied().map(Some).collect()
    };

    for range in &ranges {
        for port in &ports {
            let mut params = vec![];
            if let Some(net) = range {
                params.push(Parameter::destination(&net.to_string()));
            }
            params.push(Parameter::protocol("tcp"));
            if let Some(port) = port {
                params.push(Parameter::destination_port(*port));
            }
            params.push(Parameter::jump(&names.outbound_redirect));
            chain.append(params);
        }
    }

    (chain, redirect_chain(&names.outbound_redirect, outbound.port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(table: &NatTable) -> Vec<String> {
        table.build(false).lines().map(str::to_string).collect()
    }

    #[test]
    fn default_config_builds_both_directions() {
        let table = build_nat_table(&RedirectConfig::default());
        let names: Vec<&str> = table.custom_chains().iter().map(|c| c.name()).collect();

        assert_eq!(
            names,
            vec![
                "MESH_INBOUND",
                "MESH_INBOUND_REDIRECT",
                "MESH_OUTPUT",
                "MESH_OUTBOUND_REDIRECT",
            ]
        );

        let lines = lines(&table);
        assert!(lines.contains(&"-A PREROUTING -p tcp -j MESH_INBOUND".to_string()));
        assert!(lines.contains(&"-A OUTPUT -p tcp -j MESH_OUTPUT".to_string()));
        assert!(lines.contains(
            &"-A MESH_INBOUND_REDIRECT -p tcp -j REDIRECT --to-ports 15006".to_string()
        ));
        assert!(lines.contains(
            &"-A MESH_OUTBOUND_REDIRECT -p tcp -j REDIRECT --to-ports 15001".to_string()
        ));
        assert!(lines.contains(
            &"-A MESH_OUTPUT -m owner --uid-owner 5678 -j RETURN".to_string()
        ));
        assert!(lines.contains(
            &"-A MESH_OUTPUT -o lo -m owner ! --uid-owner 5678 -j RETURN".to_string()
        ));
    }

    #[test]
    fn excluded_inbound_ports_return_before_redirect() {
        let mut config = RedirectConfig::default();
        config.inbound.excluded_ports = vec![22, 9901];

        let lines = lines(&build_nat_table(&config));
        let ssh = lines
            .iter()
            .position(|l| l == "-A MESH_INBOUND -p tcp --dport 22 -j RETURN")
            .expect("ssh exclusion");
        let redirect = lines
            .iter()
            .position(|l| l == "-A MESH_INBOUND -p tcp -j MESH_INBOUND_REDIRECT")
            .expect("catch-all redirect");

        assert!(ssh < redirect);
    }

    #[test]
    fn disabled_outbound_leaves_output_empty() {
        let mut config = RedirectConfig::default();
        config.outbound.enabled = false;

        let table = build_nat_table(&config);
        assert_eq!(table.custom_chains().len(), 2);
        assert!(table.chain(crate::BuiltinRole::Output).rules().is_empty());
        assert!(
            !lines(&table)
                .iter()
                .any(|l| l.contains("MESH_OUTBOUND_REDIRECT"))
        );
    }

    #[test]
    fn included_ranges_and_ports_cross_product() {
        let mut config = RedirectConfig::default();
        config.outbound.included_ranges = vec!["10.0.0.0/8".parse().unwrap()];
        config.outbound.included_ports = vec![80, 443];
        config.outbound.excluded_ranges = vec!["192.168.0.0/16".parse().unwrap()];

        let lines = lines(&build_nat_table(&config));
        assert!(lines.contains(&"-A MESH_OUTPUT -d 192.168.0.0/16 -j RETURN".to_string()));
        assert!(lines.contains(
            &"-A MESH_OUTPUT -d 10.0.0.0/8 -p tcp --dport 80 -j MESH_OUTBOUND_REDIRECT"
                .to_string()
        ));
        assert!(lines.contains(
            &"-A MESH_OUTPUT -d 10.0.0.0/8 -p tcp --dport 443 -j MESH_OUTBOUND_REDIRECT"
                .to_string()
        ));
        assert!(!lines.contains(&"-A MESH_OUTPUT -p tcp -j MESH_OUTBOUND_REDIRECT".to_string()));
    }

    #[test]
    fn custom_prefix_names_every_chain() {
        let mut config = RedirectConfig::default();
        config.name_prefix = "KUMA_".into();

        let rendered = build_nat_table(&config).build(false);
        assert!(rendered.contains("-N KUMA_INBOUND\n"));
        assert!(rendered.contains("-N KUMA_OUTBOUND_REDIRECT\n"));
        assert!(!rendered.contains("MESH_"));
    }

    #[test]
    fn verbose_render_carries_rule_comments() {
        let rendered = build_nat_table(&RedirectConfig::default()).build(true);
        assert!(rendered.contains("# traffic of the proxy itself\n--append MESH_OUTPUT"));
    }
}
