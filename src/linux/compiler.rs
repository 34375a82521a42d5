//! Turns a [`PolicyModel`] into one ordered, default-deny [`Policy`] per
//! address family.
//!
//! Rule order within a chain is first-match-wins, so the sequence below is
//! the contract:
//!
//! 1. INPUT, FORWARD and OUTPUT default to DROP
//! 2. conntrack INVALID is dropped both ways
//! 3. loopback is accepted
//! 4. echo-request in / echo-reply out, limited
//! 5. ESTABLISHED,RELATED both ways
//! 6. per team address: record, check-and-drop, accept SSH
//! 7. per domain controller, when domain-joined: TCP and UDP both ways
//! 8. LOG on INPUT and OUTPUT, last

use crate::os::policy::{
    Action, AddressFamily, Chain, ChainPolicy, CtState, IcmpType, IpAddress, Match, Policy,
    PolicyModel, PortSet, PortToken, Protocol, Recent, Rule,
};
use crate::utils::config::HardenConfig;

/// Compiles both families, IPv4 first.
pub fn compile_all(config: &HardenConfig, model: &PolicyModel) -> Vec<Policy> {
    AddressFamily::ALL
        .into_iter()
        .map(|family| compile(config, model, family))
        .collect()
}

pub fn compile(config: &HardenConfig, model: &PolicyModel, family: AddressFamily) -> Policy {
    let mut rules = Vec::new();

    for chain in [Chain::Input, Chain::Output] {
        rules.push(Rule::new(
            family,
            chain,
            Match {
                ctstate: vec![CtState::Invalid],
                ..Default::default()
            },
            Action::Drop,
        ));
    }

    rules.push(Rule::new(
        family,
        Chain::Input,
        Match {
            in_interface: Some("lo".to_owned()),
            ..Default::default()
        },
        Action::Accept,
    ));
    rules.push(Rule::new(
        family,
        Chain::Output,
        Match {
            out_interface: Some("lo".to_owned()),
            ..Default::default()
        },
        Action::Accept,
    ));

    for (chain, icmp) in [
        (Chain::Input, IcmpType::EchoRequest),
        (Chain::Output, IcmpType::EchoReply),
    ] {
        rules.push(Rule::new(
            family,
            chain,
            Match {
                protocol: Some(Protocol::Icmp),
                icmp_type: Some(icmp),
                limit: Some(config.icmp_limit.clone()),
                ..Default::default()
            },
            Action::Accept,
        ));
    }

    for chain in [Chain::Input, Chain::Output] {
        rules.push(Rule::new(
            family,
            chain,
            Match {
                ctstate: vec![CtState::Established, CtState::Related],
                ..Default::default()
            },
            Action::Accept,
        ));
    }

    for address in model.team_in(family) {
        rules.extend(ssh_group(config, family, address));
    }

    if model.domain_joined {
        for address in model.controllers_in(family) {
            rules.extend(controller_rules(config, family, address));
        }
    }

    let prefix = match family {
        AddressFamily::V4 => &config.log_prefix_v4,
        AddressFamily::V6 => &config.log_prefix_v6,
    };
    for chain in [Chain::Input, Chain::Output] {
        rules.push(Rule::new(
            family,
            chain,
            Match::default(),
            Action::Log {
                prefix: prefix.clone(),
                level: config.log_level,
            },
        ));
    }

    Policy {
        family,
        input: ChainPolicy::Drop,
        forward: ChainPolicy::Drop,
        output: ChainPolicy::Drop,
        rules,
    }
}

/// Record, check-and-drop, accept. The record rule must come first or the
/// check never sees a hit; the accept must come last or it short-circuits
/// the check.
fn ssh_group(config: &HardenConfig, family: AddressFamily, address: &IpAddress) -> [Rule; 3] {
    let base = Match {
        source: Some(address.clone()),
        protocol: Some(Protocol::Tcp),
        dports: Some(PortSet::from_tokens(&[PortToken::Single(config.ssh_port)])),
        ..Default::default()
    };
    let new_conn = Match {
        ctstate: vec![CtState::New],
        ..base.clone()
    };
    let record = Rule {
        family,
        chain: Chain::Input,
        matcher: Match {
            recent: Some(Recent::Set {
                list: config.ssh_recent_list.clone(),
            }),
            ..new_conn.clone()
        },
        action: None,
    };
    // The hit recorded just above is already counted, so "more than count"
    // means count + 1.
    let check = Rule::new(
        family,
        Chain::Input,
        Match {
            recent: Some(Recent::Update {
                list: config.ssh_recent_list.clone(),
                seconds: config.ssh_rate_limit.window_secs,
                hitcount: config.ssh_rate_limit.count + 1,
            }),
            ..new_conn
        },
        Action::Drop,
    );
    let accept = Rule::new(family, Chain::Input, base, Action::Accept);
    [record, check, accept]
}

fn controller_rules(config: &HardenConfig, family: AddressFamily, address: &IpAddress) -> Vec<Rule> {
    let (tcp, udp) = match family {
        AddressFamily::V4 => (&config.dc_ports.v4_tcp, &config.dc_ports.v4_udp),
        AddressFamily::V6 => (&config.dc_ports.v6_tcp, &config.dc_ports.v6_udp),
    };
    let mut rules = Vec::with_capacity(4);
    for (protocol, ports) in [(Protocol::Tcp, tcp), (Protocol::Udp, udp)] {
        rules.push(Rule::new(
            family,
            Chain::Input,
            Match {
                protocol: Some(protocol),
                source: Some(address.clone()),
                dports: Some(ports.clone()),
                ..Default::default()
            },
            Action::Accept,
        ));
        rules.push(Rule::new(
            family,
            Chain::Output,
            Match {
                protocol: Some(protocol),
                destination: Some(address.clone()),
                dports: Some(ports.clone()),
                ..Default::default()
            },
            Action::Accept,
        ));
    }
    rules
}
