//! In-memory model of a per-family filter policy.
//!
//! A [`Policy`] is rebuilt from scratch on every run and only ever replaces
//! the live ruleset as a whole. Rules render to the argument vectors the
//! `iptables`/`ip6tables` binaries expect, and a whole policy renders to the
//! `iptables-restore` document format.

use serde::Serialize;
use std::fmt::{self, Display};
use std::str::FromStr;

/// iptables' multiport match accepts at most 15 slots; a range takes two.
pub const MULTIPORT_MAX_SLOTS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [AddressFamily::V4, AddressFamily::V6];
}

impl Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// An operator-supplied address that passed validation, tagged with the
/// family it validated under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IpAddress {
    literal: String,
    family: AddressFamily,
}

impl IpAddress {
    pub(crate) fn tagged(literal: &str, family: AddressFamily) -> IpAddress {
        IpAddress {
            literal: literal.to_owned(),
            family,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.literal
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }
}

impl Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Chain {
    Input,
    Forward,
    Output,
}

impl Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Input => write!(f, "INPUT"),
            Chain::Forward => write!(f, "FORWARD"),
            Chain::Output => write!(f, "OUTPUT"),
        }
    }
}

/// Fallback verdict of a built-in chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainPolicy {
    Drop,
    Accept,
    Reject,
}

impl Display for ChainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainPolicy::Drop => write!(f, "DROP"),
            ChainPolicy::Accept => write!(f, "ACCEPT"),
            ChainPolicy::Reject => write!(f, "REJECT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    /// ICMP is spelled per family; everything else is family-neutral.
    pub fn name(&self, family: AddressFamily) -> &'static str {
        match (self, family) {
            (Protocol::Tcp, _) => "tcp",
            (Protocol::Udp, _) => "udp",
            (Protocol::Icmp, AddressFamily::V4) => "icmp",
            (Protocol::Icmp, AddressFamily::V6) => "ipv6-icmp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpType {
    EchoRequest,
    EchoReply,
}

impl IcmpType {
    fn flag(family: AddressFamily) -> &'static str {
        match family {
            AddressFamily::V4 => "--icmp-type",
            AddressFamily::V6 => "--icmpv6-type",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            IcmpType::EchoRequest => "echo-request",
            IcmpType::EchoReply => "echo-reply",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtState {
    New,
    Established,
    Related,
    Invalid,
}

impl Display for CtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtState::New => write!(f, "NEW"),
            CtState::Established => write!(f, "ESTABLISHED"),
            CtState::Related => write!(f, "RELATED"),
            CtState::Invalid => write!(f, "INVALID"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortToken {
    Single(u16),
    /// Inclusive `low:high`
    Range(u16, u16),
}

impl PortToken {
    fn slots(&self) -> usize {
        match self {
            PortToken::Single(_) => 1,
            PortToken::Range(_, _) => 2,
        }
    }
}

impl Display for PortToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortToken::Single(port) => write!(f, "{}", port),
            PortToken::Range(low, high) => write!(f, "{}:{}", low, high),
        }
    }
}

impl FromStr for PortToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| format!("'{}' is not a port between 0 and 65535", p.trim()))
        };
        match s.split_once(':') {
            Some((low, high)) => {
                let (low, high) = (parse(low)?, parse(high)?);
                if low > high {
                    return Err(format!("port range {}:{} is reversed", low, high));
                }
                Ok(PortToken::Range(low, high))
            }
            None => Ok(PortToken::Single(parse(s)?)),
        }
    }
}

/// Ordered destination ports for one (family, protocol) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSet(Vec<PortToken>);

impl PortSet {
    pub fn from_tokens(tokens: &[PortToken]) -> PortSet {
        PortSet(tokens.to_vec())
    }

    pub fn tokens(&self) -> &[PortToken] {
        &self.0
    }

    /// Checks the invariants a match criterion needs.
    pub fn validate(&self) -> Result<(), String> {
        if self.0.is_empty() {
            return Err("port set is empty".to_owned());
        }
        for token in &self.0 {
            if let PortToken::Range(low, high) = token {
                if low > high {
                    return Err(format!("port range {}:{} is reversed", low, high));
                }
            }
        }
        let slots: usize = self.0.iter().map(PortToken::slots).sum();
        if slots > MULTIPORT_MAX_SLOTS {
            return Err(format!(
                "port set {} needs {} multiport slots, at most {} are allowed",
                self, slots, MULTIPORT_MAX_SLOTS
            ));
        }
        Ok(())
    }

    fn match_args(&self) -> Vec<String> {
        match self.0.as_slice() {
            [single] => vec!["--dport".to_owned(), single.to_string()],
            _ => vec![
                "-m".to_owned(),
                "multiport".to_owned(),
                "--dports".to_owned(),
                self.to_string(),
            ],
        }
    }
}

impl Display for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{}", token)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for PortSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = s
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<PortToken>, String>>()?;
        let set = PortSet(tokens);
        set.validate()?;
        Ok(set)
    }
}

/// At most `count` hits per `window_secs` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub count: u32,
    pub window_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recent {
    /// Record a timestamped hit for the packet's source
    Set { list: String },
    /// Match when the source has at least `hitcount` hits within `seconds`
    Update {
        list: String,
        seconds: u32,
        hitcount: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Match {
    pub protocol: Option<Protocol>,
    pub in_interface: Option<String>,
    pub out_interface: Option<String>,
    pub source: Option<IpAddress>,
    pub destination: Option<IpAddress>,
    pub dports: Option<PortSet>,
    pub icmp_type: Option<IcmpType>,
    pub ctstate: Vec<CtState>,
    pub recent: Option<Recent>,
    /// `-m limit --limit` rate, e.g. `1/second`
    pub limit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Accept,
    Drop,
    Log { prefix: String, level: u8 },
}

/// One entry of a chain. A rule without an action only has side effects
/// (such as recording a `recent` hit) and evaluation falls through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub family: AddressFamily,
    pub chain: Chain,
    pub matcher: Match,
    pub action: Option<Action>,
}

impl Rule {
    pub fn new(family: AddressFamily, chain: Chain, matcher: Match, action: Action) -> Rule {
        Rule {
            family,
            chain,
            matcher,
            action: Some(action),
        }
    }

    /// Arguments that follow `-A <CHAIN>` on the iptables command line.
    pub fn args(&self) -> Vec<String> {
        let m = &self.matcher;
        let mut args: Vec<String> = Vec::new();
        let mut push = |parts: &[&str]| args.extend(parts.iter().map(|p| (*p).to_owned()));

        if let Some(src) = &m.source {
            push(&["-s", src.as_str()]);
        }
        if let Some(dst) = &m.destination {
            push(&["-d", dst.as_str()]);
        }
        if let Some(iface) = &m.in_interface {
            push(&["-i", iface]);
        }
        if let Some(iface) = &m.out_interface {
            push(&["-o", iface]);
        }
        if let Some(proto) = m.protocol {
            push(&["-p", proto.name(self.family)]);
        }
        if let Some(ports) = &m.dports {
            let ports = ports.match_args();
            push(&ports.iter().map(String::as_str).collect::<Vec<_>>());
        }
        if let Some(icmp) = m.icmp_type {
            push(&[IcmpType::flag(self.family), icmp.name()]);
        }
        if !m.ctstate.is_empty() {
            let states = m
                .ctstate
                .iter()
                .map(CtState::to_string)
                .collect::<Vec<_>>()
                .join(",");
            push(&["-m", "conntrack", "--ctstate", &states]);
        }
        match &m.recent {
            Some(Recent::Set { list }) => push(&["-m", "recent", "--set", "--name", list]),
            Some(Recent::Update {
                list,
                seconds,
                hitcount,
            }) => push(&[
                "-m",
                "recent",
                "--update",
                "--seconds",
                &seconds.to_string(),
                "--hitcount",
                &hitcount.to_string(),
                "--name",
                list,
            ]),
            None => {}
        }
        if let Some(limit) = &m.limit {
            push(&["-m", "limit", "--limit", limit]);
        }
        match &self.action {
            Some(Action::Accept) => args.extend(["-j".to_owned(), "ACCEPT".to_owned()]),
            Some(Action::Drop) => args.extend(["-j".to_owned(), "DROP".to_owned()]),
            Some(Action::Log { prefix, level }) => args.extend([
                "-j".to_owned(),
                "LOG".to_owned(),
                "--log-prefix".to_owned(),
                prefix.clone(),
                "--log-level".to_owned(),
                level.to_string(),
            ]),
            None => {}
        }
        args
    }

    pub fn is_verdict(&self) -> bool {
        matches!(self.action, Some(Action::Accept) | Some(Action::Drop))
    }

    pub fn is_log(&self) -> bool {
        matches!(self.action, Some(Action::Log { .. }))
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-A {}", self.chain)?;
        for arg in self.args() {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// The complete filter table for one address family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub family: AddressFamily,
    pub input: ChainPolicy,
    pub forward: ChainPolicy,
    pub output: ChainPolicy,
    pub rules: Vec<Rule>,
}

impl Policy {
    /// Built-in chain policies in the order they are applied.
    pub fn defaults(&self) -> [(Chain, ChainPolicy); 3] {
        [
            (Chain::Input, self.input),
            (Chain::Forward, self.forward),
            (Chain::Output, self.output),
        ]
    }

    pub fn chain_rules(&self, chain: Chain) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.chain == chain)
    }

    /// The policy as an `iptables-restore` document.
    pub fn render(&self) -> String {
        let mut out = String::from("*filter\n");
        for (chain, policy) in self.defaults() {
            out.push_str(&format!(":{} {} [0:0]\n", chain, policy));
        }
        for rule in &self.rules {
            out.push_str(&rule.to_string());
            out.push('\n');
        }
        out.push_str("COMMIT\n");
        out
    }
}

/// Validated operator input the compiler turns into policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyModel {
    pub team: Vec<IpAddress>,
    pub domain_joined: bool,
    pub domain_controllers: Vec<IpAddress>,
}

impl PolicyModel {
    pub fn team_in(&self, family: AddressFamily) -> impl Iterator<Item = &IpAddress> {
        self.team.iter().filter(move |ip| ip.family() == family)
    }

    pub fn controllers_in(&self, family: AddressFamily) -> impl Iterator<Item = &IpAddress> {
        self.domain_controllers
            .iter()
            .filter(move |ip| ip.family() == family)
    }
}
