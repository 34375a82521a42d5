use crate::os::policy::{PortSet, PortToken, RateLimit};
use crate::os::validate::Strictness;
use crate::utils::error::HardenError;
use serde::Serialize;
use std::path::PathBuf;

use PortToken::{Range, Single};

// Directory services over IPv4, including NetBIOS and the RPC dynamic range
const DC_TCP_PORTS_V4: &[PortToken] = &[
    Single(53),
    Single(88),
    Single(135),
    Single(139),
    Single(389),
    Single(445),
    Single(464),
    Single(636),
    Single(3268),
    Single(3269),
    Range(49152, 65535),
];
const DC_UDP_PORTS_V4: &[PortToken] = &[
    Single(53),
    Single(88),
    Single(123),
    Single(137),
    Single(138),
    Single(389),
    Single(464),
];
// No NetBIOS over IPv6
const DC_TCP_PORTS_V6: &[PortToken] = &[
    Single(53),
    Single(88),
    Single(135),
    Single(389),
    Single(445),
    Single(464),
    Single(636),
    Single(3268),
    Single(3269),
    Range(49152, 65535),
];
const DC_UDP_PORTS_V6: &[PortToken] = &[Single(53), Single(88), Single(123), Single(389), Single(464)];

const SSH_PORT: u16 = 22;
const SSH_RATE_LIMIT: RateLimit = RateLimit {
    count: 5,
    window_secs: 60,
};
const SSH_RECENT_LIST: &str = "SSH";
const ICMP_LIMIT: &str = "1/second";
const LOG_PREFIX_V4: &str = "IPTables-Dropped: ";
const LOG_PREFIX_V6: &str = "IP6Tables-Dropped: ";
const LOG_LEVEL: u8 = 4;
const LOG_FORWARD_TARGET: Option<&str> = None;
const COMPETING_MANAGERS: &[&str] = &["firewalld", "ufw", "nftables"];
const UNIT_NAME: &str = "steelwall-firewall";

#[derive(Debug, Clone, Serialize)]
pub struct DcPorts {
    pub v4_tcp: PortSet,
    pub v4_udp: PortSet,
    pub v6_tcp: PortSet,
    pub v6_udp: PortSet,
}

/// Filesystem locations the run writes to.
#[derive(Debug, Clone, Serialize)]
pub struct Paths {
    pub rule_store_dir: PathBuf,
    pub replay_script: PathBuf,
    pub systemd_unit_dir: PathBuf,
    pub init_script_dir: PathBuf,
    pub rsyslog_dir: PathBuf,
}

/// Everything a run needs besides operator input. Never mutated after
/// construction; the compiler is a pure function of this and the model.
#[derive(Debug, Clone, Serialize)]
pub struct HardenConfig {
    pub dc_ports: DcPorts,
    pub ssh_port: u16,
    pub ssh_rate_limit: RateLimit,
    pub ssh_recent_list: String,
    pub icmp_limit: String,
    pub log_prefix_v4: String,
    pub log_prefix_v6: String,
    pub log_level: u8,
    pub log_forward_target: Option<String>,
    pub strictness: Strictness,
    pub competing_managers: Vec<String>,
    pub unit_name: String,
    pub paths: Paths,
}

impl Default for HardenConfig {
    fn default() -> Self {
        HardenConfig {
            dc_ports: DcPorts {
                v4_tcp: PortSet::from_tokens(DC_TCP_PORTS_V4),
                v4_udp: PortSet::from_tokens(DC_UDP_PORTS_V4),
                v6_tcp: PortSet::from_tokens(DC_TCP_PORTS_V6),
                v6_udp: PortSet::from_tokens(DC_UDP_PORTS_V6),
            },
            ssh_port: SSH_PORT,
            ssh_rate_limit: SSH_RATE_LIMIT,
            ssh_recent_list: SSH_RECENT_LIST.to_owned(),
            icmp_limit: ICMP_LIMIT.to_owned(),
            log_prefix_v4: LOG_PREFIX_V4.to_owned(),
            log_prefix_v6: LOG_PREFIX_V6.to_owned(),
            log_level: LOG_LEVEL,
            log_forward_target: LOG_FORWARD_TARGET.map(str::to_owned),
            strictness: Strictness::default(),
            competing_managers: COMPETING_MANAGERS.iter().map(|s| (*s).to_owned()).collect(),
            unit_name: UNIT_NAME.to_owned(),
            paths: Paths {
                rule_store_dir: PathBuf::from("/etc/iptables"),
                replay_script: PathBuf::from("/usr/local/sbin/steelwall-restore"),
                systemd_unit_dir: PathBuf::from("/etc/systemd/system"),
                init_script_dir: PathBuf::from("/etc/init.d"),
                rsyslog_dir: PathBuf::from("/etc/rsyslog.d"),
            },
        }
    }
}

impl HardenConfig {
    /// Rejects constants that cannot compile into a working policy.
    pub fn validate(&self) -> Result<(), HardenError> {
        let sets = [
            ("IPv4 TCP DC", &self.dc_ports.v4_tcp),
            ("IPv4 UDP DC", &self.dc_ports.v4_udp),
            ("IPv6 TCP DC", &self.dc_ports.v6_tcp),
            ("IPv6 UDP DC", &self.dc_ports.v6_udp),
        ];
        for (name, set) in sets {
            set.validate()
                .map_err(|e| HardenError::InvalidConfig(format!("{} ports: {}", name, e)))?;
        }
        if self.ssh_rate_limit.count == 0 || self.ssh_rate_limit.window_secs == 0 {
            return Err(HardenError::InvalidConfig(format!(
                "SSH rate limit {}/{}s needs a count and window above zero",
                self.ssh_rate_limit.count, self.ssh_rate_limit.window_secs
            )));
        }
        if self.ssh_recent_list.trim().is_empty() {
            return Err(HardenError::InvalidConfig(
                "SSH recent list name is empty".to_owned(),
            ));
        }
        if self.log_prefix_v4.trim().is_empty() || self.log_prefix_v6.trim().is_empty() {
            return Err(HardenError::InvalidConfig("log prefix is empty".to_owned()));
        }
        // The kernel truncates LOG prefixes at 29 characters
        if self.log_prefix_v4.len() > 29 || self.log_prefix_v6.len() > 29 {
            return Err(HardenError::InvalidConfig(
                "log prefix is longer than 29 characters".to_owned(),
            ));
        }
        if self.log_level > 7 {
            return Err(HardenError::InvalidConfig(format!(
                "log level {} is not a syslog level",
                self.log_level
            )));
        }
        if self.unit_name.is_empty() || self.unit_name.contains('/') {
            return Err(HardenError::InvalidConfig(format!(
                "'{}' is not a usable unit name",
                self.unit_name
            )));
        }
        Ok(())
    }

    /// Points every write at `root`, for tests and staging.
    pub fn rooted_at(mut self, root: &std::path::Path) -> Self {
        self.paths = Paths {
            rule_store_dir: root.join("etc/iptables"),
            replay_script: root.join("usr/local/sbin/steelwall-restore"),
            systemd_unit_dir: root.join("etc/systemd/system"),
            init_script_dir: root.join("etc/init.d"),
            rsyslog_dir: root.join("etc/rsyslog.d"),
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        HardenConfig::default().validate().unwrap();
    }

    #[test]
    fn test_ipv6_dc_ports_drop_netbios() {
        let config = HardenConfig::default();
        for netbios in [137, 138, 139] {
            assert!(!config.dc_ports.v6_tcp.tokens().contains(&Single(netbios)));
            assert!(!config.dc_ports.v6_udp.tokens().contains(&Single(netbios)));
        }
        assert!(config.dc_ports.v4_udp.tokens().contains(&Single(137)));
    }

    #[test]
    fn test_empty_port_set_is_rejected() {
        let mut config = HardenConfig::default();
        config.dc_ports.v6_udp = PortSet::from_tokens(&[]);
        assert!(matches!(
            config.validate(),
            Err(HardenError::InvalidConfig(msg)) if msg.contains("IPv6 UDP DC")
        ));
    }

    #[test]
    fn test_zero_rate_limit_is_rejected() {
        let mut config = HardenConfig::default();
        config.ssh_rate_limit.window_secs = 0;
        assert!(config.validate().is_err());
        let mut config = HardenConfig::default();
        config.ssh_rate_limit.count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        let mut config = HardenConfig::default();
        config.dc_ports.v4_tcp = PortSet::from_tokens(&[Range(9000, 8000)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rooted_at_moves_every_path() {
        let config = HardenConfig::default().rooted_at(std::path::Path::new("/tmp/stage"));
        let p = &config.paths;
        for path in [
            &p.rule_store_dir,
            &p.replay_script,
            &p.systemd_unit_dir,
            &p.init_script_dir,
            &p.rsyslog_dir,
        ] {
            assert!(path.starts_with("/tmp/stage"), "{}", path.display());
        }
    }
}
