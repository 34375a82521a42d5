//! Live packet-filter control and the policy applier.

use crate::os::policy::{AddressFamily, Chain, ChainPolicy, Policy, Rule};
use crate::utils::error::HardenError;
use crate::utils::tools::{cmd_line, Host};
use log::{debug, info};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Resolved locations of the iptables tool family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterTools {
    pub iptables: PathBuf,
    pub ip6tables: PathBuf,
    pub iptables_save: PathBuf,
    pub ip6tables_save: PathBuf,
    pub iptables_restore: PathBuf,
    pub ip6tables_restore: PathBuf,
}

impl FilterTools {
    pub fn control(&self, family: AddressFamily) -> &Path {
        match family {
            AddressFamily::V4 => &self.iptables,
            AddressFamily::V6 => &self.ip6tables,
        }
    }

    pub fn save(&self, family: AddressFamily) -> &Path {
        match family {
            AddressFamily::V4 => &self.iptables_save,
            AddressFamily::V6 => &self.ip6tables_save,
        }
    }

    pub fn restore(&self, family: AddressFamily) -> &Path {
        match family {
            AddressFamily::V4 => &self.iptables_restore,
            AddressFamily::V6 => &self.ip6tables_restore,
        }
    }
}

/// Per-family control of the kernel packet filter.
pub trait PacketFilter {
    /// Removes every rule and user chain of the family.
    fn flush(&self, family: AddressFamily) -> Result<(), HardenError>;

    fn set_policy(
        &self,
        family: AddressFamily,
        chain: Chain,
        policy: ChainPolicy,
    ) -> Result<(), HardenError>;

    fn append(&self, rule: &Rule) -> Result<(), HardenError>;

    /// Serializes the live ruleset of the family.
    fn save(&self, family: AddressFamily) -> Result<String, HardenError>;
}

pub struct Iptables<'a> {
    host: &'a dyn Host,
    tools: &'a FilterTools,
}

impl<'a> Iptables<'a> {
    pub fn new(host: &'a dyn Host, tools: &'a FilterTools) -> Self {
        Iptables { host, tools }
    }

    fn control(&self, family: AddressFamily, args: &[&str]) -> Result<(), HardenError> {
        let program = self.tools.control(family).to_string_lossy();
        let command = cmd_line(&program, args);
        debug!("{}", command);
        let res = self
            .host
            .run(&program, args)
            .map_err(|e| HardenError::ApplyFailure {
                family,
                command: command.clone(),
                reason: e.to_string(),
            })?;
        if !res.success() {
            return Err(HardenError::ApplyFailure {
                family,
                command,
                reason: res.reason(),
            });
        }
        Ok(())
    }
}

impl PacketFilter for Iptables<'_> {
    fn flush(&self, family: AddressFamily) -> Result<(), HardenError> {
        self.control(family, &["-F"])?;
        self.control(family, &["-X"])?;
        self.control(family, &["-t", "mangle", "-F"])
    }

    fn set_policy(
        &self,
        family: AddressFamily,
        chain: Chain,
        policy: ChainPolicy,
    ) -> Result<(), HardenError> {
        self.control(family, &["-P", &chain.to_string(), &policy.to_string()])
    }

    fn append(&self, rule: &Rule) -> Result<(), HardenError> {
        let chain = rule.chain.to_string();
        let rule_args = rule.args();
        let mut args = vec!["-A", chain.as_str()];
        args.extend(rule_args.iter().map(String::as_str));
        self.control(rule.family, &args)
    }

    fn save(&self, family: AddressFamily) -> Result<String, HardenError> {
        let program = self.tools.save(family).to_string_lossy();
        let fail = |reason: String| {
            HardenError::PersistenceFailure(format!("{} failed: {}", program, reason))
        };
        let res = self
            .host
            .run(&program, &[])
            .map_err(|e| fail(e.to_string()))?;
        if !res.success() {
            return Err(fail(res.reason()));
        }
        if res.out.trim().is_empty() {
            return Err(fail("empty ruleset dump".to_owned()));
        }
        Ok(res.out)
    }
}

/// Replaces the live ruleset of `policy.family` with `policy`: flush, chain
/// policies, then every rule in compiled order. The first rejected command
/// aborts; nothing already applied is rolled back.
pub fn apply(filter: &dyn PacketFilter, policy: &Policy) -> Result<(), HardenError> {
    let family = policy.family;
    debug!("Resetting {} firewall and deleting old rules", family);
    filter.flush(family)?;
    info!("{} firewall has been wiped", family);
    for (chain, chain_policy) in policy.defaults() {
        filter.set_policy(family, chain, chain_policy)?;
        debug!("{} {} policy set to {}", family, chain, chain_policy);
    }
    for rule in &policy.rules {
        filter.append(rule)?;
    }
    info!("Applied {} {} rules", policy.rules.len(), family);
    Ok(())
}
