//! The hardening run: detect, collect, validate, build, apply, persist.
//!
//! Stages only move forward. The first error halts the run in
//! [`Stage::Failed`]; rules already applied stay applied.

use crate::os::backend::{apply, Iptables};
use crate::os::boot::mechanism;
use crate::os::compiler::compile_all;
use crate::os::env::{self, PackageManager};
use crate::os::forward::{forward_logs, ForwardOutcome};
use crate::os::input::{validate_hostname, InputSource};
use crate::os::persist::{Persistence, PersistenceInstaller};
use crate::os::policy::{AddressFamily, IpAddress, Policy, PolicyModel};
use crate::os::store::{write_artifacts, RuleStoreArtifact};
use crate::os::validate::classify_list;
use crate::utils::config::HardenConfig;
use crate::utils::error::HardenError;
use crate::utils::tools::Host;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Stage {
    Idle,
    DetectingEnvironment,
    CollectingInput,
    ValidatingInput,
    BuildingPolicy,
    ApplyingPolicy,
    PersistingPolicy,
    Done,
    Failed(String),
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Idle => write!(f, "idle"),
            Stage::DetectingEnvironment => write!(f, "detecting environment"),
            Stage::CollectingInput => write!(f, "collecting input"),
            Stage::ValidatingInput => write!(f, "validating input"),
            Stage::BuildingPolicy => write!(f, "building policy"),
            Stage::ApplyingPolicy => write!(f, "applying policy"),
            Stage::PersistingPolicy => write!(f, "persisting policy"),
            Stage::Done => write!(f, "done"),
            Stage::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySummary {
    pub family: AddressFamily,
    pub defaults: Vec<String>,
    pub rule_count: usize,
    pub rules: Vec<String>,
    /// The intended ruleset as an `iptables-restore` document
    pub document: String,
}

impl From<&Policy> for PolicySummary {
    fn from(policy: &Policy) -> Self {
        PolicySummary {
            family: policy.family,
            defaults: policy
                .defaults()
                .iter()
                .map(|(chain, p)| format!("{} {}", chain, p))
                .collect(),
            rule_count: policy.rules.len(),
            rules: policy.rules.iter().map(|r| r.to_string()).collect(),
            document: policy.render(),
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub hostname: String,
    pub domain_joined: bool,
    pub package_manager: PackageManager,
    pub boot_mechanism: String,
    pub team: Vec<IpAddress>,
    pub domain_controllers: Vec<IpAddress>,
    pub policies: Vec<PolicySummary>,
    pub artifacts: Vec<RuleStoreArtifact>,
    pub disabled_managers: Vec<String>,
    pub persistence: Persistence,
    pub log_forwarding: ForwardOutcome,
}

pub struct Pipeline<'a> {
    config: &'a HardenConfig,
    host: &'a dyn Host,
    stage: Stage,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a HardenConfig, host: &'a dyn Host) -> Self {
        Pipeline {
            config,
            host,
            stage: Stage::Idle,
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn run(&mut self, input: &mut dyn InputSource) -> Result<RunReport, HardenError> {
        match self.execute(input) {
            Ok(report) => {
                self.advance(Stage::Done);
                Ok(report)
            }
            Err(e) => {
                error!("Run stopped while {}: {}", self.stage, e);
                self.stage = Stage::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn advance(&mut self, stage: Stage) {
        info!("Stage: {}", stage);
        self.stage = stage;
    }

    fn execute(&mut self, input: &mut dyn InputSource) -> Result<RunReport, HardenError> {
        let config = self.config;
        let host = self.host;

        self.advance(Stage::DetectingEnvironment);
        config.validate()?;
        let environment = env::detect(host)?;
        let domain_joined = env::probe_domain(host);
        info!(
            "Host is {}domain-joined",
            if domain_joined { "" } else { "not " }
        );

        self.advance(Stage::CollectingInput);
        let raw = input.collect(host.hostname().as_deref(), domain_joined)?;

        self.advance(Stage::ValidatingInput);
        validate_hostname(&raw.hostname)?;
        let team = classify_list(&raw.team, config.strictness)?;
        let domain_controllers = if domain_joined {
            classify_list(&raw.domain_controllers, config.strictness)?
        } else {
            Vec::new()
        };
        if team.is_empty() {
            warn!("No team addresses given, SSH will be closed to everyone");
        }
        let model = PolicyModel {
            team,
            domain_joined,
            domain_controllers,
        };

        self.advance(Stage::BuildingPolicy);
        let policies = compile_all(config, &model);
        for policy in &policies {
            debug!("{} policy:\n{}", policy.family, policy.render());
        }

        self.advance(Stage::ApplyingPolicy);
        // Stopping a competing manager may flush the packet filter, so they
        // go before the flush.
        let boot = mechanism(&environment.boot, host, &config.paths);
        let installer = PersistenceInstaller::new(config, boot.as_ref());
        let disabled_managers = installer.disable_competitors()?;
        let filter = Iptables::new(host, &environment.tools);
        for policy in &policies {
            apply(&filter, policy)?;
        }

        self.advance(Stage::PersistingPolicy);
        let artifacts = write_artifacts(&filter, &config.paths.rule_store_dir, &raw.hostname)?;
        let persistence = installer.install(&environment.tools, &artifacts)?;
        let log_forwarding = forward_logs(config, boot.as_ref());

        Ok(RunReport {
            hostname: raw.hostname,
            domain_joined,
            package_manager: environment.package_manager,
            boot_mechanism: environment.boot.to_string(),
            team: model.team,
            domain_controllers: model.domain_controllers,
            policies: policies.iter().map(PolicySummary::from).collect(),
            artifacts,
            disabled_managers,
            persistence,
            log_forwarding,
        })
    }
}
