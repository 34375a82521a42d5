//! Makes the stored rule artifacts survive reboots.

use crate::os::backend::FilterTools;
use crate::os::boot::{BootMechanism, BootUnit, Dependency};
use crate::os::store::RuleStoreArtifact;
use crate::utils::config::HardenConfig;
use crate::utils::error::HardenError;
use crate::utils::tools::write_atomic;
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Persistence {
    pub replay_script: PathBuf,
    pub unit_path: PathBuf,
}

fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

/// Shell script that restores every artifact and fails if any restore does.
pub fn render_replay_script(tools: &FilterTools, artifacts: &[RuleStoreArtifact]) -> String {
    let mut script = String::from(
        "#!/bin/sh\n# Generated by steelwall. Restores the stored firewall policy.\nstatus=0\n",
    );
    for artifact in artifacts {
        script.push_str(&format!(
            "{} < {} || status=1\n",
            quote(tools.restore(artifact.family)),
            quote(&artifact.path)
        ));
    }
    script.push_str("exit $status\n");
    script
}

pub struct PersistenceInstaller<'a> {
    config: &'a HardenConfig,
    boot: &'a dyn BootMechanism,
}

impl<'a> PersistenceInstaller<'a> {
    pub fn new(config: &'a HardenConfig, boot: &'a dyn BootMechanism) -> Self {
        PersistenceInstaller { config, boot }
    }

    /// Stops and disables every competing firewall manager that is set to
    /// start at boot. Stopping one can flush the live ruleset, so this has to
    /// run before the policy is applied.
    pub fn disable_competitors(&self) -> Result<Vec<String>, HardenError> {
        let mut disabled = Vec::new();
        for manager in &self.config.competing_managers {
            if self.boot.is_enabled(manager) {
                warn!("{} is enabled and would overwrite the policy", manager);
                self.boot.disable(manager)?;
                info!("Stopped and disabled {}", manager);
                disabled.push(manager.clone());
            }
        }
        Ok(disabled)
    }

    /// Writes the replay script and registers the boot unit. Safe to run
    /// again: both files are replaced in place.
    pub fn install(
        &self,
        tools: &FilterTools,
        artifacts: &[RuleStoreArtifact],
    ) -> Result<Persistence, HardenError> {
        let script_path = &self.config.paths.replay_script;
        write_atomic(
            script_path,
            render_replay_script(tools, artifacts).as_bytes(),
            0o755,
        )
        .map_err(|e| {
            HardenError::PersistenceFailure(format!(
                "could not write {}: {}",
                script_path.display(),
                e
            ))
        })?;
        info!("Wrote replay script {}", script_path.display());

        let unit = BootUnit {
            name: self.config.unit_name.clone(),
            description: "Restore SteelWall firewall rules".to_owned(),
            command: script_path.clone(),
            after: vec![Dependency::Network, Dependency::LocalFs],
        };
        let unit_path = self.boot.register(&unit)?;

        Ok(Persistence {
            replay_script: script_path.clone(),
            unit_path,
        })
    }
}
