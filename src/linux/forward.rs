//! Optional forwarding of firewall drop logs to a remote syslog collector.

use crate::os::boot::BootMechanism;
use crate::utils::config::HardenConfig;
use crate::utils::error::HardenError;
use crate::utils::tools::write_atomic;
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;

const DROP_IN: &str = "60-steelwall.conf";
const RSYSLOG: &str = "rsyslog";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForwardOutcome {
    Disabled,
    Forwarding { target: String, config: PathBuf },
    Failed { target: String, reason: String },
}

pub fn render_drop_in(config: &HardenConfig, target: &str) -> String {
    let mut out = String::from("# Generated by steelwall. Forwards dropped packet logs.\n");
    for prefix in [&config.log_prefix_v4, &config.log_prefix_v6] {
        out.push_str(&format!(":msg, contains, \"{}\" @@{}\n", prefix, target));
    }
    out
}

/// Points rsyslog at `log_forward_target` when one is configured. Never
/// fails the run: the live policy does not depend on it.
pub fn forward_logs(config: &HardenConfig, boot: &dyn BootMechanism) -> ForwardOutcome {
    let target = match &config.log_forward_target {
        Some(target) => target.clone(),
        None => return ForwardOutcome::Disabled,
    };
    match install(config, boot, &target) {
        Ok(path) => {
            info!("Forwarding firewall logs to {}", target);
            ForwardOutcome::Forwarding {
                target,
                config: path,
            }
        }
        Err(e) => {
            warn!("Could not set up log forwarding to {}: {}", target, e);
            ForwardOutcome::Failed {
                target,
                reason: e.to_string(),
            }
        }
    }
}

fn install(
    config: &HardenConfig,
    boot: &dyn BootMechanism,
    target: &str,
) -> Result<PathBuf, HardenError> {
    let path = config.paths.rsyslog_dir.join(DROP_IN);
    write_atomic(&path, render_drop_in(config, target).as_bytes(), 0o644).map_err(|e| {
        HardenError::PersistenceFailure(format!("could not write {}: {}", path.display(), e))
    })?;
    boot.restart(RSYSLOG)?;
    Ok(path)
}
