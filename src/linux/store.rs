//! Durable per-family copies of the live ruleset.

use crate::os::backend::PacketFilter;
use crate::os::policy::AddressFamily;
use crate::utils::error::HardenError;
use crate::utils::tools::{sha1sum_vec, write_atomic};
use log::{debug, info};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleStoreArtifact {
    pub family: AddressFamily,
    pub path: PathBuf,
    pub sha1: String,
}

/// `<hostname>.rules` for IPv4, `<hostname>.rules.v6` for IPv6.
pub fn artifact_path(dir: &Path, hostname: &str, family: AddressFamily) -> PathBuf {
    match family {
        AddressFamily::V4 => dir.join(format!("{}.rules", hostname)),
        AddressFamily::V6 => dir.join(format!("{}.rules.v6", hostname)),
    }
}

/// Dumps the live ruleset of every family and replaces the stored copies.
/// Must run right after the policies were applied so the artifacts match
/// what the kernel holds.
pub fn write_artifacts(
    filter: &dyn PacketFilter,
    dir: &Path,
    hostname: &str,
) -> Result<Vec<RuleStoreArtifact>, HardenError> {
    AddressFamily::ALL
        .into_iter()
        .map(|family| {
            let dump = filter.save(family)?;
            let path = artifact_path(dir, hostname, family);
            debug!("Writing {} rule store {}", family, path.display());
            write_atomic(&path, dump.as_bytes(), 0o600).map_err(|e| {
                HardenError::PersistenceFailure(format!(
                    "could not write {}: {}",
                    path.display(),
                    e
                ))
            })?;
            info!("Saved {} rules to {}", family, path.display());
            Ok(RuleStoreArtifact {
                family,
                path,
                sha1: sha1sum_vec(dump.as_bytes()),
            })
        })
        .collect()
}
