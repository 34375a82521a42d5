//! Probes the host for the package manager, packet-filter tooling, boot
//! mechanism and domain membership.

use crate::os::backend::FilterTools;
use crate::os::boot::{BootKind, Registrar};
use crate::utils::error::HardenError;
use crate::utils::tools::{run_checked, Host};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

const BIN_DIRS: &[&str] = &["/usr/sbin", "/sbin", "/usr/bin", "/bin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Zypper,
    Pacman,
    Apk,
}

impl PackageManager {
    /// Probe order; the first binary found wins.
    const PROBES: [(PackageManager, &'static str); 6] = [
        (PackageManager::Apt, "/usr/bin/apt-get"),
        (PackageManager::Dnf, "/usr/bin/dnf"),
        (PackageManager::Yum, "/usr/bin/yum"),
        (PackageManager::Zypper, "/usr/bin/zypper"),
        (PackageManager::Pacman, "/usr/bin/pacman"),
        (PackageManager::Apk, "/sbin/apk"),
    ];

    pub fn binary(&self) -> &'static str {
        Self::PROBES
            .iter()
            .find(|(pm, _)| pm == self)
            .map(|(_, bin)| *bin)
            .unwrap_or_default()
    }

    fn install_args(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Apt => &["install", "-y", "iptables"],
            PackageManager::Dnf | PackageManager::Yum => &["install", "-y", "iptables"],
            PackageManager::Zypper => &["--non-interactive", "install", "iptables"],
            PackageManager::Pacman => &["-S", "--noconfirm", "iptables"],
            PackageManager::Apk => &["add", "iptables", "ip6tables"],
        }
    }
}

impl Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = Path::new(self.binary())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        f.write_str(&name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub package_manager: PackageManager,
    pub boot: BootKind,
    pub tools: FilterTools,
}

/// Resolves everything a run depends on. Nothing here touches the packet
/// filter; the only possible change is installing the iptables package.
pub fn detect(host: &dyn Host) -> Result<Environment, HardenError> {
    let package_manager = detect_package_manager(host).ok_or_else(|| {
        HardenError::UnsupportedEnvironment(
            "no supported package manager found (apt-get, dnf, yum, zypper, pacman, apk)"
                .to_owned(),
        )
    })?;
    info!("Package manager: {}", package_manager);

    let boot = detect_boot(host).ok_or_else(|| {
        HardenError::UnsupportedEnvironment(
            "no usable boot mechanism found (systemd, update-rc.d, chkconfig)".to_owned(),
        )
    })?;
    info!("Boot mechanism: {}", boot);

    let tools = match resolve_tools(host) {
        Some(tools) => tools,
        None => {
            warn!("iptables tooling is missing, installing it");
            run_checked(host, package_manager.binary(), package_manager.install_args())
                .map_err(|e| {
                    HardenError::UnsupportedEnvironment(format!("could not install iptables: {}", e))
                })?;
            resolve_tools(host).ok_or_else(|| {
                HardenError::UnsupportedEnvironment(
                    "iptables tooling is still missing after installation".to_owned(),
                )
            })?
        }
    };
    debug!("Filter tools: {:?}", tools);

    Ok(Environment {
        package_manager,
        boot,
        tools,
    })
}

pub fn detect_package_manager(host: &dyn Host) -> Option<PackageManager> {
    PackageManager::PROBES
        .iter()
        .find(|(_, bin)| host.exists(Path::new(bin)))
        .map(|(pm, _)| *pm)
}

pub fn detect_boot(host: &dyn Host) -> Option<BootKind> {
    if host.exists(Path::new("/run/systemd/system")) {
        if let Some(systemctl) = find_binary(host, "systemctl") {
            return Some(BootKind::Systemd { systemctl });
        }
    }
    if host.exists(Path::new("/etc/init.d")) {
        if let Some(update_rc_d) = find_binary(host, "update-rc.d") {
            return Some(BootKind::SysV {
                registrar: Registrar::UpdateRcD(update_rc_d),
            });
        }
        if let Some(chkconfig) = find_binary(host, "chkconfig") {
            return Some(BootKind::SysV {
                registrar: Registrar::Chkconfig(chkconfig),
            });
        }
    }
    None
}

pub fn resolve_tools(host: &dyn Host) -> Option<FilterTools> {
    Some(FilterTools {
        iptables: find_binary(host, "iptables")?,
        ip6tables: find_binary(host, "ip6tables")?,
        iptables_save: find_binary(host, "iptables-save")?,
        ip6tables_save: find_binary(host, "ip6tables-save")?,
        iptables_restore: find_binary(host, "iptables-restore")?,
        ip6tables_restore: find_binary(host, "ip6tables-restore")?,
    })
}

/// Whether the host is joined to a directory domain: a Kerberos keytab, or
/// `realm list` reporting a realm.
pub fn probe_domain(host: &dyn Host) -> bool {
    if host.exists(Path::new("/etc/krb5.keytab")) {
        debug!("Found /etc/krb5.keytab");
        return true;
    }
    match find_binary(host, "realm") {
        Some(realm) => host
            .run(&realm.to_string_lossy(), &["list"])
            .map(|res| res.success() && !res.out.trim().is_empty())
            .unwrap_or(false),
        None => false,
    }
}

fn find_binary(host: &dyn Host, name: &str) -> Option<PathBuf> {
    BIN_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .find(|path| host.exists(path))
}
