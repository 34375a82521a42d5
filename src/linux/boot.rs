//! Boot-time service registration.
//!
//! A [`BootUnit`] is a small declarative record. Each [`BootMechanism`]
//! knows how to render it, where it lives and how to register it, and how
//! to query and disable other services. The persistence installer only
//! talks to the trait.

use crate::utils::config::Paths;
use crate::utils::error::HardenError;
use crate::utils::tools::{run_checked, write_atomic, Host};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dependency {
    Network,
    LocalFs,
}

impl Dependency {
    fn systemd(&self) -> &'static str {
        match self {
            Dependency::Network => "network.target",
            Dependency::LocalFs => "local-fs.target",
        }
    }

    fn lsb(&self) -> &'static str {
        match self {
            Dependency::Network => "$network",
            Dependency::LocalFs => "$local_fs",
        }
    }
}

/// A one-shot action to run at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootUnit {
    pub name: String,
    pub description: String,
    pub command: PathBuf,
    pub after: Vec<Dependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Registrar {
    UpdateRcD(PathBuf),
    Chkconfig(PathBuf),
}

/// Which boot mechanism the host offers, with the tools it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BootKind {
    Systemd { systemctl: PathBuf },
    SysV { registrar: Registrar },
}

impl Display for BootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootKind::Systemd { .. } => write!(f, "systemd"),
            BootKind::SysV {
                registrar: Registrar::UpdateRcD(_),
            } => write!(f, "sysv (update-rc.d)"),
            BootKind::SysV {
                registrar: Registrar::Chkconfig(_),
            } => write!(f, "sysv (chkconfig)"),
        }
    }
}

pub trait BootMechanism {
    /// Where `unit` is written.
    fn unit_path(&self, unit: &BootUnit) -> PathBuf;

    fn render(&self, unit: &BootUnit) -> String;

    /// Writes the unit, replacing any previous copy, and enables it.
    fn register(&self, unit: &BootUnit) -> Result<PathBuf, HardenError>;

    fn is_enabled(&self, service: &str) -> bool;

    /// Stops `service` and keeps it from starting again at boot.
    fn disable(&self, service: &str) -> Result<(), HardenError>;

    fn restart(&self, service: &str) -> Result<(), HardenError>;
}

pub fn mechanism<'a>(
    kind: &'a BootKind,
    host: &'a dyn Host,
    paths: &'a Paths,
) -> Box<dyn BootMechanism + 'a> {
    match kind {
        BootKind::Systemd { systemctl } => Box::new(Systemd {
            host,
            systemctl,
            unit_dir: &paths.systemd_unit_dir,
        }),
        BootKind::SysV { registrar } => Box::new(SysV {
            host,
            registrar,
            init_dir: &paths.init_script_dir,
        }),
    }
}

fn write_unit(path: &Path, contents: &str, mode: u32) -> Result<(), HardenError> {
    debug!("Writing {}", path.display());
    write_atomic(path, contents.as_bytes(), mode).map_err(|e| {
        HardenError::PersistenceFailure(format!("could not write {}: {}", path.display(), e))
    })
}

pub struct Systemd<'a> {
    host: &'a dyn Host,
    systemctl: &'a Path,
    unit_dir: &'a Path,
}

impl Systemd<'_> {
    fn systemctl(&self, args: &[&str]) -> Result<(), HardenError> {
        run_checked(self.host, &self.systemctl.to_string_lossy(), args)
            .map(|_| ())
            .map_err(HardenError::PersistenceFailure)
    }
}

impl BootMechanism for Systemd<'_> {
    fn unit_path(&self, unit: &BootUnit) -> PathBuf {
        self.unit_dir.join(format!("{}.service", unit.name))
    }

    fn render(&self, unit: &BootUnit) -> String {
        let after = unit
            .after
            .iter()
            .map(Dependency::systemd)
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "[Unit]\n\
             Description={}\n\
             After={}\n\
             \n\
             [Service]\n\
             Type=oneshot\n\
             ExecStart={}\n\
             RemainAfterExit=yes\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            unit.description,
            after,
            unit.command.display()
        )
    }

    fn register(&self, unit: &BootUnit) -> Result<PathBuf, HardenError> {
        let path = self.unit_path(unit);
        write_unit(&path, &self.render(unit), 0o644)?;
        self.systemctl(&["daemon-reload"])?;
        self.systemctl(&["enable", &format!("{}.service", unit.name)])?;
        info!("Registered systemd unit {}", path.display());
        Ok(path)
    }

    fn is_enabled(&self, service: &str) -> bool {
        match self.host.run(
            &self.systemctl.to_string_lossy(),
            &["is-enabled", "--quiet", service],
        ) {
            Ok(res) => res.success(),
            Err(e) => {
                warn!("Could not ask systemd about {}, assuming disabled: {}", service, e);
                false
            }
        }
    }

    fn disable(&self, service: &str) -> Result<(), HardenError> {
        self.systemctl(&["disable", "--now", service])?;
        self.systemctl(&["mask", service])
    }

    fn restart(&self, service: &str) -> Result<(), HardenError> {
        self.systemctl(&["restart", service])
    }
}

/// `S<two digits><service>`, the runlevel link update-rc.d creates.
fn is_start_link(name: &str, service: &str) -> bool {
    match name.strip_prefix('S') {
        Some(rest) if rest.len() == service.len() + 2 => {
            rest.as_bytes()[..2].iter().all(u8::is_ascii_digit) && &rest[2..] == service
        }
        _ => false,
    }
}

pub struct SysV<'a> {
    host: &'a dyn Host,
    registrar: &'a Registrar,
    init_dir: &'a Path,
}

impl SysV<'_> {
    fn run(&self, program: &Path, args: &[&str]) -> Result<(), HardenError> {
        run_checked(self.host, &program.to_string_lossy(), args)
            .map(|_| ())
            .map_err(HardenError::PersistenceFailure)
    }

    fn script(&self, service: &str) -> PathBuf {
        self.init_dir.join(service)
    }
}

impl BootMechanism for SysV<'_> {
    fn unit_path(&self, unit: &BootUnit) -> PathBuf {
        self.script(&unit.name)
    }

    fn render(&self, unit: &BootUnit) -> String {
        let after = unit
            .after
            .iter()
            .map(Dependency::lsb)
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "#!/bin/sh\n\
             ### BEGIN INIT INFO\n\
             # Provides:          {name}\n\
             # Required-Start:    {after}\n\
             # Required-Stop:\n\
             # Default-Start:     2 3 4 5\n\
             # Default-Stop:\n\
             # Short-Description: {description}\n\
             ### END INIT INFO\n\
             \n\
             case \"$1\" in\n\
             \x20   start|restart|reload|force-reload)\n\
             \x20       exec {command}\n\
             \x20       ;;\n\
             \x20   stop|status)\n\
             \x20       exit 0\n\
             \x20       ;;\n\
             \x20   *)\n\
             \x20       echo \"Usage: $0 {{start|stop|status}}\" >&2\n\
             \x20       exit 3\n\
             \x20       ;;\n\
             esac\n",
            name = unit.name,
            after = after,
            description = unit.description,
            command = unit.command.display()
        )
    }

    fn register(&self, unit: &BootUnit) -> Result<PathBuf, HardenError> {
        let path = self.unit_path(unit);
        write_unit(&path, &self.render(unit), 0o755)?;
        match self.registrar {
            Registrar::UpdateRcD(update_rc_d) => {
                self.run(update_rc_d, &[&unit.name, "defaults"])?
            }
            Registrar::Chkconfig(chkconfig) => {
                self.run(chkconfig, &["--add", &unit.name])?;
                self.run(chkconfig, &[&unit.name, "on"])?;
            }
        }
        info!("Registered init script {}", path.display());
        Ok(path)
    }

    /// Registered to start at boot, whether or not it is running now.
    fn is_enabled(&self, service: &str) -> bool {
        if !self.host.exists(&self.script(service)) {
            return false;
        }
        match self.registrar {
            Registrar::UpdateRcD(_) => {
                let etc = self.init_dir.parent().unwrap_or(self.init_dir);
                (2..=5).any(|level| {
                    self.host
                        .list_dir(&etc.join(format!("rc{}.d", level)))
                        .iter()
                        .filter_map(|link| link.file_name())
                        .any(|name| is_start_link(&name.to_string_lossy(), service))
                })
            }
            Registrar::Chkconfig(chkconfig) => {
                match self.host.run(&chkconfig.to_string_lossy(), &[service]) {
                    Ok(res) => res.success(),
                    Err(e) => {
                        warn!("Could not ask chkconfig about {}, assuming disabled: {}", service, e);
                        false
                    }
                }
            }
        }
    }

    fn disable(&self, service: &str) -> Result<(), HardenError> {
        self.run(&self.script(service), &["stop"])?;
        match self.registrar {
            Registrar::UpdateRcD(update_rc_d) => self.run(update_rc_d, &["-f", service, "remove"]),
            Registrar::Chkconfig(chkconfig) => self.run(chkconfig, &[service, "off"]),
        }
    }

    fn restart(&self, service: &str) -> Result<(), HardenError> {
        self.run(&self.script(service), &["restart"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::test_helpers::MockHost;
    use crate::utils::config::HardenConfig;

    fn unit() -> BootUnit {
        BootUnit {
            name: "steelwall-firewall".to_owned(),
            description: "Restore SteelWall firewall rules".to_owned(),
            command: PathBuf::from("/usr/local/sbin/steelwall-restore"),
            after: vec![Dependency::Network],
        }
    }

    fn systemd_kind() -> BootKind {
        BootKind::Systemd {
            systemctl: PathBuf::from("/usr/bin/systemctl"),
        }
    }

    #[test]
    fn test_systemd_unit_rendering() {
        let host = MockHost::new();
        let config = HardenConfig::default();
        let kind = systemd_kind();
        let boot = mechanism(&kind, &host, &config.paths);
        assert_eq!(
            boot.render(&unit()),
            "[Unit]\nDescription=Restore SteelWall firewall rules\nAfter=network.target\n\n\
             [Service]\nType=oneshot\nExecStart=/usr/local/sbin/steelwall-restore\nRemainAfterExit=yes\n\n\
             [Install]\nWantedBy=multi-user.target\n"
        );
        assert_eq!(
            boot.unit_path(&unit()),
            PathBuf::from("/etc/systemd/system/steelwall-firewall.service")
        );
    }

    #[test]
    fn test_sysv_script_rendering() {
        let host = MockHost::new();
        let config = HardenConfig::default();
        let kind = BootKind::SysV {
            registrar: Registrar::UpdateRcD(PathBuf::from("/usr/sbin/update-rc.d")),
        };
        let script = mechanism(&kind, &host, &config.paths).render(&unit());
        assert!(script.starts_with("#!/bin/sh\n### BEGIN INIT INFO\n"));
        assert!(script.contains("# Provides:          steelwall-firewall\n"));
        assert!(script.contains("# Required-Start:    $network\n"));
        assert!(script.contains("    start|restart|reload|force-reload)\n        exec /usr/local/sbin/steelwall-restore\n"));
        assert!(script.contains("{start|stop|status}"));
    }

    #[test]
    fn test_systemd_register_writes_and_enables() {
        let dir = tempfile::tempdir().unwrap();
        let host = MockHost::new();
        let config = HardenConfig::default().rooted_at(dir.path());
        let kind = systemd_kind();
        let boot = mechanism(&kind, &host, &config.paths);
        let path = boot.register(&unit()).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("Type=oneshot"));
        assert_eq!(
            host.calls(),
            vec![
                "/usr/bin/systemctl daemon-reload",
                "/usr/bin/systemctl enable steelwall-firewall.service"
            ]
        );
    }

    #[test]
    fn test_chkconfig_register_and_disable() {
        let dir = tempfile::tempdir().unwrap();
        let host = MockHost::new();
        let config = HardenConfig::default().rooted_at(dir.path());
        let kind = BootKind::SysV {
            registrar: Registrar::Chkconfig(PathBuf::from("/sbin/chkconfig")),
        };
        let boot = mechanism(&kind, &host, &config.paths);
        let path = boot.register(&unit()).unwrap();
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);

        boot.disable("firewalld").unwrap();
        let stop = format!("{} stop", config.paths.init_script_dir.join("firewalld").display());
        assert_eq!(
            host.calls(),
            vec![
                "/sbin/chkconfig --add steelwall-firewall".to_owned(),
                "/sbin/chkconfig steelwall-firewall on".to_owned(),
                stop,
                "/sbin/chkconfig firewalld off".to_owned(),
            ]
        );
    }

    #[test]
    fn test_systemd_is_enabled_follows_exit_status() {
        let host = MockHost::new();
        host.fail_on("is-enabled --quiet ufw");
        let config = HardenConfig::default();
        let kind = systemd_kind();
        let boot = mechanism(&kind, &host, &config.paths);
        assert!(boot.is_enabled("firewalld"));
        assert!(!boot.is_enabled("ufw"));
    }

    #[test]
    fn test_systemctl_spawn_failure_reads_as_disabled() {
        let host = MockHost::new();
        host.spawn_fails_on("is-enabled --quiet nftables");
        let config = HardenConfig::default();
        let kind = systemd_kind();
        let boot = mechanism(&kind, &host, &config.paths);
        assert!(!boot.is_enabled("nftables"));
        assert_eq!(
            host.calls(),
            vec!["/usr/bin/systemctl is-enabled --quiet nftables"]
        );
    }

    #[test]
    fn test_sysv_is_enabled_follows_runlevel_links() {
        let host = MockHost::new();
        let config = HardenConfig::default();
        let kind = BootKind::SysV {
            registrar: Registrar::UpdateRcD(PathBuf::from("/usr/sbin/update-rc.d")),
        };
        let boot = mechanism(&kind, &host, &config.paths);
        host.add_path("/etc/rc2.d/S01ufw");
        assert!(!boot.is_enabled("ufw"));

        host.add_path("/etc/init.d/ufw");
        host.remove_path("/etc/rc2.d/S01ufw");
        host.add_path("/etc/rc2.d/K01ufw");
        host.add_path("/etc/rc3.d/S01ufw-extra");
        assert!(!boot.is_enabled("ufw"));

        host.add_path("/etc/rc5.d/S20ufw");
        assert!(boot.is_enabled("ufw"));
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_stopped_but_registered_manager_is_removed() {
        let host = MockHost::new();
        host.add_path("/etc/init.d/ufw");
        host.add_path("/etc/rc2.d/S01ufw");
        host.fail_on("ufw status");
        let config = HardenConfig::default();
        let kind = BootKind::SysV {
            registrar: Registrar::UpdateRcD(PathBuf::from("/usr/sbin/update-rc.d")),
        };
        let boot = mechanism(&kind, &host, &config.paths);
        assert!(boot.is_enabled("ufw"));
        boot.disable("ufw").unwrap();
        assert_eq!(
            host.calls(),
            vec!["/etc/init.d/ufw stop", "/usr/sbin/update-rc.d -f ufw remove"]
        );
    }

    #[test]
    fn test_chkconfig_is_enabled_uses_exit_status() {
        let host = MockHost::new();
        host.add_path("/etc/init.d/firewalld");
        host.add_path("/etc/init.d/ufw");
        host.fail_on("chkconfig ufw");
        let config = HardenConfig::default();
        let kind = BootKind::SysV {
            registrar: Registrar::Chkconfig(PathBuf::from("/sbin/chkconfig")),
        };
        let boot = mechanism(&kind, &host, &config.paths);
        assert!(boot.is_enabled("firewalld"));
        assert!(!boot.is_enabled("ufw"));
        assert!(!boot.is_enabled("nftables"));
        assert_eq!(
            host.calls(),
            vec!["/sbin/chkconfig firewalld", "/sbin/chkconfig ufw"]
        );
    }

    #[test]
    fn test_start_link_names() {
        assert!(is_start_link("S01ufw", "ufw"));
        assert!(is_start_link("S99firewalld", "firewalld"));
        assert!(!is_start_link("K01ufw", "ufw"));
        assert!(!is_start_link("S1ufw", "ufw"));
        assert!(!is_start_link("S01ufw-init", "ufw"));
        assert!(!is_start_link("Sxxufw", "ufw"));
    }

    #[test]
    fn test_failed_enable_is_persistence_failure() {
        let dir = tempfile::tempdir().unwrap();
        let host = MockHost::new();
        host.fail_on("enable steelwall-firewall");
        let config = HardenConfig::default().rooted_at(dir.path());
        let kind = systemd_kind();
        let boot = mechanism(&kind, &host, &config.paths);
        assert!(matches!(
            boot.register(&unit()),
            Err(HardenError::PersistenceFailure(_))
        ));
    }
}
