//! Shared test utilities for the policy engine.
//!
//! [`MockHost`] records every command instead of running it, answers path
//! probes from a fixed set and lets a test script failures and outputs.
//! This module is only compiled in test mode.

use crate::os::backend::FilterTools;
use crate::os::input::{InputSource, RawInput};
use crate::utils::error::{CmdError, HardenError};
use crate::utils::tools::{cmd_line, CmdResult, Host};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use subprocess::ExitStatus;

#[derive(Default)]
pub struct MockHost {
    calls: RefCell<Vec<String>>,
    failing: RefCell<Vec<String>>,
    unspawnable: RefCell<Vec<String>>,
    outputs: RefCell<Vec<(String, String)>>,
    paths: RefCell<HashSet<PathBuf>>,
    hostname: Option<String>,
}

impl MockHost {
    pub fn new() -> Self {
        MockHost::default()
    }

    /// A Debian-like host: apt, systemd and the full iptables tool family.
    pub fn debian() -> Self {
        let host = MockHost {
            hostname: Some("web01".to_owned()),
            ..Default::default()
        };
        for path in [
            "/usr/bin/apt-get",
            "/run/systemd/system",
            "/usr/bin/systemctl",
            "/usr/sbin/iptables",
            "/usr/sbin/ip6tables",
            "/usr/sbin/iptables-save",
            "/usr/sbin/ip6tables-save",
            "/usr/sbin/iptables-restore",
            "/usr/sbin/ip6tables-restore",
        ] {
            host.add_path(path);
        }
        host.set_output("/usr/sbin/iptables-save", "*filter\n:INPUT DROP [0:0]\nCOMMIT\n");
        host.set_output("/usr/sbin/ip6tables-save", "*filter\n:INPUT DROP [0:0]\nCOMMIT\n");
        host
    }

    /// Every command line containing `pattern` exits non-zero.
    pub fn fail_on(&self, pattern: &str) {
        self.failing.borrow_mut().push(pattern.to_owned());
    }

    /// Every command line containing `pattern` cannot be spawned at all.
    pub fn spawn_fails_on(&self, pattern: &str) {
        self.unspawnable.borrow_mut().push(pattern.to_owned());
    }

    /// Command lines starting with `prefix` print `out`.
    pub fn set_output(&self, prefix: &str, out: &str) {
        self.outputs
            .borrow_mut()
            .insert(0, (prefix.to_owned(), out.to_owned()));
    }

    pub fn add_path(&self, path: &str) {
        self.paths.borrow_mut().insert(PathBuf::from(path));
    }

    pub fn remove_path(&self, path: &str) {
        self.paths.borrow_mut().remove(Path::new(path));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Calls that change live packet-filter state.
    pub fn filter_mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                let program = c.split_whitespace().next().unwrap_or_default();
                program.ends_with("/iptables") || program.ends_with("/ip6tables")
            })
            .collect()
    }
}

impl Host for MockHost {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CmdResult, CmdError> {
        let line = cmd_line(cmd, args);
        self.calls.borrow_mut().push(line.clone());
        if self.unspawnable.borrow().iter().any(|p| line.contains(p.as_str())) {
            return Err(CmdError {
                program: cmd.to_owned(),
                reason: "mock spawn failure".to_owned(),
            });
        }
        let failed = self.failing.borrow().iter().any(|p| line.contains(p.as_str()));
        let out = self
            .outputs
            .borrow()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(CmdResult {
            out,
            err: if failed {
                "mock failure".to_owned()
            } else {
                String::new()
            },
            status: ExitStatus::Exited(if failed { 1 } else { 0 }),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.paths.borrow().contains(path)
    }

    fn list_dir(&self, dir: &Path) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = self
            .paths
            .borrow()
            .iter()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect();
        entries.sort();
        entries
    }

    fn hostname(&self) -> Option<String> {
        self.hostname.clone()
    }
}

pub fn tools() -> FilterTools {
    FilterTools {
        iptables: PathBuf::from("/usr/sbin/iptables"),
        ip6tables: PathBuf::from("/usr/sbin/ip6tables"),
        iptables_save: PathBuf::from("/usr/sbin/iptables-save"),
        ip6tables_save: PathBuf::from("/usr/sbin/ip6tables-save"),
        iptables_restore: PathBuf::from("/usr/sbin/iptables-restore"),
        ip6tables_restore: PathBuf::from("/usr/sbin/ip6tables-restore"),
    }
}

/// Fixed operator answers. An empty hostname takes the detected one, like
/// pressing enter at the prompt.
pub struct Scripted {
    pub input: RawInput,
    pub collected: usize,
}

impl Scripted {
    pub fn new(hostname: &str, team: &str, domain_controllers: &str) -> Self {
        Scripted {
            input: RawInput {
                hostname: hostname.to_owned(),
                team: team.to_owned(),
                domain_controllers: domain_controllers.to_owned(),
            },
            collected: 0,
        }
    }
}

impl InputSource for Scripted {
    fn collect(
        &mut self,
        default_hostname: Option<&str>,
        domain_joined: bool,
    ) -> Result<RawInput, HardenError> {
        self.collected += 1;
        let mut input = self.input.clone();
        if input.hostname.is_empty() {
            input.hostname = default_hostname.unwrap_or_default().to_owned();
        }
        if !domain_joined {
            input.domain_controllers.clear();
        }
        Ok(input)
    }
}
