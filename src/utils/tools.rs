use crate::utils::error::CmdError;
use log::debug;
use sha1::{Digest, Sha1};
use std::fs;
use std::io::{self, stdin, stdout, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use subprocess::{ExitStatus, Popen, PopenConfig, Redirection};
use tempfile::NamedTempFile;

pub struct CmdResult {
    pub out: String,
    pub err: String,
    pub status: ExitStatus,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stderr if the program wrote any, otherwise the exit status.
    pub fn reason(&self) -> String {
        let err = self.err.trim();
        if err.is_empty() {
            format!("{:?}", self.status)
        } else {
            err.to_owned()
        }
    }
}

/// The capabilities the policy engine needs from the machine it hardens.
pub trait Host {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CmdResult, CmdError>;

    fn exists(&self, path: &Path) -> bool;

    /// Entries of `dir`; empty when it is missing or unreadable.
    fn list_dir(&self, dir: &Path) -> Vec<PathBuf>;

    fn hostname(&self) -> Option<String>;
}

/// The machine this process runs on.
pub struct LocalHost;

impl Host for LocalHost {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CmdResult, CmdError> {
        exec_cmd(cmd, args)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, dir: &Path) -> Vec<PathBuf> {
        match fs::read_dir(dir) {
            Ok(entries) => entries.filter_map(|e| e.ok().map(|e| e.path())).collect(),
            Err(e) => {
                debug!("Cannot list {}: {}", dir.display(), e);
                Vec::new()
            }
        }
    }

    fn hostname(&self) -> Option<String> {
        nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
    }
}

pub fn exec_cmd(cmd: &str, args: &[&str]) -> Result<CmdResult, CmdError> {
    let fail = |reason: String| CmdError {
        program: cmd.to_owned(),
        reason,
    };
    let mut argv = vec![cmd];
    argv.extend_from_slice(args);
    let mut p = Popen::create(
        argv.as_slice(),
        PopenConfig {
            stdout: Redirection::Pipe,
            stderr: Redirection::Pipe,
            ..Default::default()
        },
    )
    .map_err(|e| fail(e.to_string()))?;

    let (out, err) = p.communicate(None).map_err(|e| fail(e.to_string()))?;
    let status = p.wait().map_err(|e| fail(e.to_string()))?;

    Ok(CmdResult {
        out: out.unwrap_or_default(),
        err: err.unwrap_or_default(),
        status,
    })
}

/// Runs a command that must succeed, describing any failure.
pub fn run_checked(host: &dyn Host, cmd: &str, args: &[&str]) -> Result<CmdResult, String> {
    let line = cmd_line(cmd, args);
    debug!("{}", line);
    let res = host.run(cmd, args).map_err(|e| e.to_string())?;
    if !res.success() {
        return Err(format!("`{}` failed: {}", line, res.reason()));
    }
    Ok(res)
}

/// Renders a command line for logs and error messages.
pub fn cmd_line(cmd: &str, args: &[&str]) -> String {
    let mut line = String::from(cmd);
    for arg in args {
        line.push(' ');
        if arg.contains(char::is_whitespace) {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    line
}

pub fn prompt_line(question: &str) -> io::Result<String> {
    print!("{}: ", question);
    let _ = stdout().flush();
    let mut input = String::new();
    if stdin().read_line(&mut input)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stdin closed before an answer was given",
        ));
    }
    Ok(input.trim().to_owned())
}

pub fn sha1sum_vec(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Replaces `path` with `contents` via a temp file in the same directory,
/// so readers never observe a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
