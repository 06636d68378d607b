use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use super::{DeploymentDir, Result};

/// SSH wrapper bound to one deployment's generated `ssh_config`.
///
/// Host aliases are the node names (`n11`, `n11-cos`, ...), so callers
/// never deal with IPs, users or ports; the config carries all of that.
pub struct SshClient {
    config: PathBuf,
}

impl SshClient {
    pub fn new(dir: &DeploymentDir) -> SshClient {
        SshClient { config: dir.ssh_config_file() }
    }

    /// Quick reachability probe; false on timeout, refusal or auth issues
    pub fn reachable(&self, host: &str) -> bool {
        match self.command(host, "true").status() {
            Ok(s) => s.success(),
            Err(e) => {
                debug!("ssh probe of {} failed to spawn: {}", host, e);
                false
            }
        }
    }

    /// Run a remote command and return trimmed stdout
    pub fn run(&self, host: &str, cmd: &str) -> Result<String> {
        let out = self.command(host, cmd).output()
            .map_err(|e| format_err!("could not spawn ssh: {}", e))?;
        if !out.status.success() {
            bail!(
                "ssh {} '{}' exited with {}: {}",
                host,
                cmd,
                out.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn command(&self, host: &str, cmd: &str) -> Command {
        let mut c = Command::new("ssh");
        c.arg("-F").arg(&self.config)
            .arg("-o").arg("BatchMode=yes")
            .arg("-o").arg("ConnectTimeout=5")
            .arg(host)
            .arg(cmd);
        c
    }
}

const POLL: Duration = Duration::from_secs(10);

/// Block until every host accepts SSH
pub fn wait_all_reachable(dir: &DeploymentDir, hosts: &[String], timeout: Duration) -> Result<()> {
    let ssh = SshClient::new(dir);
    let started = Instant::now();
    let mut pending: Vec<&String> = hosts.iter().collect();
    loop {
        pending.retain(|h| !ssh.reachable(h));
        if pending.is_empty() {
            return Ok(());
        }
        if started.elapsed() > timeout {
            let names: Vec<&str> = pending.iter().map(|h| h.as_str()).collect();
            bail!("nodes never became reachable: {}", names.join(", "));
        }
        debug!("{} nodes still unreachable", pending.len());
        thread::sleep(POLL);
    }
}

/// Block until no host accepts SSH any more (post power-off check)
pub fn wait_all_unreachable(dir: &DeploymentDir, hosts: &[String], timeout: Duration) -> Result<()> {
    let ssh = SshClient::new(dir);
    let started = Instant::now();
    loop {
        let up: Vec<&str> = hosts.iter()
            .filter(|h| ssh.reachable(h))
            .map(|h| h.as_str())
            .collect();
        if up.is_empty() {
            return Ok(());
        }
        if started.elapsed() > timeout {
            bail!("nodes still reachable after power off: {}", up.join(", "));
        }
        debug!("{} nodes still reachable", up.len());
        thread::sleep(POLL);
    }
}
