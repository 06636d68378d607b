use std::process::Command;

use super::terraform::is_binary_on_path;
use super::{DeploymentDir, Result};

/// Playbooks shipped in `.templates/playbooks/`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playbook {
    /// Download the database artifacts onto every node, install and
    /// bring the cluster up.
    InstallExasol,
    /// Halt the database services on every node; with
    /// `power_off_fallback` it additionally issues an in-guest shutdown.
    StopExasol,
}

impl Playbook {
    pub fn file_name(self) -> &'static str {
        match self {
            Playbook::InstallExasol => "install_exasol.yml",
            Playbook::StopExasol => "stop_exasol.yml",
        }
    }
}

/// Ordered `-e key=value` builder
#[derive(Debug, Clone, Default)]
pub struct ExtraVars {
    vars: Vec<(String, String)>,
}

impl ExtraVars {
    pub fn new() -> ExtraVars {
        Default::default()
    }

    pub fn add(&mut self, key: &str, value: &str) -> &mut ExtraVars {
        self.vars.push((key.into(), value.into()));
        self
    }

    fn to_args(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (k, v) in &self.vars {
            out.push("-e".into());
            out.push(format!("{}={}", k, v));
        }
        out
    }
}

/// Driver for `ansible-playbook` against the generated inventory
pub struct AnsibleRunner {
    dir: DeploymentDir,
}

impl AnsibleRunner {
    pub fn new(dir: &DeploymentDir) -> Result<AnsibleRunner> {
        if !is_binary_on_path("ansible-playbook") {
            bail!("ansible-playbook not found on PATH");
        }
        Ok(AnsibleRunner { dir: dir.clone() })
    }

    pub fn playbook(&self, pb: Playbook, extra: &ExtraVars) -> Result<()> {
        let args = self.args(pb, extra);
        debug!("ansible-playbook {}", args.join(" "));
        let status = Command::new("ansible-playbook")
            .args(&args)
            .current_dir(self.dir.root())
            // host keys churn with every provisioned cluster
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .status()
            .map_err(|e| format_err!("could not spawn ansible-playbook: {}", e))?;
        if !status.success() {
            bail!(
                "ansible-playbook {} exited with {}",
                pb.file_name(),
                status.code().unwrap_or(-1)
            );
        }
        Ok(())
    }

    fn args(&self, pb: Playbook, extra: &ExtraVars) -> Vec<String> {
        let mut args = vec![
            "-i".into(),
            self.dir.inventory_file().display().to_string(),
            "--private-key".into(),
            self.dir.ssh_key_file().display().to_string(),
        ];
        args.extend(extra.to_args());
        args.push(self.dir.playbooks_dir().join(pb.file_name()).display().to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::{AnsibleRunner, ExtraVars, Playbook};
    use crate::DeploymentDir;

    fn runner() -> AnsibleRunner {
        // bypass the PATH check; args construction needs no binary
        AnsibleRunner { dir: DeploymentDir::at("/work/c1") }
    }

    #[test]
    fn stop_args_without_fallback() {
        let args = runner().args(Playbook::StopExasol, &ExtraVars::new());
        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "/work/c1/inventory.ini");
        assert!(!args.iter().any(|a| a.contains("power_off_fallback")));
        assert_eq!(args.last().unwrap(), "/work/c1/.templates/playbooks/stop_exasol.yml");
    }

    #[test]
    fn stop_args_with_fallback() {
        let mut extra = ExtraVars::new();
        extra.add("power_off_fallback", "true");
        let args = runner().args(Playbook::StopExasol, &extra);
        let pos = args.iter().position(|a| a == "power_off_fallback=true").unwrap();
        assert_eq!(args[pos - 1], "-e");
    }

    #[test]
    fn extra_vars_keep_order() {
        let mut extra = ExtraVars::new();
        extra.add("db_download_url", "https://x").add("cluster_size", "3");
        let args = extra.to_args();
        assert_eq!(args, vec!["-e", "db_download_url=https://x", "-e", "cluster_size=3"]);
    }
}
