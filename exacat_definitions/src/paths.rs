use std::path::{Path, PathBuf};

use super::Result;

/// A deployment directory and the well known files inside it.
///
/// The directory is the unit of isolation. Everything the orchestrator
/// persists for one cluster lives under it, and two deployments never
/// share a file. All accessors are pure path math; existence is only
/// checked by `is_deployment` and `open`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentDir {
    root: PathBuf,
}

impl DeploymentDir {
    /// Wrap a directory path without checking anything
    pub fn at<P: AsRef<Path>>(root: P) -> DeploymentDir {
        DeploymentDir { root: root.as_ref().to_path_buf() }
    }

    /// Wrap an existing deployment directory
    ///
    /// Fails when the directory does not contain a state document.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<DeploymentDir> {
        let d = DeploymentDir::at(root);
        if !d.is_deployment() {
            bail!("{} is not a deployment directory (no {})",
                  d.root.display(), super::state::STATE_FILE);
        }
        Ok(d)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when the directory carries a state document
    pub fn is_deployment(&self) -> bool {
        self.state_file().is_file()
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(super::state::STATE_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".exasolLock.json")
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.root.join(".credentials.json")
    }

    pub fn tfvars_file(&self) -> PathBuf {
        self.root.join("variables.auto.tfvars")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join(".templates")
    }

    pub fn playbooks_dir(&self) -> PathBuf {
        self.templates_dir().join("playbooks")
    }

    pub fn inventory_file(&self) -> PathBuf {
        self.root.join("inventory.ini")
    }

    pub fn ssh_config_file(&self) -> PathBuf {
        self.root.join("ssh_config")
    }

    pub fn info_file(&self) -> PathBuf {
        self.root.join("INFO.txt")
    }

    pub fn ssh_key_file(&self) -> PathBuf {
        self.root.join("exasol-key.pem")
    }

    pub fn ssh_pubkey_file(&self) -> PathBuf {
        self.root.join("exasol-key.pem.pub")
    }

    pub fn plan_file(&self) -> PathBuf {
        self.root.join("tfplan")
    }

    pub fn progress_log(&self) -> PathBuf {
        self.root.join(".progress.jsonl")
    }

    /// Files owned by the infra-as-code tool
    ///
    /// These are removed after a successful destroy; everything else in
    /// the directory is preserved for audit.
    pub fn terraform_state_paths(&self) -> Vec<PathBuf> {
        vec![
            self.root.join("terraform.tfstate"),
            self.root.join("terraform.tfstate.backup"),
            self.root.join(".terraform.lock.hcl"),
            self.root.join(".terraform"),
        ]
    }

    pub fn terraform_state_file(&self) -> PathBuf {
        self.root.join("terraform.tfstate")
    }
}

#[cfg(test)]
mod tests {
    use super::DeploymentDir;

    #[test]
    fn paths_are_rooted() {
        let d = DeploymentDir::at("/tmp/mycluster");
        assert_eq!(d.state_file().to_str().unwrap(), "/tmp/mycluster/.exasol.json");
        assert_eq!(d.lock_file().to_str().unwrap(), "/tmp/mycluster/.exasolLock.json");
        assert_eq!(d.tfvars_file().to_str().unwrap(), "/tmp/mycluster/variables.auto.tfvars");
        assert_eq!(d.playbooks_dir().to_str().unwrap(), "/tmp/mycluster/.templates/playbooks");
    }

    #[test]
    fn open_refuses_plain_directories() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(DeploymentDir::open(tmp.path()).is_err());
    }
}
