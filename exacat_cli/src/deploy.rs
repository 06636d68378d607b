use std::fs;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use super::ansible::{AnsibleRunner, ExtraVars, Playbook};
use super::guard::OperationGuard;
use super::inventory::{self, Node};
use super::progress::Progress;
use super::ssh;
use super::terraform::TerraformRunner;
use super::{CloudProvider, Credentials, DeploymentDir, Lock, Result, State, Status};

/// Settle time between apply finishing and the first SSH probe
const BOOT_SETTLE: Duration = Duration::from_secs(30);
/// How long deploy waits for every node to accept SSH
const REACHABLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Azure reuses NIC reservations aggressively; destroying a cluster too
/// soon after creation races the reservation release.
const AZURE_DESTROY_GRACE_SECS: i64 = 240;

/// Apply the infrastructure and configure the database
pub fn deploy(dir_path: &str) -> Result<()> {
    let dir = DeploymentDir::open(dir_path)?;
    let status = State::status_of(&dir);
    if !status.can_deploy() {
        bail!("Cannot deploy from current state: {}", status);
    }

    Lock::acquire(&dir, "deploy")?;
    State::set_status(&dir, Status::DeployInProgress)?;
    let guard = OperationGuard::install(&dir, Status::DeploymentFailed);
    let progress = Progress::new("deploy", Some(&dir));

    let tf = TerraformRunner::new(&dir)?;
    progress.step("terraform", "init", "initialising providers");
    tf.init()?;
    progress.step("terraform", "plan", "planning infrastructure");
    tf.plan()?;
    progress.step("terraform", "apply", "applying infrastructure");
    tf.apply_plan()?;
    progress.done("terraform", "apply", "infrastructure is up");

    let nodes = nodes_from_outputs(&tf)?;
    inventory::generate(&dir, &nodes)?;
    progress.done("inventory", "write", &format!("{} nodes inventoried", nodes.len()));

    progress.step("ssh", "wait", "waiting for instances to accept SSH");
    thread::sleep(BOOT_SETTLE);
    let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
    ssh::wait_all_reachable(&dir, &names, REACHABLE_TIMEOUT)?;
    progress.done("ssh", "wait", "all nodes reachable");

    progress.step("ansible", "install", "installing and configuring Exasol");
    let creds = Credentials::read(&dir)?;
    let state = State::read(&dir)?;
    let mut extra = ExtraVars::new();
    extra.add("db_download_url", &creds.db_download_url)
        .add("db_checksum", &creds.db_checksum)
        .add("c4_download_url", &creds.c4_download_url)
        .add("c4_checksum", &creds.c4_checksum)
        .add("cluster_size", &state.cluster_size.to_string());
    AnsibleRunner::new(&dir)?.playbook(Playbook::InstallExasol, &extra)?;
    progress.done("ansible", "install", "database configured");

    State::set_status(&dir, Status::DatabaseReady)?;
    guard.success()?;
    info!("deployment ready; see {}", dir.info_file().display());
    Ok(())
}

fn nodes_from_outputs(tf: &TerraformRunner) -> Result<Vec<Node>> {
    let ips = tf.output_ips()?;
    ensure!(!ips.is_empty(), "terraform reported no node IPs");
    // output keys are the node names; keep them in node order
    let mut nodes: Vec<Node> = ips.into_iter()
        .map(|(name, ip)| Node { name, ip })
        .collect();
    nodes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(nodes)
}

/// Tear the infrastructure down
pub fn destroy(dir_path: &str, auto_approve: bool) -> Result<()> {
    let dir = DeploymentDir::open(dir_path)?;
    let status = State::status_of(&dir);
    if !status.can_destroy() {
        bail!("Cannot destroy from current state: {}", status);
    }

    if !TerraformRunner::state_exists(&dir) {
        // nothing was ever applied, or a previous destroy already won
        info!("no infrastructure state found, marking destroyed");
        State::set_status(&dir, Status::Destroyed)?;
        return Ok(());
    }

    if !auto_approve && !confirm(&format!(
        "Destroy the {} cluster in {}? [y/N] ",
        State::read(&dir)?.cloud_provider,
        dir.root().display()
    ))? {
        bail!("destroy aborted");
    }

    Lock::acquire(&dir, "destroy")?;
    State::set_status(&dir, Status::DestroyInProgress)?;
    let guard = OperationGuard::install(&dir, Status::DestroyFailed);
    let progress = Progress::new("destroy", Some(&dir));

    let state = State::read(&dir)?;
    if state.cloud_provider == CloudProvider::Azure {
        let age = state.age_seconds();
        if age < AZURE_DESTROY_GRACE_SECS {
            let wait = (AZURE_DESTROY_GRACE_SECS - age) as u64;
            progress.step("terraform", "grace", &format!("waiting {}s for Azure NIC release", wait));
            thread::sleep(Duration::from_secs(wait));
        }
    }

    progress.step("terraform", "destroy", "destroying infrastructure");
    TerraformRunner::new(&dir)?.destroy()?;
    progress.done("terraform", "destroy", "infrastructure removed");

    cleanup_generated(&dir)?;
    State::set_status(&dir, Status::Destroyed)?;
    guard.success()?;
    // the directory itself stays for audit
    info!("destroyed; {} preserved", dir.root().display());
    Ok(())
}

/// Remove what deploy generated and what terraform left behind.
/// State, credentials, tfvars and templates stay for audit.
fn cleanup_generated(dir: &DeploymentDir) -> Result<()> {
    let mut files = vec![
        dir.inventory_file(),
        dir.ssh_config_file(),
        dir.plan_file(),
        dir.ssh_key_file(),
        dir.ssh_pubkey_file(),
    ];
    files.extend(dir.terraform_state_paths());
    for f in files {
        if f.is_dir() {
            fs::remove_dir_all(&f)?;
        } else if f.exists() {
            fs::remove_file(&f)?;
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y") || answer.trim().eq_ignore_ascii_case("yes"))
}

#[cfg(test)]
mod tests {
    use super::destroy;
    use crate::{CloudProvider, DeploymentDir, State, Status};
    use exacat_definitions::providers::Architecture;

    #[test]
    fn deploy_gate_rejects_ready_cluster() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DeploymentDir::at(tmp.path());
        State::init(&dir, "exasol-2025.1.8", Architecture::X86_64, CloudProvider::Aws, 1).unwrap();
        State::set_status(&dir, Status::DeployInProgress).unwrap();
        State::set_status(&dir, Status::DatabaseReady).unwrap();
        let err = super::deploy(tmp.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{}", err).contains("Cannot deploy from current state: database_ready"));
    }

    #[test]
    fn destroy_without_tfstate_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DeploymentDir::at(tmp.path());
        State::init(&dir, "exasol-2025.1.8", Architecture::X86_64, CloudProvider::Hetzner, 1).unwrap();
        destroy(tmp.path().to_str().unwrap(), true).unwrap();
        assert_eq!(State::status_of(&dir), Status::Destroyed);
    }

    #[test]
    fn destroy_gate_rejects_destroyed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DeploymentDir::at(tmp.path());
        State::init(&dir, "exasol-2025.1.8", Architecture::X86_64, CloudProvider::Hetzner, 1).unwrap();
        destroy(tmp.path().to_str().unwrap(), true).unwrap();
        let err = destroy(tmp.path().to_str().unwrap(), true).unwrap_err();
        assert!(format!("{}", err).contains("destroyed"));
    }
}
