use std::time::Duration;

use super::ansible::{AnsibleRunner, ExtraVars, Playbook};
use super::guard::OperationGuard;
use super::health::{self, Format, HealthOptions};
use super::inventory;
use super::progress::Progress;
use super::ssh;
use super::terraform::{PowerState, TerraformRunner};
use super::{DeploymentDir, Lock, Result, State, Status};

/// How long stop waits for powered-off nodes to drop off the network
const POWER_OFF_TIMEOUT: Duration = Duration::from_secs(300);
/// How long start waits for powered-on nodes to accept SSH
const POWER_ON_TIMEOUT: Duration = Duration::from_secs(600);
/// How long start polls health for a ready database
const START_HEALTH_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Gracefully stop the database and power the cluster down.
///
/// Both provider families run the same stop playbook; the difference is
/// who pulls the plug afterwards. API-power providers flip the power
/// control resources through the infra-as-code tool; manual-power
/// providers get the in-guest shutdown fallback inside the playbook.
pub fn stop(dir_path: &str) -> Result<()> {
    let dir = DeploymentDir::open(dir_path)?;
    let status = State::status_of(&dir);
    if !status.can_stop() {
        bail!("Cannot stop from current state: {}", status);
    }

    Lock::acquire(&dir, "stop")?;
    State::set_status(&dir, Status::StopInProgress)?;
    let guard = OperationGuard::install(&dir, Status::StopFailed);
    let progress = Progress::new("stop", Some(&dir));

    let state = State::read(&dir)?;
    let nodes = inventory::read_nodes(&dir)?;

    progress.step("ansible", "stop", "halting database services");
    let mut extra = ExtraVars::new();
    if !state.cloud_provider.api_power() {
        // no API to power off with, the playbook shuts the guest down
        extra.add("power_off_fallback", "true");
    }
    AnsibleRunner::new(&dir)?.playbook(Playbook::StopExasol, &extra)?;
    progress.done("ansible", "stop", "database services stopped");

    if state.cloud_provider.api_power() {
        progress.step("terraform", "power-off", "powering instances off");
        TerraformRunner::new(&dir)?.apply_power(PowerState::Stopped)?;
        let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        ssh::wait_all_unreachable(&dir, &names, POWER_OFF_TIMEOUT)?;
        progress.done("terraform", "power-off", "instances are down");
    }

    State::set_status(&dir, Status::Stopped)?;
    guard.success()?;
    info!("cluster stopped");
    Ok(())
}

/// Power the cluster back on and wait for the database to come up.
pub fn start(dir_path: &str) -> Result<()> {
    let dir = DeploymentDir::open(dir_path)?;
    let status = State::status_of(&dir);
    if !status.can_start() {
        bail!("Cannot start from current state: {}", status);
    }

    Lock::acquire(&dir, "start")?;
    State::set_status(&dir, Status::StartInProgress)?;
    let guard = OperationGuard::install(&dir, Status::StartFailed);
    let progress = Progress::new("start", Some(&dir));

    let state = State::read(&dir)?;
    let nodes = inventory::read_nodes(&dir)?;

    if state.cloud_provider.api_power() {
        progress.step("terraform", "power-on", "powering instances on");
        TerraformRunner::new(&dir)?.apply_power(PowerState::Running)?;
        let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        ssh::wait_all_reachable(&dir, &names, POWER_ON_TIMEOUT)?;
        progress.done("terraform", "power-on", "instances are up");
    } else if let Some(instructions) = state.cloud_provider.start_instructions() {
        println!("{}", instructions);
    }

    State::set_status(&dir, Status::Started)?;
    guard.success()?;

    // from here the health engine owns the story: it watches the nodes
    // come up and flips the status to database_ready itself
    progress.step("health", "wait", "waiting for the database to come online");
    let opts = HealthOptions {
        update: true,
        wait_for: Some((Status::DatabaseReady, START_HEALTH_TIMEOUT)),
        format: Format::Text,
    };
    match health::run(dir_path, &opts) {
        Ok(_) => {
            progress.done("health", "wait", "database is ready");
            Ok(())
        }
        Err(e) => {
            State::set_status(&dir, Status::StartFailed)?;
            bail!(
                "the database did not come online: {}\n\
                 Inspect the nodes with 'exacat health --deployment-dir {}' and retry \
                 'exacat start' once the cause is fixed.",
                e,
                dir.root().display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{CloudProvider, DeploymentDir, State, Status};
    use exacat_definitions::providers::Architecture;

    fn deployment(status: Status) -> (tempfile::TempDir, DeploymentDir) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DeploymentDir::at(tmp.path());
        State::init(&dir, "exasol-2025.1.8", Architecture::X86_64, CloudProvider::Aws, 1).unwrap();
        if status != Status::Initialized {
            State::set_status(&dir, status).unwrap();
        }
        (tmp, dir)
    }

    #[test]
    fn stop_gate_rejects_initialized() {
        let (tmp, dir) = deployment(Status::Initialized);
        let err = super::stop(tmp.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{}", err).contains("Cannot stop from current state: initialized"));
        // state unchanged, nothing locked
        assert_eq!(State::status_of(&dir), Status::Initialized);
        assert!(!crate::Lock::exists(&dir));
    }

    #[test]
    fn start_gate_rejects_ready() {
        let (tmp, dir) = deployment(Status::DatabaseReady);
        let err = super::start(tmp.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{}", err).contains("Cannot start from current state: database_ready"));
        assert_eq!(State::status_of(&dir), Status::DatabaseReady);
    }

    #[test]
    fn stop_gate_accepts_retry_states() {
        // gate passes, then the missing inventory aborts the run and the
        // guard records the failure
        let (tmp, dir) = deployment(Status::StopFailed);
        assert!(super::stop(tmp.path().to_str().unwrap()).is_err());
        assert_eq!(State::status_of(&dir), Status::StopFailed);
        assert!(!crate::Lock::exists(&dir));
    }
}
