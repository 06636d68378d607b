use std::process;
use std::sync::{Mutex, Once};

use super::{DeploymentDir, Lock, State, Status};

/// What the signal handler must clean up for the operation in flight
#[derive(Clone)]
struct Cleanup {
    dir: DeploymentDir,
    failure: Status,
}

static ACTIVE: Mutex<Option<Cleanup>> = Mutex::new(None);
static HANDLER: Once = Once::new();

/// Cleanup owner for one locked operation.
///
/// Install after acquiring the lock and writing the in-progress status.
/// Until `success` is called, every abnormal exit path - error return,
/// panic unwind, SIGINT/SIGTERM - writes the operation's failure status
/// and releases the lock, so a deployment is never left in an
/// in-progress state with no process behind it.
pub struct OperationGuard {
    dir: DeploymentDir,
    failure: Status,
    done: bool,
}

impl OperationGuard {
    pub fn install(dir: &DeploymentDir, failure: Status) -> OperationGuard {
        HANDLER.call_once(|| {
            let res = ctrlc::set_handler(|| {
                run_signal_cleanup();
                // 130 = terminated by SIGINT, what a shell user expects
                process::exit(130);
            });
            if let Err(e) = res {
                warn!("could not install signal handler: {}", e);
            }
        });
        *ACTIVE.lock().unwrap() = Some(Cleanup { dir: dir.clone(), failure });
        OperationGuard { dir: dir.clone(), failure, done: false }
    }

    /// The operation wrote its terminal status; release the lock and
    /// stand down.
    pub fn success(mut self) -> super::Result<()> {
        self.done = true;
        *ACTIVE.lock().unwrap() = None;
        Lock::release(&self.dir)
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        *ACTIVE.lock().unwrap() = None;
        warn!("operation did not complete, marking {}", self.failure);
        if let Err(e) = State::set_status(&self.dir, self.failure) {
            error!("could not record failure status: {}", e);
        }
        if let Err(e) = Lock::release(&self.dir) {
            error!("could not release lock: {}", e);
        }
    }
}

fn run_signal_cleanup() {
    // poisoning is irrelevant here, the process is about to exit
    let active = match ACTIVE.lock() {
        Ok(g) => g.clone(),
        Err(p) => p.into_inner().clone(),
    };
    if let Some(c) = active {
        let _ = State::set_status(&c.dir, c.failure);
        let _ = Lock::release(&c.dir);
    }
}

#[cfg(test)]
mod tests {
    use super::OperationGuard;
    use crate::{CloudProvider, DeploymentDir, Lock, State, Status};
    use exacat_definitions::providers::Architecture;

    fn deployment() -> (tempfile::TempDir, DeploymentDir) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DeploymentDir::at(tmp.path());
        State::init(&dir, "exasol-2025.1.8", Architecture::X86_64, CloudProvider::Aws, 1).unwrap();
        (tmp, dir)
    }

    #[test]
    fn drop_without_success_marks_failure_and_unlocks() {
        let (_tmp, dir) = deployment();
        Lock::acquire(&dir, "deploy").unwrap();
        State::set_status(&dir, Status::DeployInProgress).unwrap();
        {
            let _guard = OperationGuard::install(&dir, Status::DeploymentFailed);
            // dropped here as if the engine bailed
        }
        assert_eq!(State::status_of(&dir), Status::DeploymentFailed);
        assert!(!Lock::exists(&dir));
    }

    #[test]
    fn success_releases_without_touching_status() {
        let (_tmp, dir) = deployment();
        Lock::acquire(&dir, "stop").unwrap();
        State::set_status(&dir, Status::StopInProgress).unwrap();
        let guard = OperationGuard::install(&dir, Status::StopFailed);
        State::set_status(&dir, Status::Stopped).unwrap();
        guard.success().unwrap();
        assert_eq!(State::status_of(&dir), Status::Stopped);
        assert!(!Lock::exists(&dir));
    }
}
