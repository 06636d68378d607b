///
/// Structured progress events tied to one operation on one deployment
///

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;

use super::DeploymentDir;

/// One progress record, mirrored to the operator and the JSON log
#[derive(Serialize, Debug, Clone)]
pub struct ProgressEvent {
    pub operation: String,
    pub component: String,
    pub step: String,
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

/// Progress reporter for one operation.
///
/// Events go to two sinks: the operator via the logger, and an append
/// only JSON-lines file inside the deployment directory so external
/// tooling can follow along. `EXASOL_DEPLOY_DIR` names the directory for
/// commands that run before one exists (init).
pub struct Progress {
    operation: String,
    log_path: Option<PathBuf>,
}

impl Progress {
    pub fn new(operation: &str, dir: Option<&DeploymentDir>) -> Progress {
        let log_path = dir
            .map(|d| d.progress_log())
            .or_else(|| env::var("EXASOL_DEPLOY_DIR").ok().map(|d| DeploymentDir::at(d).progress_log()));
        Progress { operation: operation.into(), log_path }
    }

    /// A step has started
    pub fn step(&self, component: &str, step: &str, message: &str) {
        self.emit(component, step, "running", message);
    }

    /// A step has finished
    pub fn done(&self, component: &str, step: &str, message: &str) {
        self.emit(component, step, "done", message);
    }

    fn emit(&self, component: &str, step: &str, status: &str, message: &str) {
        let ev = ProgressEvent {
            operation: self.operation.clone(),
            component: component.into(),
            step: step.into(),
            status: status.into(),
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        };
        info!("[{}/{}] {}", ev.component, ev.step, ev.message);
        if let Some(ref pth) = self.log_path {
            // the progress log is advisory; never fail an operation over it
            if let Err(e) = append_json_line(pth, &ev) {
                debug!("could not append progress event to {}: {}", pth.display(), e);
            }
        }
    }
}

fn append_json_line(path: &PathBuf, ev: &ProgressEvent) -> super::Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{}", serde_json::to_string(ev)?)?;
    Ok(())
}
