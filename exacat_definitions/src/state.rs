use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::paths::DeploymentDir;
use super::providers::{Architecture, CloudProvider};
use super::Result;

pub const STATE_FILE: &str = ".exasol.json";

/// Lifecycle phase of a deployment.
///
/// The closed set of statuses from the deployment state machine. This is
/// the single source of truth for what a directory is allowed to do next;
/// the remaining state document fields are descriptive metadata.
/// Raw strings only exist at the serde boundary.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Initialized,
    DeployInProgress,
    DatabaseReady,
    DeploymentFailed,
    StopInProgress,
    Stopped,
    StopFailed,
    StartInProgress,
    Started,
    StartFailed,
    DatabaseConnectionFailed,
    DestroyInProgress,
    Destroyed,
    DestroyFailed,
    /// State document absent or unreadable
    Unknown,
}

impl Status {
    /// Statuses deploy accepts as an entry point
    pub fn can_deploy(self) -> bool {
        match self {
            Status::Initialized | Status::DeploymentFailed => true,
            _ => false,
        }
    }

    /// Statuses stop accepts as an entry point
    pub fn can_stop(self) -> bool {
        match self {
            Status::DatabaseReady | Status::DatabaseConnectionFailed | Status::StopFailed => true,
            _ => false,
        }
    }

    /// Statuses start accepts as an entry point
    pub fn can_start(self) -> bool {
        match self {
            Status::Stopped | Status::StartFailed => true,
            _ => false,
        }
    }

    /// Statuses destroy accepts as an entry point
    ///
    /// Deliberately broad: tearing infrastructure down is the escape
    /// hatch from every recoverable state. In-flight operations are kept
    /// out by the lock and the in-progress gates here.
    pub fn can_destroy(self) -> bool {
        match self {
            Status::DeployInProgress
            | Status::StopInProgress
            | Status::StartInProgress
            | Status::DestroyInProgress
            | Status::Destroyed
            | Status::Unknown => false,
            _ => true,
        }
    }

    pub fn is_in_progress(self) -> bool {
        match self {
            Status::DeployInProgress
            | Status::StopInProgress
            | Status::StartInProgress
            | Status::DestroyInProgress => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // serde already knows the snake_case wire names
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

impl FromStr for Status {
    type Err = failure::Error;
    fn from_str(s: &str) -> Result<Status> {
        serde_json::from_value(serde_json::Value::String(s.into()))
            .map_err(|_| format_err!("unknown status '{}'", s))
    }
}

/// The durable state document (`.exasol.json`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct State {
    pub status: Status,
    pub db_version: String,
    pub architecture: Architecture,
    pub cloud_provider: CloudProvider,
    pub cluster_size: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl State {
    /// Seed the state document for a fresh deployment
    ///
    /// Fails when the directory already is a deployment.
    pub fn init(
        dir: &DeploymentDir,
        db_version: &str,
        architecture: Architecture,
        provider: CloudProvider,
        cluster_size: u32,
    ) -> Result<State> {
        if dir.is_deployment() {
            bail!("{} is already a deployment directory", dir.root().display());
        }
        let now = Utc::now();
        let state = State {
            status: Status::Initialized,
            db_version: db_version.into(),
            architecture,
            cloud_provider: provider,
            cluster_size,
            created_at: now,
            updated_at: now,
        };
        state.save(dir)?;
        Ok(state)
    }

    pub fn read(dir: &DeploymentDir) -> Result<State> {
        let raw = fs::read_to_string(dir.state_file())
            .map_err(|e| format_err!("could not read {}: {}", dir.state_file().display(), e))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Current status, `Unknown` when the document is absent or corrupt
    pub fn status_of(dir: &DeploymentDir) -> Status {
        match State::read(dir) {
            Ok(s) => s.status,
            Err(e) => {
                debug!("no readable state in {}: {}", dir.root().display(), e);
                Status::Unknown
            }
        }
    }

    /// Persist a status transition, refreshing `updated_at`
    ///
    /// The engines gate which transitions are legal; this only persists.
    pub fn set_status(dir: &DeploymentDir, status: Status) -> Result<()> {
        ensure!(status != Status::Unknown, "refusing to persist unknown status");
        let mut state = State::read(dir)?;
        debug!("{}: {} -> {}", dir.root().display(), state.status, status);
        state.status = status;
        state.updated_at = Utc::now();
        state.save(dir)
    }

    fn save(&self, dir: &DeploymentDir) -> Result<()> {
        let doc = serde_json::to_string_pretty(self)?;
        write_atomic(&dir.state_file(), doc.as_bytes())
    }

    /// Seconds since the deployment was initialised
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }
}

/// Write a file so concurrent readers see the old or the new content,
/// never a torn mix: sibling tempfile, fsync, rename over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent()
        .ok_or_else(|| format_err!("{} has no parent directory", path.display()))?;
    let tmp = dir.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));
    {
        let mut f = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    // best effort directory sync so the rename itself is durable
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}
