use std::fs::{self, OpenOptions};
use std::io::Write;

use chrono::{DateTime, Utc};

use super::paths::DeploymentDir;

// New failure error type
#[derive(Debug)]
pub struct LockError {
    inner: Context<LErrKind>,
}
// its associated enum
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum LErrKind {
    #[fail(display = "deployment is locked by '{}' (pid {} on {}, since {})", operation, pid, hostname, started_at)]
    Busy {
        operation: String,
        pid: u32,
        hostname: String,
        started_at: String,
    },

    #[fail(display = "could not create lock file '{}'", _0)]
    CreateFailure(String),

    #[fail(display = "lock file '{}' is unreadable", _0)]
    Unreadable(String),
}
use failure::{Error, Fail, Context, Backtrace, ResultExt};
use std::fmt::{self, Display};

// boilerplate error wrapping (might go away)
impl Fail for LockError {
    fn cause(&self) -> Option<&Fail> { self.inner.cause() }
    fn backtrace(&self) -> Option<&Backtrace> { self.inner.backtrace() }
}
impl Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<LErrKind> for LockError {
    fn from(kind: LErrKind) -> LockError {
        LockError { inner: Context::new(kind) }
    }
}
impl From<Context<LErrKind>> for LockError {
    fn from(inner: Context<LErrKind>) -> LockError {
        LockError { inner: inner }
    }
}
type Result<T> = std::result::Result<T, Error>;

/// Locks older than this are reclaimed regardless of the recorded pid.
/// No legitimate operation runs for a day.
const STALE_AGE_SECS: i64 = 24 * 60 * 60;

/// The lock document (`.exasolLock.json`).
///
/// One of these in a deployment directory means a process is mutating it.
/// Acquisition is an `O_EXCL` create so two processes can never both
/// succeed; whoever loses reads the winner's document to report who holds
/// the lock.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Lock {
    pub operation: String,
    pub pid: u32,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
}

impl Lock {
    /// Take the per-deployment lock for an operation
    ///
    /// Cleans up a stale lock (dead pid on this host, missing pid, or
    /// older than the staleness horizon) and retries once. A live lock
    /// surfaces as `LErrKind::Busy` with the holder's details.
    pub fn acquire(dir: &DeploymentDir, operation: &str) -> Result<Lock> {
        match Lock::try_create(dir, operation) {
            Ok(l) => return Ok(l),
            Err(e) => debug!("first lock attempt on {} failed: {}", dir.root().display(), e),
        }
        Lock::cleanup_stale(dir)?;
        Lock::try_create(dir, operation)
    }

    fn try_create(dir: &DeploymentDir, operation: &str) -> Result<Lock> {
        let lock = Lock {
            operation: operation.into(),
            pid: std::process::id(),
            hostname: local_hostname(),
            started_at: Utc::now(),
        };
        let path = dir.lock_file();
        let mut f = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Lock::busy_error(dir).into());
            }
            Err(e) => {
                return Err(Error::from(e)
                    .context(LErrKind::CreateFailure(path.display().to_string()))
                    .into());
            }
        };
        f.write_all(serde_json::to_string_pretty(&lock)?.as_bytes())?;
        f.sync_all()?;
        debug!("acquired {} lock on {}", operation, dir.root().display());
        Ok(lock)
    }

    fn busy_error(dir: &DeploymentDir) -> LockError {
        match Lock::info(dir) {
            Ok(l) => LErrKind::Busy {
                operation: l.operation,
                pid: l.pid,
                hostname: l.hostname,
                started_at: l.started_at.to_rfc3339(),
            }.into(),
            Err(_) => LErrKind::Unreadable(dir.lock_file().display().to_string()).into(),
        }
    }

    /// Remove the lock. Idempotent; missing file is fine.
    pub fn release(dir: &DeploymentDir) -> Result<()> {
        match fs::remove_file(dir.lock_file()) {
            Ok(_) => {
                debug!("released lock on {}", dir.root().display());
                Ok(())
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(dir: &DeploymentDir) -> bool {
        dir.lock_file().is_file()
    }

    /// Read the current lock document
    pub fn info(dir: &DeploymentDir) -> Result<Lock> {
        let raw = fs::read_to_string(dir.lock_file())
            .context(LErrKind::Unreadable(dir.lock_file().display().to_string()))?;
        Ok(serde_json::from_str(&raw)
            .context(LErrKind::Unreadable(dir.lock_file().display().to_string()))?)
    }

    /// Remove the lock if its holder is provably gone
    ///
    /// A crashed process cannot release its own lock, so the next
    /// invocation reclaims it here before acquisition.
    pub fn cleanup_stale(dir: &DeploymentDir) -> Result<()> {
        if !Lock::exists(dir) {
            return Ok(());
        }
        let stale = match Lock::info(dir) {
            // unreadable lock files carry no live pid we could respect
            Err(e) => {
                warn!("removing unreadable lock in {}: {}", dir.root().display(), e);
                true
            }
            Ok(l) => {
                let age = (Utc::now() - l.started_at).num_seconds();
                if age > STALE_AGE_SECS {
                    warn!("removing lock older than {}s (operation '{}')", STALE_AGE_SECS, l.operation);
                    true
                } else if l.hostname == local_hostname() && !pid_alive(l.pid) {
                    warn!("removing stale lock from dead pid {} ('{}')", l.pid, l.operation);
                    true
                } else {
                    false
                }
            }
        };
        if stale {
            fs::remove_file(dir.lock_file())?;
        }
        Ok(())
    }
}

pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".into())
}

/// True when a signal-0 probe says the pid exists
fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
