use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::process::Command;

use super::DeploymentDir;

// New failure error type
#[derive(Debug)]
pub struct TfError {
    inner: Context<TfErrKind>,
}
// its associated enum
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum TfErrKind {
    #[fail(display = "neither tofu nor terraform found on PATH")]
    BinaryNotFound,

    #[fail(display = "'{} {}' exited with {}", _0, _1, _2)]
    CommandFailed(String, String, i32),

    #[fail(display = "could not parse terraform output: {}", _0)]
    OutputParse(String),
}
use failure::{Error, Fail, Context, Backtrace, ResultExt};
use std::fmt::{self, Display};

// boilerplate error wrapping (might go away)
impl Fail for TfError {
    fn cause(&self) -> Option<&Fail> { self.inner.cause() }
    fn backtrace(&self) -> Option<&Backtrace> { self.inner.backtrace() }
}
impl Display for TfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<TfErrKind> for TfError {
    fn from(kind: TfErrKind) -> TfError {
        TfError { inner: Context::new(kind) }
    }
}
impl From<Context<TfErrKind>> for TfError {
    fn from(inner: Context<TfErrKind>) -> TfError {
        TfError { inner: inner }
    }
}
type Result<T> = std::result::Result<T, Error>;

/// Desired instance power handed to the power control resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Stopped,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::Running => "running",
            PowerState::Stopped => "stopped",
        }
    }
}

/// True when `name` resolves through PATH
pub fn is_binary_on_path(name: &str) -> bool {
    env::var_os("PATH")
        .map(|paths| {
            env::split_paths(&paths).any(|p| p.join(name).is_file())
        })
        .unwrap_or(false)
}

/// Driver for the infra-as-code binary inside one deployment directory.
///
/// Prefers OpenTofu, falls back to terraform; `EXACAT_TERRAFORM_BIN`
/// overrides discovery. All invocations run with the deployment
/// directory as working directory so the symlinked root module and
/// `variables.auto.tfvars` are picked up implicitly.
pub struct TerraformRunner {
    binary: PathBuf,
    dir: DeploymentDir,
}

impl TerraformRunner {
    pub fn new(dir: &DeploymentDir) -> Result<TerraformRunner> {
        Ok(TerraformRunner { binary: find_binary()?, dir: dir.clone() })
    }

    pub fn init(&self) -> Result<()> {
        self.run(&["init".into(), "-input=false".into()])
    }

    pub fn plan(&self) -> Result<()> {
        let out = format!("-out={}", self.dir.plan_file().display());
        self.run(&["plan".into(), "-input=false".into(), out])
    }

    pub fn apply_plan(&self) -> Result<()> {
        self.run(&[
            "apply".into(),
            "-input=false".into(),
            "-auto-approve".into(),
            self.dir.plan_file().display().to_string(),
        ])
    }

    /// Flip the power control resources without touching anything else
    pub fn apply_power(&self, desired: PowerState) -> Result<()> {
        self.run(&Self::power_args(desired))
    }

    pub fn destroy(&self) -> Result<()> {
        self.run(&["destroy".into(), "-input=false".into(), "-auto-approve".into()])
    }

    pub fn state_exists(dir: &DeploymentDir) -> bool {
        dir.terraform_state_file().is_file()
    }

    /// Node name to public IP, from the `node_public_ips` output
    pub fn output_ips(&self) -> Result<BTreeMap<String, String>> {
        let raw = self.capture(&["output", "-json", "node_public_ips"])?;
        let parsed: BTreeMap<String, String> = serde_json::from_str(raw.trim())
            .context(TfErrKind::OutputParse(raw.trim().to_string()))?;
        Ok(parsed)
    }

    fn power_args(desired: PowerState) -> Vec<String> {
        vec![
            "apply".into(),
            "-input=false".into(),
            "-auto-approve".into(),
            format!("-var=infra_desired_state={}", desired.as_str()),
        ]
    }

    fn run(&self, args: &[String]) -> Result<()> {
        debug!("{} {} (in {})", self.binary.display(), args.join(" "), self.dir.root().display());
        let status = Command::new(&self.binary)
            .args(args)
            .current_dir(self.dir.root())
            .status()
            .context(TfErrKind::CommandFailed(
                self.binary.display().to_string(), args.join(" "), -1))?;
        if !status.success() {
            return Err(TfErrKind::CommandFailed(
                self.binary.display().to_string(),
                args.join(" "),
                status.code().unwrap_or(-1),
            ).into());
        }
        Ok(())
    }

    fn capture(&self, args: &[&str]) -> Result<String> {
        debug!("{} {} (captured)", self.binary.display(), args.join(" "));
        let out = Command::new(&self.binary)
            .args(args)
            .current_dir(self.dir.root())
            .output()
            .context(TfErrKind::CommandFailed(
                self.binary.display().to_string(), args.join(" "), -1))?;
        if !out.status.success() {
            return Err(TfErrKind::CommandFailed(
                self.binary.display().to_string(),
                args.join(" "),
                out.status.code().unwrap_or(-1),
            ).into());
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

fn find_binary() -> Result<PathBuf> {
    if let Ok(p) = env::var("EXACAT_TERRAFORM_BIN") {
        return Ok(PathBuf::from(p));
    }
    for cand in &["tofu", "terraform"] {
        if is_binary_on_path(cand) {
            return Ok(PathBuf::from(cand));
        }
    }
    Err(TfErrKind::BinaryNotFound.into())
}

#[cfg(test)]
mod tests {
    use super::{PowerState, TerraformRunner};

    #[test]
    fn power_flip_is_targeted_and_unattended() {
        let args = TerraformRunner::power_args(PowerState::Stopped);
        assert!(args.contains(&"-auto-approve".to_string()));
        assert!(args.contains(&"-var=infra_desired_state=stopped".to_string()));
        let args = TerraformRunner::power_args(PowerState::Running);
        assert!(args.contains(&"-var=infra_desired_state=running".to_string()));
    }
}
