#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
#[macro_use]
extern crate serde_json;

// version discovery / artifact downloads
extern crate reqwest;

extern crate openssl_probe;

extern crate chrono;
extern crate semver;
extern crate sha2;

#[macro_use]
extern crate log;

// sanity
extern crate dirs;
extern crate regex;

// parallel node probes:
extern crate threadpool;

// signal driven cleanup
extern crate ctrlc;

#[macro_use] extern crate failure;

pub use failure::Error; //Fail
pub type Result<T> = std::result::Result<T, Error>;

extern crate exacat_definitions;
pub use exacat_definitions::{Credentials, DeploymentDir, InstanceTypes, Lock, State, Status,
                             TfValue, TfVars, VersionsCatalog};
pub use exacat_definitions::providers::{self, Architecture, CloudProvider};

/// Structured progress events for the operator and the log file
pub mod progress;

/// Failure-status guard held while an operation owns the lock
pub mod guard;

/// A small CLI interface to tofu/terraform
pub mod terraform;

/// A small CLI interface to ansible-playbook
pub mod ansible;

/// SSH probing and remote commands over the deployment ssh_config
pub mod ssh;

/// Generated inventory, ssh_config and INFO.txt handling
pub mod inventory;

/// Deployment directory materialisation
pub mod init;

/// Infra apply / teardown flows
pub mod deploy;

/// Stop/start across the two provider power families
pub mod power;

/// Parallel node probes and status reconciliation
pub mod health;

/// Versions catalog discovery of newer releases
pub mod update;

/// Convenience listers
pub mod list;

/// Smart initialiser with safety
///
/// Validates catalog overrides before any engine runs.
pub fn init() -> Result<()> {
    use std::env;
    use std::path::Path;
    openssl_probe::init_ssl_cert_env_vars(); // prerequisite for https clients

    for evar in &["EXASOL_VERSIONS_CONFIG", "EXASOL_INSTANCE_TYPES_CONFIG"] {
        if let Ok(pth) = env::var(evar) {
            if !Path::new(&pth).is_file() {
                bail!("{} points at '{}' which does not exist", evar, pth);
            }
        }
    }

    Ok(())
}
