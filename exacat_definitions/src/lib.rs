#![allow(renamed_and_removed_lints)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;

extern crate chrono;

#[macro_use]
extern crate log;

// sanity
extern crate regex;

// lock pid probing
extern crate libc;
extern crate hostname;

// password generation
extern crate rand;

#[macro_use] extern crate failure;

pub use failure::Error; //Fail
pub type Result<T> = std::result::Result<T, Error>;

/// Well known files inside a deployment directory
pub mod paths;
pub use paths::DeploymentDir;

/// Section keyed KEY=VALUE config reader used by the catalogs
pub mod conf;
pub use conf::Conf;

/// The versions catalog (versions.conf)
pub mod versions;
pub use versions::VersionsCatalog;

/// The instance types catalog (instance-types.conf)
pub mod instances;
pub use instances::InstanceTypes;

/// Durable deployment state document (.exasol.json)
pub mod state;
pub use state::{State, Status};

/// Single writer per-deployment file lock (.exasolLock.json)
pub mod lock;
pub use lock::Lock;

/// Cloud provider classifications
pub mod providers;
pub use providers::{Architecture, CloudProvider};

/// Generated passwords and download credentials (.credentials.json)
pub mod credentials;
pub use credentials::Credentials;

/// Typed variables.auto.tfvars writer
pub mod tfvars;
pub use tfvars::{TfValue, TfVars};
