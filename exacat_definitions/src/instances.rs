use std::path::PathBuf;

use super::conf::Conf;
use super::providers::{Architecture, CloudProvider};
use super::Result;

pub const INSTANCE_TYPES_FILE: &str = "instance-types.conf";

/// Default instance types per (provider, architecture).
///
/// One `[provider]` section per cloud with `x86_64=` / `arm64=` keys.
/// Consulted by init when the operator does not pass `--instance-type`.
#[derive(Debug, Clone)]
pub struct InstanceTypes {
    conf: Conf,
}

impl InstanceTypes {
    pub fn load() -> Result<InstanceTypes> {
        Ok(InstanceTypes { conf: Conf::read(catalog_path()?)? })
    }

    pub fn from_conf(conf: Conf) -> InstanceTypes {
        InstanceTypes { conf }
    }

    pub fn default_for(&self, provider: CloudProvider, arch: Architecture) -> Result<String> {
        self.conf
            .get(provider.as_str(), arch.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                format_err!(
                    "no default instance type for {}/{} in {} (pass --instance-type)",
                    provider, arch, INSTANCE_TYPES_FILE
                )
            })
    }
}

pub fn catalog_path() -> Result<PathBuf> {
    super::versions::config_file_path("EXASOL_INSTANCE_TYPES_CONFIG", INSTANCE_TYPES_FILE)
}

#[cfg(test)]
mod tests {
    use super::InstanceTypes;
    use crate::conf::Conf;
    use crate::providers::{Architecture, CloudProvider};

    static CATALOG: &str = "\
[aws]
x86_64=m5.2xlarge
arm64=m6g.2xlarge

[digitalocean]
x86_64=so-8vcpu-64gb
";

    #[test]
    fn lookups() {
        let it = InstanceTypes::from_conf(Conf::parse(CATALOG).unwrap());
        assert_eq!(it.default_for(CloudProvider::Aws, Architecture::X86_64).unwrap(), "m5.2xlarge");
        assert_eq!(it.default_for(CloudProvider::Aws, Architecture::Arm64).unwrap(), "m6g.2xlarge");
        assert!(it.default_for(CloudProvider::DigitalOcean, Architecture::Arm64).is_err());
        assert!(it.default_for(CloudProvider::Gcp, Architecture::X86_64).is_err());
    }
}
