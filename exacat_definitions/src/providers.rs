use std::str::FromStr;

use super::Result;

/// Cluster default firewall ports
pub const SSH_PORT: u16 = 22;
pub const BUCKETFS_PORT: u16 = 2581;
pub const ADMINUI_PORT: u16 = 8443;
pub const DB_PORT: u16 = 8563;
pub const COS_SSH_PORT: u16 = 20002;
pub const CONFD_PORT: u16 = 20003;
/// Inter-node overlay traffic
pub const VXLAN_PORT: u16 = 4789;

/// CPU architecture of the database image
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "arm64")]
    Arm64,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = failure::Error;
    fn from_str(s: &str) -> Result<Architecture> {
        match s {
            "x86_64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            _ => bail!("unknown architecture '{}' (expected x86_64 or arm64)", s),
        }
    }
}

/// Supported cloud providers.
///
/// The important split is power control: API-power providers can switch
/// existing instances on and off through the infra-as-code tool, while
/// manual-power providers only get an in-guest shutdown and the operator
/// powers the instances back on out-of-band.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
    Hetzner,
    DigitalOcean,
    Exoscale,
    Oci,
    Libvirt,
}

impl CloudProvider {
    pub fn all() -> Vec<CloudProvider> {
        vec![
            CloudProvider::Aws,
            CloudProvider::Azure,
            CloudProvider::Gcp,
            CloudProvider::Hetzner,
            CloudProvider::DigitalOcean,
            CloudProvider::Exoscale,
            CloudProvider::Oci,
            CloudProvider::Libvirt,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "azure",
            CloudProvider::Gcp => "gcp",
            CloudProvider::Hetzner => "hetzner",
            CloudProvider::DigitalOcean => "digitalocean",
            CloudProvider::Exoscale => "exoscale",
            CloudProvider::Oci => "oci",
            CloudProvider::Libvirt => "libvirt",
        }
    }

    /// Whether stop/start can drive instance power programmatically.
    ///
    /// Libvirt counts as API-power: on the system daemons we target,
    /// domain power is fully scriptable.
    pub fn api_power(self) -> bool {
        match self {
            CloudProvider::Aws | CloudProvider::Azure | CloudProvider::Gcp | CloudProvider::Libvirt => true,
            CloudProvider::Hetzner
            | CloudProvider::DigitalOcean
            | CloudProvider::Exoscale
            | CloudProvider::Oci => false,
        }
    }

    /// Whether the provider offers instances of this architecture
    pub fn supports(self, arch: Architecture) -> bool {
        match (self, arch) {
            (CloudProvider::DigitalOcean, Architecture::Arm64) => false,
            _ => true,
        }
    }

    /// Login user for the operator SSH entries
    pub fn ssh_user(self) -> &'static str {
        match self {
            CloudProvider::Aws | CloudProvider::Gcp => "ubuntu",
            CloudProvider::Azure => "azureuser",
            CloudProvider::Oci => "opc",
            CloudProvider::Hetzner
            | CloudProvider::DigitalOcean
            | CloudProvider::Exoscale
            | CloudProvider::Libvirt => "root",
        }
    }

    /// CLI binary checked by the init preflight
    pub fn cli_binary(self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "az",
            CloudProvider::Gcp => "gcloud",
            CloudProvider::Hetzner => "hcloud",
            CloudProvider::DigitalOcean => "doctl",
            CloudProvider::Exoscale => "exo",
            CloudProvider::Oci => "oci",
            CloudProvider::Libvirt => "virsh",
        }
    }

    /// Operator guidance printed by `start` on manual-power providers
    pub fn start_instructions(self) -> Option<String> {
        if self.api_power() {
            return None;
        }
        let (console, cli) = match self {
            CloudProvider::Hetzner => (
                "https://console.hetzner.cloud/",
                "hcloud server poweron <server>",
            ),
            CloudProvider::DigitalOcean => (
                "https://cloud.digitalocean.com/droplets",
                "doctl compute droplet-action power-on <droplet-id>",
            ),
            CloudProvider::Exoscale => (
                "https://portal.exoscale.com/",
                "exo compute instance start <instance>",
            ),
            CloudProvider::Oci => (
                "https://cloud.oracle.com/compute/instances",
                "oci compute instance action --action START --instance-id <ocid>",
            ),
            _ => unreachable!(),
        };
        Some(format!(
            "{} cannot power instances on programmatically.\n\
             Power the cluster nodes back on yourself, either in the console:\n  {}\n\
             or with the provider CLI, once per node:\n  {}\n\
             The nodes will be picked up automatically once they are reachable.",
            self, console, cli
        ))
    }

    /// Shell snippet run on a node to ask the cloud metadata service for
    /// the public IP. None when the provider has no such service.
    pub fn public_ip_probe(self) -> Option<&'static str> {
        match self {
            CloudProvider::Aws | CloudProvider::Hetzner | CloudProvider::Exoscale => {
                Some("curl -sf -m 5 http://169.254.169.254/latest/meta-data/public-ipv4")
            }
            CloudProvider::DigitalOcean => {
                Some("curl -sf -m 5 http://169.254.169.254/metadata/v1/interfaces/public/0/ipv4/address")
            }
            CloudProvider::Gcp => Some(
                "curl -sf -m 5 -H 'Metadata-Flavor: Google' \
                 http://169.254.169.254/computeMetadata/v1/instance/network-interfaces/0/access-configs/0/external-ip",
            ),
            CloudProvider::Azure => Some(
                "curl -sf -m 5 -H 'Metadata: true' \
                 'http://169.254.169.254/metadata/instance/network/interface/0/ipv4/ipAddress/0/publicIpAddress?api-version=2021-02-01&format=text'",
            ),
            CloudProvider::Oci => Some("curl -sf -m 5 http://169.254.169.254/opc/v1/vnics/ | sed -n 's/.*\"publicIp\" *: *\"\\([^\"]*\\)\".*/\\1/p'"),
            CloudProvider::Libvirt => None,
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = failure::Error;
    fn from_str(s: &str) -> Result<CloudProvider> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "azure" => Ok(CloudProvider::Azure),
            "gcp" | "google" => Ok(CloudProvider::Gcp),
            "hetzner" => Ok(CloudProvider::Hetzner),
            "digitalocean" | "do" => Ok(CloudProvider::DigitalOcean),
            "exoscale" => Ok(CloudProvider::Exoscale),
            "oci" => Ok(CloudProvider::Oci),
            "libvirt" | "kvm" => Ok(CloudProvider::Libvirt),
            _ => bail!(
                "unknown cloud provider '{}' (supported: {})",
                s,
                CloudProvider::all().iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}
