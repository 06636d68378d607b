use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use exacat_definitions::versions::{self, validate_version_name};

use super::progress::Progress;
use super::terraform::is_binary_on_path;
use super::{Architecture, CloudProvider, Credentials, DeploymentDir, InstanceTypes, Result, State,
            TfVars, VersionsCatalog};

/// Everything `exacat init` accepts
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub provider: CloudProvider,
    pub dir: PathBuf,
    /// None means the `default` (or `default-local`) alias
    pub db_version: Option<String>,
    pub cluster_size: u32,
    pub instance_type: Option<String>,
    pub data_volume_size: u32,
    pub data_volumes_per_node: u32,
    pub root_volume_size: u32,
    pub owner: Option<String>,
    pub allowed_cidr: String,
    pub db_password: Option<String>,
    pub adminui_password: Option<String>,
    pub host_password: Option<String>,
    pub enable_multicast_overlay: bool,
    pub flags: ProviderFlags,
}

/// Provider specific init flags; only the ones matching the chosen
/// provider are consulted.
#[derive(Debug, Clone, Default)]
pub struct ProviderFlags {
    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,
    pub aws_spot_instance: bool,
    pub azure_region: Option<String>,
    pub azure_subscription: Option<String>,
    pub azure_credentials_file: Option<String>,
    pub azure_spot_instance: bool,
    pub gcp_region: Option<String>,
    pub gcp_zone: Option<String>,
    pub gcp_project: Option<String>,
    pub gcp_credentials_file: Option<String>,
    pub gcp_spot_instance: bool,
    pub hetzner_location: Option<String>,
    pub hetzner_network_zone: Option<String>,
    pub hetzner_token: Option<String>,
    pub digitalocean_region: Option<String>,
    pub digitalocean_token: Option<String>,
    pub libvirt_memory: Option<u32>,
    pub libvirt_vcpus: Option<u32>,
    pub libvirt_network: Option<String>,
    pub libvirt_pool: Option<String>,
    pub libvirt_uri: Option<String>,
}

/// Materialise a new deployment directory
pub fn run(opts: &InitOptions) -> Result<()> {
    let progress = Progress::new("init", None);

    preflight(opts.provider)?;

    // resolve the version tuple before touching the filesystem
    let catalog = VersionsCatalog::load()?;
    let requested = opts.db_version.clone().unwrap_or_else(|| "default".to_string());
    let resolved = catalog.resolve(&requested)?;
    validate_version_name(&resolved)?;
    let entry = catalog.entry(&resolved)?;
    if !opts.provider.supports(entry.architecture) {
        bail!(
            "{} does not offer {} instances; pick an {} version",
            opts.provider,
            entry.architecture,
            Architecture::X86_64
        );
    }
    progress.done("init", "resolve-version",
        &format!("{} ({} {})", entry.name, entry.db_version, entry.architecture));

    let instance_type = match &opts.instance_type {
        Some(t) => t.clone(),
        None => InstanceTypes::load()?.default_for(opts.provider, entry.architecture)?,
    };
    progress.done("init", "instance-type", &instance_type);

    let dir = DeploymentDir::at(&opts.dir);
    if dir.is_deployment() {
        bail!("{} is already a deployment directory", dir.root().display());
    }
    fs::create_dir_all(dir.root())?;
    fs::create_dir_all(dir.templates_dir())?;

    State::init(&dir, &entry.name, entry.architecture, opts.provider, opts.cluster_size)?;
    progress.done("init", "state", "state document seeded");

    copy_templates(&dir, opts.provider)?;
    progress.done("init", "templates", "templates materialised");

    generate_ssh_key(&dir)?;
    progress.done("init", "ssh-key", "cluster key generated");

    let tfvars = build_tfvars(opts, &entry.name, entry.architecture, &instance_type);
    tfvars.write(&dir)?;
    progress.done("init", "tfvars", "variables.auto.tfvars written");

    let creds = Credentials::assemble(
        &entry,
        opts.db_password.clone(),
        opts.adminui_password.clone(),
        opts.host_password.clone(),
    );
    creds.write(&dir)?;
    progress.done("init", "credentials", "credentials written");

    info!("initialized {} deployment in {}", opts.provider, dir.root().display());
    Ok(())
}

/// Check the provider CLI is available before promising anything.
/// `EXASOL_SKIP_PROVIDER_CHECKS` bypasses this for testing.
fn preflight(provider: CloudProvider) -> Result<()> {
    if env::var("EXASOL_SKIP_PROVIDER_CHECKS").is_ok() {
        debug!("skipping provider CLI preflight");
        return Ok(());
    }
    let bin = provider.cli_binary();
    if !is_binary_on_path(bin) {
        bail!(
            "the {} CLI ('{}') is not on PATH; install it or set EXASOL_SKIP_PROVIDER_CHECKS=1",
            provider, bin
        );
    }
    Ok(())
}

/// Shared templates first, then the provider overlay, then the
/// playbooks; finally the root module files get symlinked into the
/// deployment directory where the infra-as-code tool expects them.
fn copy_templates(dir: &DeploymentDir, provider: CloudProvider) -> Result<()> {
    let root = templates_root()?;
    copy_dir(&root.join("shared"), &dir.templates_dir())?;
    copy_dir(&root.join(provider.as_str()), &dir.templates_dir())?;
    copy_dir(&root.join("playbooks"), &dir.playbooks_dir())?;

    for entry in fs::read_dir(dir.templates_dir())? {
        let entry = entry?;
        let name = entry.file_name();
        if entry.path().extension().and_then(|e| e.to_str()) == Some("tf") {
            let link = dir.root().join(&name);
            if link.exists() {
                fs::remove_file(&link)?;
            }
            std::os::unix::fs::symlink(Path::new(".templates").join(&name), &link)?;
        }
    }
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    if !from.is_dir() {
        bail!("template directory {} does not exist", from.display());
    }
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Location of the template assets shipped alongside the catalogs
pub fn templates_root() -> Result<PathBuf> {
    if let Ok(p) = env::var("EXACAT_TEMPLATES_DIR") {
        let pth = PathBuf::from(&p);
        if !pth.is_dir() {
            bail!("EXACAT_TEMPLATES_DIR points at '{}' which does not exist", p);
        }
        return Ok(pth);
    }
    if let Ok(catalog) = versions::catalog_path() {
        if let Some(parent) = catalog.parent() {
            let cand = parent.join("templates");
            if cand.is_dir() {
                return Ok(cand);
            }
        }
    }
    bail!("could not locate the templates directory (set EXACAT_TEMPLATES_DIR)");
}

fn generate_ssh_key(dir: &DeploymentDir) -> Result<()> {
    let key = dir.ssh_key_file();
    let status = Command::new("ssh-keygen")
        .arg("-q")
        .arg("-t").arg("ed25519")
        .arg("-N").arg("")
        .arg("-C").arg("exasol-cluster")
        .arg("-f").arg(&key)
        .status()
        .map_err(|e| format_err!("could not spawn ssh-keygen: {}", e))?;
    if !status.success() {
        bail!("ssh-keygen exited with {}", status.code().unwrap_or(-1));
    }
    fs::set_permissions(&key, fs::Permissions::from_mode(0o400))?;
    Ok(())
}

/// Every variable the provider template expects, strictly typed
fn build_tfvars(
    opts: &InitOptions,
    version: &str,
    arch: Architecture,
    instance_type: &str,
) -> TfVars {
    let owner = opts.owner.clone()
        .or_else(|| env::var("USER").ok())
        .unwrap_or_else(|| "exasol".to_string());

    let mut v = TfVars::new();
    v.push("cloud_provider", opts.provider.as_str())
        .push("db_version", version)
        .push("node_count", opts.cluster_size)
        .push("instance_architecture", arch.as_str())
        .push("instance_type", instance_type)
        .push("data_volume_size", opts.data_volume_size)
        .push("data_volumes_per_node", opts.data_volumes_per_node)
        .push("root_volume_size", opts.root_volume_size)
        .push("allowed_cidr", opts.allowed_cidr.as_str())
        .push("owner", owner)
        .push("enable_multicast_overlay", opts.enable_multicast_overlay)
        .push("ssh_public_key_file", "exasol-key.pem.pub");
    if opts.provider.api_power() {
        // power control resources start out running
        v.push("infra_desired_state", "running");
    }

    let f = &opts.flags;
    match opts.provider {
        CloudProvider::Aws => {
            v.push("aws_region", f.aws_region.clone().unwrap_or_else(|| "us-east-1".into()));
            v.push("aws_profile", f.aws_profile.clone().unwrap_or_else(|| "default".into()));
            v.push("aws_spot_instance", f.aws_spot_instance);
        }
        CloudProvider::Azure => {
            v.push("azure_region", f.azure_region.clone().unwrap_or_else(|| "eastus".into()));
            if let Some(sub) = &f.azure_subscription {
                v.push("azure_subscription", sub.as_str());
            }
            if let Some(creds) = &f.azure_credentials_file {
                v.push("azure_credentials_file", creds.as_str());
            }
            v.push("azure_spot_instance", f.azure_spot_instance);
        }
        CloudProvider::Gcp => {
            let region = f.gcp_region.clone().unwrap_or_else(|| "us-central1".into());
            let zone = f.gcp_zone.clone().unwrap_or_else(|| format!("{}-a", region));
            v.push("gcp_region", region);
            v.push("gcp_zone", zone);
            if let Some(project) = &f.gcp_project {
                v.push("gcp_project", project.as_str());
            }
            if let Some(creds) = &f.gcp_credentials_file {
                v.push("gcp_credentials_file", creds.as_str());
            }
            v.push("gcp_spot_instance", f.gcp_spot_instance);
        }
        CloudProvider::Hetzner => {
            v.push("hetzner_location", f.hetzner_location.clone().unwrap_or_else(|| "nbg1".into()));
            v.push("hetzner_network_zone",
                   f.hetzner_network_zone.clone().unwrap_or_else(|| "eu-central".into()));
            if let Some(token) = &f.hetzner_token {
                v.push("hetzner_token", token.as_str());
            }
        }
        CloudProvider::DigitalOcean => {
            v.push("digitalocean_region",
                   f.digitalocean_region.clone().unwrap_or_else(|| "nyc3".into()));
            if let Some(token) = &f.digitalocean_token {
                v.push("digitalocean_token", token.as_str());
            }
        }
        CloudProvider::Libvirt => {
            v.push("libvirt_memory", f.libvirt_memory.unwrap_or(16384));
            v.push("libvirt_vcpus", f.libvirt_vcpus.unwrap_or(8));
            v.push("libvirt_network", f.libvirt_network.clone().unwrap_or_else(|| "default".into()));
            v.push("libvirt_pool", f.libvirt_pool.clone().unwrap_or_else(|| "default".into()));
            v.push("libvirt_uri", f.libvirt_uri.clone().unwrap_or_else(|| "qemu:///system".into()));
        }
        CloudProvider::Exoscale | CloudProvider::Oci => {}
    }
    v
}

#[cfg(test)]
mod tests {
    use super::{build_tfvars, InitOptions, ProviderFlags};
    use crate::{Architecture, CloudProvider, TfValue};
    use std::path::PathBuf;

    fn opts(provider: CloudProvider) -> InitOptions {
        InitOptions {
            provider,
            dir: PathBuf::from("/tmp/d"),
            db_version: None,
            cluster_size: 3,
            instance_type: None,
            data_volume_size: 100,
            data_volumes_per_node: 1,
            root_volume_size: 64,
            owner: Some("alice".into()),
            allowed_cidr: "0.0.0.0/0".into(),
            db_password: None,
            adminui_password: None,
            host_password: None,
            enable_multicast_overlay: false,
            flags: ProviderFlags::default(),
        }
    }

    #[test]
    fn aws_tfvars_carry_the_contract() {
        let v = build_tfvars(&opts(CloudProvider::Aws), "exasol-2025.1.8",
                             Architecture::X86_64, "m5.2xlarge");
        let rendered = v.to_string();
        assert!(rendered.contains("node_count = 3\n"));
        assert!(rendered.contains("instance_architecture = \"x86_64\"\n"));
        assert!(rendered.contains("aws_region = \"us-east-1\"\n"));
        assert!(rendered.contains("owner = \"alice\"\n"));
        // API power family starts out running
        assert_eq!(v.get("infra_desired_state"), Some(&TfValue::Str("running".into())));
    }

    #[test]
    fn hetzner_tfvars_have_no_power_variable() {
        let v = build_tfvars(&opts(CloudProvider::Hetzner), "exasol-2025.1.8",
                             Architecture::X86_64, "ccx33");
        assert_eq!(v.get("infra_desired_state"), None);
        assert_eq!(v.get("hetzner_location"), Some(&TfValue::Str("nbg1".into())));
    }

    #[test]
    fn gcp_zone_follows_region() {
        let mut o = opts(CloudProvider::Gcp);
        o.flags.gcp_region = Some("europe-west3".into());
        let v = build_tfvars(&o, "exasol-2025.1.8", Architecture::X86_64, "n2-standard-8");
        assert_eq!(v.get("gcp_zone"), Some(&TfValue::Str("europe-west3-a".into())));
    }
}
