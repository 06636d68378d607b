extern crate exacat;
extern crate serde_json;
extern crate tempfile;

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// the fixture mutates process environment; run these serially
static ENV_LOCK: Mutex<()> = Mutex::new(());

use exacat::init::{InitOptions, ProviderFlags};
use exacat::{CloudProvider, Credentials, DeploymentDir, State, Status};

static VERSIONS: &str = "\
[default]
VERSION=exasol-2025.1.8

[exasol-2025.1.8]
ARCHITECTURE=x86_64
DB_VERSION=2025.1.8
DB_DOWNLOAD_URL=https://dl.example/exasol-2025.1.8.tar.gz
DB_CHECKSUM=sha256:6ca13d52ca70c883e0f0bb101e425a89e8624de51db2d2392593af6a84118090
C4_VERSION=4.2.1
C4_DOWNLOAD_URL=https://dl.example/c4-4.2.1
C4_CHECKSUM=c775e7b757ede630cd0aa1113bd102661ab38829ca52a6422ab782862f268646

[exasol-2025.1.8-arm64]
ARCHITECTURE=arm64
DB_VERSION=2025.1.8
DB_DOWNLOAD_URL=https://dl.example/exasol-2025.1.8-arm64.tar.gz
DB_CHECKSUM=aa11
C4_VERSION=4.2.1
C4_DOWNLOAD_URL=https://dl.example/c4-4.2.1-arm64
C4_CHECKSUM=bb22
";

static INSTANCE_TYPES: &str = "\
[aws]
x86_64=m5d.2xlarge
arm64=m6gd.2xlarge

[digitalocean]
x86_64=so-8vcpu-64gb
";

/// Lay down catalogs and a minimal template tree, point the env
/// overrides at them.
fn fixture(base: &Path) {
    let versions = base.join("versions.conf");
    fs::write(&versions, VERSIONS).unwrap();
    let instances = base.join("instance-types.conf");
    fs::write(&instances, INSTANCE_TYPES).unwrap();

    let templates = base.join("templates");
    for sub in &["shared", "aws", "digitalocean", "playbooks"] {
        fs::create_dir_all(templates.join(sub)).unwrap();
    }
    fs::write(templates.join("shared/variables.tf"), "variable \"node_count\" {}\n").unwrap();
    fs::write(templates.join("aws/main.tf"), "# aws module\n").unwrap();
    fs::write(templates.join("digitalocean/main.tf"), "# digitalocean module\n").unwrap();
    fs::write(templates.join("playbooks/install_exasol.yml"), "---\n").unwrap();
    fs::write(templates.join("playbooks/stop_exasol.yml"), "---\n").unwrap();

    env::set_var("EXASOL_VERSIONS_CONFIG", &versions);
    env::set_var("EXASOL_INSTANCE_TYPES_CONFIG", &instances);
    env::set_var("EXACAT_TEMPLATES_DIR", &templates);
    env::set_var("EXASOL_SKIP_PROVIDER_CHECKS", "1");
}

fn opts(provider: CloudProvider, dir: PathBuf) -> InitOptions {
    InitOptions {
        provider,
        dir,
        db_version: None,
        cluster_size: 3,
        instance_type: None,
        data_volume_size: 100,
        data_volumes_per_node: 1,
        root_volume_size: 64,
        owner: Some("ci".into()),
        allowed_cidr: "0.0.0.0/0".into(),
        db_password: None,
        adminui_password: None,
        host_password: None,
        enable_multicast_overlay: false,
        flags: ProviderFlags::default(),
    }
}

fn have_ssh_keygen() -> bool {
    exacat::terraform::is_binary_on_path("ssh-keygen")
}

#[test]
fn aws_init_materialises_a_deployment() {
    if !have_ssh_keygen() {
        eprintln!("skipping: no ssh-keygen on PATH");
        return;
    }
    let _env = ENV_LOCK.lock().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    fixture(tmp.path());
    let target = tmp.path().join("cluster");

    exacat::init::run(&opts(CloudProvider::Aws, target.clone())).unwrap();

    let dir = DeploymentDir::open(&target).unwrap();
    assert_eq!(State::status_of(&dir), Status::Initialized);
    let state = State::read(&dir).unwrap();
    assert_eq!(state.cluster_size, 3);
    assert_eq!(state.db_version, "exasol-2025.1.8");

    // the resolved tuple landed in the variables file
    let tfvars = fs::read_to_string(dir.tfvars_file()).unwrap();
    assert!(tfvars.contains("node_count = 3\n"), "{}", tfvars);
    assert!(tfvars.contains("instance_architecture = \"x86_64\"\n"));
    assert!(tfvars.contains("instance_type = \"m5d.2xlarge\"\n"));
    assert!(tfvars.contains("aws_region = \"us-east-1\"\n"));

    // credentials: three generated passwords, checksum normalised, 0600
    let creds = Credentials::read(&dir).unwrap();
    assert_eq!(creds.db_password.len(), 16);
    assert_eq!(creds.adminui_password.len(), 16);
    assert_eq!(creds.host_password.len(), 16);
    assert_eq!(creds.db_checksum,
               "6ca13d52ca70c883e0f0bb101e425a89e8624de51db2d2392593af6a84118090");
    let mode = fs::metadata(dir.credentials_file()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    // templates copied and the root module linked into the directory
    assert!(dir.templates_dir().join("variables.tf").is_file());
    assert!(dir.playbooks_dir().join("install_exasol.yml").is_file());
    let link = target.join("main.tf");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());

    // cluster key is locked down
    let key_mode = fs::metadata(dir.ssh_key_file()).unwrap().permissions().mode();
    assert_eq!(key_mode & 0o777, 0o400);

    // a second init on the same directory must refuse
    assert!(exacat::init::run(&opts(CloudProvider::Aws, target)).is_err());
}

#[test]
fn digitalocean_rejects_arm64() {
    let _env = ENV_LOCK.lock().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    fixture(tmp.path());
    let target = tmp.path().join("cluster");

    let mut o = opts(CloudProvider::DigitalOcean, target.clone());
    o.db_version = Some("exasol-2025.1.8-arm64".into());
    let err = exacat::init::run(&o).unwrap_err();
    assert!(format!("{}", err).contains("does not offer arm64"), "{}", err);
    // nothing was materialised
    assert!(DeploymentDir::open(&target).is_err());
}
