#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate loggerv;
extern crate serde_json;
#[macro_use]
extern crate failure;
extern crate libc;

extern crate exacat;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use std::process;
use std::str::FromStr;
use std::time::Duration;

use exacat::{health, CloudProvider, DeploymentDir, Error, Result, State, Status};

fn print_error_debug(e: &Error) {
    // unwind the error chain beneath the summary line
    for cause in e.iter_chain().skip(1) {
        warn!("caused by: {}", cause);
    }
}

fn result_exit<T>(name: &str, x: Result<T>) {
    let _ = x.map_err(|e| {
        error!("{} error: {}", name, e);
        print_error_debug(&e);
        process::exit(1);
    });
    process::exit(0);
}

fn conditional_exit<T>(x: Result<T>) -> T {
    x.unwrap_or_else(|e| {
        error!("error: {}", e);
        print_error_debug(&e);
        process::exit(1);
    })
}

fn deployment_dir_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("deployment-dir")
        .long("deployment-dir")
        .takes_value(true)
        .required(true)
        .help("Deployment directory to operate on")
}

fn main() {
    let app = App::new("exacat")
        .version(crate_version!())
        .setting(AppSettings::VersionlessSubcommands)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .setting(AppSettings::DeriveDisplayOrder)
        .about("Deploy Exasol clusters anywhere.")
        .arg(Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .global(true)
            .help("Increase verbosity"))
        .arg(Arg::with_name("debug")
            .short("d")
            .long("debug")
            .global(true)
            .help("Adds line numbers to log statements"))
        .subcommand(SubCommand::with_name("init")
            .about("Materialise a new deployment directory")
            .arg(Arg::with_name("cloud-provider")
                .long("cloud-provider")
                .takes_value(true)
                .help("Target cloud provider"))
            .arg(Arg::with_name("deployment-dir")
                .long("deployment-dir")
                .takes_value(true)
                .default_value(".")
                .help("Directory to materialise"))
            .arg(Arg::with_name("db-version")
                .long("db-version")
                .takes_value(true)
                .help("Catalog version or alias (defaults to 'default')"))
            .arg(Arg::with_name("cluster-size")
                .long("cluster-size")
                .takes_value(true)
                .default_value("1")
                .help("Number of database nodes"))
            .arg(Arg::with_name("instance-type")
                .long("instance-type")
                .takes_value(true)
                .help("Override the catalog default instance type"))
            .arg(Arg::with_name("data-volume-size")
                .long("data-volume-size")
                .takes_value(true)
                .default_value("100")
                .help("Data volume size in GiB"))
            .arg(Arg::with_name("data-volumes-per-node")
                .long("data-volumes-per-node")
                .takes_value(true)
                .default_value("1"))
            .arg(Arg::with_name("root-volume-size")
                .long("root-volume-size")
                .takes_value(true)
                .default_value("64")
                .help("Root volume size in GiB"))
            .arg(Arg::with_name("owner")
                .long("owner")
                .takes_value(true)
                .help("Owner tag on all created resources"))
            .arg(Arg::with_name("allowed-cidr")
                .long("allowed-cidr")
                .takes_value(true)
                .default_value("0.0.0.0/0")
                .help("CIDR allowed through the firewall"))
            .arg(Arg::with_name("db-password").long("db-password").takes_value(true))
            .arg(Arg::with_name("adminui-password").long("adminui-password").takes_value(true))
            .arg(Arg::with_name("host-password").long("host-password").takes_value(true))
            .arg(Arg::with_name("enable-multicast-overlay")
                .long("enable-multicast-overlay")
                .help("Set up the VXLAN multicast overlay between nodes"))
            .arg(Arg::with_name("list-providers")
                .long("list-providers")
                .help("List supported cloud providers and exit"))
            .arg(Arg::with_name("list-versions")
                .long("list-versions")
                .help("List catalog versions and exit"))
            .arg(Arg::with_name("show-permissions")
                .long("show-permissions")
                .help("Show required cloud permissions and exit"))
            // aws
            .arg(Arg::with_name("aws-region").long("aws-region").takes_value(true))
            .arg(Arg::with_name("aws-profile").long("aws-profile").takes_value(true))
            .arg(Arg::with_name("aws-spot-instance").long("aws-spot-instance"))
            // azure
            .arg(Arg::with_name("azure-region").long("azure-region").takes_value(true))
            .arg(Arg::with_name("azure-subscription").long("azure-subscription").takes_value(true))
            .arg(Arg::with_name("azure-credentials-file").long("azure-credentials-file").takes_value(true))
            .arg(Arg::with_name("azure-spot-instance").long("azure-spot-instance"))
            // gcp
            .arg(Arg::with_name("gcp-region").long("gcp-region").takes_value(true))
            .arg(Arg::with_name("gcp-zone").long("gcp-zone").takes_value(true))
            .arg(Arg::with_name("gcp-project").long("gcp-project").takes_value(true))
            .arg(Arg::with_name("gcp-credentials-file").long("gcp-credentials-file").takes_value(true))
            .arg(Arg::with_name("gcp-spot-instance").long("gcp-spot-instance"))
            // hetzner
            .arg(Arg::with_name("hetzner-location").long("hetzner-location").takes_value(true))
            .arg(Arg::with_name("hetzner-network-zone").long("hetzner-network-zone").takes_value(true))
            .arg(Arg::with_name("hetzner-token").long("hetzner-token").takes_value(true))
            // digitalocean
            .arg(Arg::with_name("digitalocean-region").long("digitalocean-region").takes_value(true))
            .arg(Arg::with_name("digitalocean-token").long("digitalocean-token").takes_value(true))
            // libvirt
            .arg(Arg::with_name("libvirt-memory").long("libvirt-memory").takes_value(true))
            .arg(Arg::with_name("libvirt-vcpus").long("libvirt-vcpus").takes_value(true))
            .arg(Arg::with_name("libvirt-network").long("libvirt-network").takes_value(true))
            .arg(Arg::with_name("libvirt-pool").long("libvirt-pool").takes_value(true))
            .arg(Arg::with_name("libvirt-uri").long("libvirt-uri").takes_value(true)))
        .subcommand(SubCommand::with_name("deploy")
            .about("Apply infrastructure and configure the database")
            .arg(deployment_dir_arg()))
        .subcommand(SubCommand::with_name("start")
            .about("Restart a stopped deployment")
            .arg(deployment_dir_arg()))
        .subcommand(SubCommand::with_name("stop")
            .about("Gracefully stop services and power off")
            .arg(deployment_dir_arg()))
        .subcommand(SubCommand::with_name("status")
            .about("Print the current state document as JSON")
            .arg(deployment_dir_arg()))
        .subcommand(SubCommand::with_name("health")
            .about("Probe all nodes and report issues")
            .arg(deployment_dir_arg())
            .arg(Arg::with_name("update")
                .long("update")
                .help("Correct recorded metadata and status from observations"))
            .arg(Arg::with_name("wait-for")
                .long("wait-for")
                .takes_value(true)
                .help("Block until this status is reached"))
            .arg(Arg::with_name("timeout")
                .long("timeout")
                .takes_value(true)
                .default_value("600")
                .help("Seconds to wait with --wait-for"))
            .arg(Arg::with_name("format")
                .long("format")
                .takes_value(true)
                .possible_values(&["text", "json"])
                .default_value("text")))
        .subcommand(SubCommand::with_name("destroy")
            .about("Tear the infrastructure down")
            .arg(deployment_dir_arg())
            .arg(Arg::with_name("auto-approve")
                .long("auto-approve")
                .alias("yes")
                .help("Skip the confirmation prompt")))
        .subcommand(SubCommand::with_name("update-versions")
            .about("Discover newer releases and append them to the catalog"))
        .subcommand(SubCommand::with_name("version")
            .about("Print the build identifier"));

    let args = app.get_matches();

    // initialise deployment level logging
    let level = args.occurrences_of("verbose") + 1; // info by default
    loggerv::Logger::new()
        .verbosity(level)
        .module_path(true)
        .line_numbers(args.is_present("debug"))
        .init()
        .unwrap();

    // Ignore SIGPIPE errors to avoid having to use let _ = write! everywhere
    // See https://github.com/rust-lang/rust/issues/46016
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    conditional_exit(exacat::init());
    dispatch_commands(&args);
}

fn dispatch_commands(args: &ArgMatches) {
    match args.subcommand() {
        ("init", Some(a)) => result_exit(args.subcommand_name().unwrap(), handle_init(a)),
        ("deploy", Some(a)) => {
            result_exit("deploy", exacat::deploy::deploy(a.value_of("deployment-dir").unwrap()))
        }
        ("start", Some(a)) => {
            result_exit("start", exacat::power::start(a.value_of("deployment-dir").unwrap()))
        }
        ("stop", Some(a)) => {
            result_exit("stop", exacat::power::stop(a.value_of("deployment-dir").unwrap()))
        }
        ("status", Some(a)) => {
            result_exit("status", handle_status(a.value_of("deployment-dir").unwrap()))
        }
        ("health", Some(a)) => handle_health(a),
        ("destroy", Some(a)) => result_exit(
            "destroy",
            exacat::deploy::destroy(
                a.value_of("deployment-dir").unwrap(),
                a.is_present("auto-approve"),
            ),
        ),
        ("update-versions", _) => result_exit("update-versions", exacat::update::run()),
        ("version", _) => {
            println!("exacat {}", crate_version!());
            process::exit(0);
        }
        _ => unreachable!(),
    }
}

fn handle_init(args: &ArgMatches) -> Result<()> {
    if args.is_present("list-providers") {
        return exacat::list::providers();
    }
    if args.is_present("list-versions") {
        return exacat::list::versions();
    }
    let provider = match args.value_of("cloud-provider") {
        Some(p) => CloudProvider::from_str(p)?,
        None => bail!("--cloud-provider is required (try --list-providers)"),
    };
    if args.is_present("show-permissions") {
        return exacat::list::permissions(provider);
    }

    let flags = exacat::init::ProviderFlags {
        aws_region: args.value_of("aws-region").map(String::from),
        aws_profile: args.value_of("aws-profile").map(String::from),
        aws_spot_instance: args.is_present("aws-spot-instance"),
        azure_region: args.value_of("azure-region").map(String::from),
        azure_subscription: args.value_of("azure-subscription").map(String::from),
        azure_credentials_file: args.value_of("azure-credentials-file").map(String::from),
        azure_spot_instance: args.is_present("azure-spot-instance"),
        gcp_region: args.value_of("gcp-region").map(String::from),
        gcp_zone: args.value_of("gcp-zone").map(String::from),
        gcp_project: args.value_of("gcp-project").map(String::from),
        gcp_credentials_file: args.value_of("gcp-credentials-file").map(String::from),
        gcp_spot_instance: args.is_present("gcp-spot-instance"),
        hetzner_location: args.value_of("hetzner-location").map(String::from),
        hetzner_network_zone: args.value_of("hetzner-network-zone").map(String::from),
        hetzner_token: args.value_of("hetzner-token").map(String::from),
        digitalocean_region: args.value_of("digitalocean-region").map(String::from),
        digitalocean_token: args.value_of("digitalocean-token").map(String::from),
        libvirt_memory: optional_u32(args, "libvirt-memory")?,
        libvirt_vcpus: optional_u32(args, "libvirt-vcpus")?,
        libvirt_network: args.value_of("libvirt-network").map(String::from),
        libvirt_pool: args.value_of("libvirt-pool").map(String::from),
        libvirt_uri: args.value_of("libvirt-uri").map(String::from),
    };

    let opts = exacat::init::InitOptions {
        provider,
        dir: args.value_of("deployment-dir").unwrap().into(),
        db_version: args.value_of("db-version").map(String::from),
        cluster_size: value_t!(args, "cluster-size", u32)?,
        instance_type: args.value_of("instance-type").map(String::from),
        data_volume_size: value_t!(args, "data-volume-size", u32)?,
        data_volumes_per_node: value_t!(args, "data-volumes-per-node", u32)?,
        root_volume_size: value_t!(args, "root-volume-size", u32)?,
        owner: args.value_of("owner").map(String::from),
        allowed_cidr: args.value_of("allowed-cidr").unwrap().to_string(),
        db_password: args.value_of("db-password").map(String::from),
        adminui_password: args.value_of("adminui-password").map(String::from),
        host_password: args.value_of("host-password").map(String::from),
        enable_multicast_overlay: args.is_present("enable-multicast-overlay"),
        flags,
    };
    exacat::init::run(&opts)
}

fn optional_u32(args: &ArgMatches, name: &str) -> Result<Option<u32>> {
    match args.value_of(name) {
        Some(raw) => Ok(Some(raw.parse()
            .map_err(|_| format_err!("--{} expects a number, got '{}'", name, raw))?)),
        None => Ok(None),
    }
}

fn handle_status(dir_path: &str) -> Result<()> {
    let dir = DeploymentDir::open(dir_path)?;
    let state = State::read(&dir)?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn handle_health(args: &ArgMatches) {
    let dir = args.value_of("deployment-dir").unwrap();
    let wait_for = args.value_of("wait-for").map(|raw| {
        let target = conditional_exit(Status::from_str(raw));
        let secs = conditional_exit(value_t!(args, "timeout", u64).map_err(Error::from));
        (target, Duration::from_secs(secs))
    });
    let format = match args.value_of("format") {
        Some("json") => health::Format::Json,
        _ => health::Format::Text,
    };
    let opts = health::HealthOptions {
        update: args.is_present("update"),
        wait_for,
        format,
    };
    match health::run(dir, &opts) {
        Ok(summary) => {
            // healthy means zero issues; anything else is for scripts to see
            process::exit(if summary.issues > 0 { 1 } else { 0 });
        }
        Err(e) => {
            error!("health error: {}", e);
            print_error_debug(&e);
            process::exit(1);
        }
    }
}
