use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use threadpool::ThreadPool;

use exacat_definitions::providers::{ADMINUI_PORT, DB_PORT};

use super::inventory::{self, Node};
use super::ssh::SshClient;
use super::terraform::TerraformRunner;
use super::{CloudProvider, DeploymentDir, Result, State, Status};

/// Poll interval for --wait-for
const WAIT_POLL: Duration = Duration::from_secs(10);
const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Systemd units probed on every node: the database itself, the cloud
/// command helper and the admin UI.
const SERVICES: &[&str] = &["exasoldb", "exasol-cloud-agent", "exasol-adminui"];

/// Where the database keeps its data volume symlinks
const DATA_VOLUME_DIR: &str = "/exa/data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct HealthOptions {
    /// Allow mutation of inventory, ssh_config, INFO.txt and the status
    pub update: bool,
    /// Block until the determined status matches, or time out
    pub wait_for: Option<(Status, Duration)>,
    pub format: Format,
}

impl Default for HealthOptions {
    fn default() -> HealthOptions {
        HealthOptions { update: false, wait_for: None, format: Format::Text }
    }
}

/// Stage reported by the cluster admin tool
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// a / a1
    Stopped,
    /// b / b1
    Boot,
    /// c
    CosReady,
    /// d, a ready database
    Ready,
    Mixed(String),
    Unknown,
}

impl Stage {
    fn from_letter(letter: &str) -> Stage {
        match letter {
            "a" | "a1" => Stage::Stopped,
            "b" | "b1" => Stage::Boot,
            "c" => Stage::CosReady,
            "d" => Stage::Ready,
            _ => Stage::Unknown,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Stage::Stopped => write!(f, "stopped"),
            Stage::Boot => write!(f, "boot"),
            Stage::CosReady => write!(f, "cos_ready"),
            Stage::Ready => write!(f, "ready"),
            Stage::Mixed(s) => write!(f, "mixed:{}", s),
            Stage::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    VolumeOk,
    NoDataVolumes,
    BrokenVolumeSymlink,
    Unknown,
}

#[derive(Serialize, Debug, Clone)]
pub struct ServiceCheck {
    pub name: String,
    pub active: bool,
}

/// Everything observed about one node
#[derive(Serialize, Debug, Clone)]
pub struct NodeReport {
    pub name: String,
    pub inventory_ip: String,
    pub tfstate_ip: Option<String>,
    pub detected_ip: Option<String>,
    pub ssh_ok: bool,
    /// None when the ssh_config declares no cos entry
    pub cos_ssh_ok: Option<bool>,
    pub services: Vec<ServiceCheck>,
    pub volumes: VolumeState,
    pub stage: Stage,
    pub adminui_ok: bool,
    pub db_port_ok: bool,
    pub issues: Vec<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct HealthSummary {
    pub status: Status,
    pub stage: Stage,
    pub issues: usize,
    pub reports: Vec<NodeReport>,
}

/// Probe the cluster and reconcile what we recorded with what we see
pub fn run(dir_path: &str, opts: &HealthOptions) -> Result<HealthSummary> {
    let dir = DeploymentDir::open(dir_path)?;
    // a deployed directory without these is broken beyond auto-repair
    if !dir.inventory_file().is_file() {
        bail!("{} is missing; this deployment is not usable", dir.inventory_file().display());
    }
    if !dir.ssh_config_file().is_file() {
        bail!("{} is missing; this deployment is not usable", dir.ssh_config_file().display());
    }

    match opts.wait_for {
        None => run_once(&dir, opts),
        Some((target, timeout)) => {
            let started = Instant::now();
            loop {
                let summary = run_once(&dir, opts)?;
                if summary.status == target {
                    return Ok(summary);
                }
                if started.elapsed() > timeout {
                    bail!(
                        "timed out after {}s waiting for {} (currently {})",
                        timeout.as_secs(), target, summary.status
                    );
                }
                debug!("waiting for {} (currently {})", target, summary.status);
                thread::sleep(WAIT_POLL);
            }
        }
    }
}

fn run_once(dir: &DeploymentDir, opts: &HealthOptions) -> Result<HealthSummary> {
    let state = State::read(dir)?;
    let nodes = inventory::read_nodes(dir)?;
    let tfstate_ips = tfstate_ips(dir);

    // one background probe task per host, results fanned back in
    let pool = ThreadPool::new(nodes.len());
    let (tx, rx) = mpsc::channel();
    for (i, node) in nodes.iter().cloned().enumerate() {
        let tx = tx.clone();
        let dir = dir.clone();
        let provider = state.cloud_provider;
        let has_cos = inventory::has_cos_entry(&dir, &node.name);
        let tfstate_ip = tfstate_ips.as_ref().and_then(|m| m.get(&node.name).cloned());
        pool.execute(move || {
            let report = probe_node(&dir, &node, provider, has_cos, tfstate_ip);
            // the receiver outlives the pool; send cannot fail
            let _ = tx.send((i, report));
        });
    }
    drop(tx);
    let mut indexed: Vec<(usize, NodeReport)> = rx.iter().collect();
    // report in inventory order regardless of probe completion order
    indexed.sort_by_key(|(i, _)| *i);
    let mut reports: Vec<NodeReport> = indexed.into_iter().map(|(_, r)| r).collect();

    if opts.update {
        reconcile_ips(dir, &mut reports)?;
    }

    let stage = cluster_stage(&reports);
    let obs = Observations {
        cluster_size: state.cluster_size as usize,
        ssh_failures: reports.iter().filter(|r| !r.ssh_ok).count(),
        any_ssh_ok: reports.iter().any(|r| r.ssh_ok),
        stage: stage.clone(),
        issue_count: reports.iter().map(|r| r.issues.len()).sum(),
    };

    let mut status = state.status;
    if let Some(corrected) = corrected_status(state.status, &obs) {
        if opts.update {
            warn!("correcting status {} -> {}", state.status, corrected);
            State::set_status(dir, corrected)?;
            status = corrected;
        } else {
            info!("status {} looks like {} (re-run with --update to correct)",
                  state.status, corrected);
        }
    }

    let summary = HealthSummary { status, stage, issues: obs.issue_count, reports };
    render(&summary, opts.format);
    Ok(summary)
}

fn tfstate_ips(dir: &DeploymentDir) -> Option<std::collections::BTreeMap<String, String>> {
    if !TerraformRunner::state_exists(dir) {
        return None;
    }
    match TerraformRunner::new(dir).and_then(|tf| tf.output_ips()) {
        Ok(map) => Some(map),
        Err(e) => {
            debug!("could not read terraform outputs: {}", e);
            None
        }
    }
}

fn probe_node(
    dir: &DeploymentDir,
    node: &Node,
    provider: CloudProvider,
    has_cos: bool,
    tfstate_ip: Option<String>,
) -> NodeReport {
    let ssh = SshClient::new(dir);
    let mut issues = Vec::new();

    let ssh_ok = ssh.reachable(&node.name);
    if !ssh_ok {
        issues.push("ssh unreachable".into());
    }

    let cos_ssh_ok = if has_cos {
        let ok = ssh.reachable(&format!("{}-cos", node.name));
        if !ok {
            issues.push("cos ssh unreachable".into());
        }
        Some(ok)
    } else {
        None
    };

    let (services, volumes, stage, detected_ip) = if ssh_ok {
        let services: Vec<ServiceCheck> = SERVICES.iter().map(|svc| {
            let active = ssh.run(&node.name, &format!("systemctl is-active {}", svc))
                .map(|out| out == "active")
                .unwrap_or(false);
            if !active {
                issues.push(format!("service {} not active", svc));
            }
            ServiceCheck { name: svc.to_string(), active }
        }).collect();

        let volumes = probe_volumes(&ssh, &node.name);
        match volumes {
            VolumeState::VolumeOk => {}
            ref v => issues.push(format!("data volumes: {:?}", v)),
        }

        let stage = match ssh.run(&node.name, "c4 ps") {
            Ok(out) => parse_stage(&out),
            Err(e) => {
                debug!("stage probe on {} failed: {}", node.name, e);
                Stage::Unknown
            }
        };
        if stage != Stage::Ready {
            issues.push(format!("cluster stage {}", stage));
        }

        let detected_ip = provider.public_ip_probe().and_then(|cmd| {
            ssh.run(&node.name, cmd).ok().filter(|ip| !ip.is_empty())
        });
        (services, volumes, stage, detected_ip)
    } else {
        (Vec::new(), VolumeState::Unknown, Stage::Unknown, None)
    };

    let adminui_ok = port_open(&node.ip, ADMINUI_PORT);
    if !adminui_ok {
        issues.push(format!("admin UI port {} closed", ADMINUI_PORT));
    }
    let db_port_ok = port_open(&node.ip, DB_PORT);
    if !db_port_ok {
        issues.push(format!("database port {} closed", DB_PORT));
    }

    if let Some(ref tf_ip) = tfstate_ip {
        if *tf_ip != node.ip {
            issues.push(format!("inventory IP {} differs from terraform state {}", node.ip, tf_ip));
        }
    }
    if let Some(ref det) = detected_ip {
        if *det != node.ip {
            issues.push(format!("inventory IP {} differs from metadata {}", node.ip, det));
        }
    }

    NodeReport {
        name: node.name.clone(),
        inventory_ip: node.ip.clone(),
        tfstate_ip,
        detected_ip,
        ssh_ok,
        cos_ssh_ok,
        services,
        volumes,
        stage,
        adminui_ok,
        db_port_ok,
        issues,
    }
}

fn probe_volumes(ssh: &SshClient, host: &str) -> VolumeState {
    let script = format!(
        "cd {dir} 2>/dev/null || {{ echo NONE; exit 0; }}; \
         links=$(find . -maxdepth 1 -type l); \
         [ -z \"$links\" ] && {{ echo NONE; exit 0; }}; \
         for l in $links; do [ -e \"$l\" ] || {{ echo BROKEN; exit 0; }}; done; echo OK",
        dir = DATA_VOLUME_DIR
    );
    match ssh.run(host, &script).as_ref().map(|s| s.as_str()) {
        Ok("OK") => VolumeState::VolumeOk,
        Ok("NONE") => VolumeState::NoDataVolumes,
        Ok("BROKEN") => VolumeState::BrokenVolumeSymlink,
        _ => VolumeState::Unknown,
    }
}

/// Parse the admin tool's process table into a stage.
///
/// Only the stage column is trusted; everything else in the output is a
/// moving target across database versions.
pub fn parse_stage(output: &str) -> Stage {
    let letter = Regex::new(r"^[a-d]1?$").unwrap();
    let mut letters: Vec<String> = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.to_uppercase().contains("STAGE") {
            continue;
        }
        if let Some(tok) = trimmed.split_whitespace().last() {
            if letter.is_match(tok) {
                letters.push(tok.to_string());
            }
        }
    }
    letters.sort();
    letters.dedup();
    match letters.len() {
        0 => Stage::Unknown,
        1 => Stage::from_letter(&letters[0]),
        _ => Stage::Mixed(letters.join(",")),
    }
}

fn cluster_stage(reports: &[NodeReport]) -> Stage {
    let mut stages: Vec<&Stage> = reports.iter().map(|r| &r.stage).collect();
    stages.sort_by_key(|s| format!("{}", s));
    stages.dedup();
    match stages.len() {
        0 => Stage::Unknown,
        1 => stages[0].clone(),
        _ => Stage::Mixed(stages.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(",")),
    }
}

fn port_open(ip: &str, port: u16) -> bool {
    match format!("{}:{}", ip, port).parse::<SocketAddr>() {
        Ok(addr) => TcpStream::connect_timeout(&addr, PORT_PROBE_TIMEOUT).is_ok(),
        Err(_) => false,
    }
}

/// IP precedence: terraform state, then cloud metadata, then whatever
/// the inventory says.
fn preferred_ip(report: &NodeReport) -> Option<String> {
    report.tfstate_ip.clone()
        .or_else(|| report.detected_ip.clone())
        .or_else(|| Some(report.inventory_ip.clone()))
}

/// Rewrite the generated files wherever the preferred IP moved on
fn reconcile_ips(dir: &DeploymentDir, reports: &mut [NodeReport]) -> Result<()> {
    for r in reports.iter_mut() {
        let preferred = match preferred_ip(r) {
            Some(ip) => ip,
            None => continue,
        };
        if preferred != r.inventory_ip {
            warn!("{}: updating recorded IP {} -> {}", r.name, r.inventory_ip, preferred);
            inventory::update_node_ip(dir, &r.name, &preferred)?;
            r.inventory_ip = preferred;
            // mismatch issues are resolved by the rewrite
            r.issues.retain(|i| !i.contains("differs from"));
        }
    }
    Ok(())
}

pub(crate) struct Observations {
    pub cluster_size: usize,
    pub ssh_failures: usize,
    pub any_ssh_ok: bool,
    pub stage: Stage,
    pub issue_count: usize,
}

/// The status correction table.
///
/// Conservative by design: only the listed combinations move the
/// recorded status, everything else is left alone. Returns None when no
/// correction applies.
pub(crate) fn corrected_status(current: Status, obs: &Observations) -> Option<Status> {
    let change = |to: Status| if to == current { None } else { Some(to) };

    // every node dark means the cluster is powered off, whatever the
    // record claims
    if obs.cluster_size > 0 && obs.ssh_failures == obs.cluster_size {
        return change(Status::Stopped);
    }

    let recoverable = match current {
        Status::DeploymentFailed
        | Status::DatabaseConnectionFailed
        | Status::StartFailed
        | Status::StopFailed
        | Status::DestroyFailed
        | Status::Stopped
        | Status::Started => true,
        _ => false,
    };
    if recoverable && obs.issue_count == 0 && obs.stage == Stage::Ready {
        return change(Status::DatabaseReady);
    }

    if current == Status::DatabaseReady && obs.stage != Stage::Ready {
        return change(Status::DatabaseConnectionFailed);
    }

    if current == Status::Stopped && obs.any_ssh_ok {
        return change(Status::StopFailed);
    }

    None
}

fn render(summary: &HealthSummary, format: Format) {
    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(summary).unwrap_or_default());
        }
        Format::Text => {
            for r in &summary.reports {
                let verdict = if r.issues.is_empty() { "ok" } else { "ISSUES" };
                println!("{} ({}) {}", r.name, r.inventory_ip, verdict);
                for i in &r.issues {
                    println!("  - {}", i);
                }
            }
            println!(
                "status: {} (stage {}, {} issue{})",
                summary.status,
                summary.stage,
                summary.issues,
                if summary.issues == 1 { "" } else { "s" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{corrected_status, parse_stage, preferred_ip, NodeReport, Observations, Stage,
                VolumeState};
    use crate::Status;

    fn obs(cluster_size: usize, ssh_failures: usize, stage: Stage, issue_count: usize) -> Observations {
        Observations {
            cluster_size,
            ssh_failures,
            any_ssh_ok: ssh_failures < cluster_size,
            stage,
            issue_count,
        }
    }

    #[test]
    fn stage_parsing() {
        let ready = "NODE  PID   PROC   STAGE\nn11   4242  cosd   d\nn12   4711  cosd   d\n";
        assert_eq!(parse_stage(ready), Stage::Ready);
        let booting = "n11 cosd b\n";
        assert_eq!(parse_stage(booting), Stage::Boot);
        let stopped = "n11 cosd a1\n";
        assert_eq!(parse_stage(stopped), Stage::Stopped);
        let mixed = "n11 cosd c\nn12 cosd d\n";
        assert_eq!(parse_stage(mixed), Stage::Mixed("c,d".into()));
        assert_eq!(parse_stage(""), Stage::Unknown);
        assert_eq!(parse_stage("garbage output\n"), Stage::Unknown);
    }

    #[test]
    fn all_dark_is_corrected_to_stopped() {
        // the scenario from a half-failed stop: record says stop_failed
        // but every node is gone
        let got = corrected_status(Status::StopFailed, &obs(3, 3, Stage::Unknown, 3));
        assert_eq!(got, Some(Status::Stopped));
        // even from database_ready
        let got = corrected_status(Status::DatabaseReady, &obs(3, 3, Stage::Unknown, 3));
        assert_eq!(got, Some(Status::Stopped));
        // but not when already recorded as stopped
        let got = corrected_status(Status::Stopped, &obs(3, 3, Stage::Unknown, 3));
        assert_eq!(got, None);
    }

    #[test]
    fn clean_recoverable_states_become_ready() {
        for s in &[
            Status::DeploymentFailed,
            Status::DatabaseConnectionFailed,
            Status::StartFailed,
            Status::StopFailed,
            Status::DestroyFailed,
            Status::Stopped,
            Status::Started,
        ] {
            let got = corrected_status(*s, &obs(3, 0, Stage::Ready, 0));
            assert_eq!(got, Some(Status::DatabaseReady), "from {}", s);
        }
        // a ready cluster stays put
        assert_eq!(corrected_status(Status::DatabaseReady, &obs(3, 0, Stage::Ready, 0)), None);
    }

    #[test]
    fn ready_record_with_bad_stage_degrades() {
        let got = corrected_status(Status::DatabaseReady, &obs(3, 0, Stage::Boot, 1));
        assert_eq!(got, Some(Status::DatabaseConnectionFailed));
    }

    #[test]
    fn stopped_record_with_live_nodes_is_stop_failed() {
        let got = corrected_status(Status::Stopped, &obs(3, 1, Stage::Unknown, 4));
        assert_eq!(got, Some(Status::StopFailed));
    }

    #[test]
    fn started_with_leftover_issues_stays_started() {
        let got = corrected_status(Status::Started, &obs(3, 0, Stage::CosReady, 2));
        assert_eq!(got, None);
    }

    #[test]
    fn initialized_is_never_touched_by_cleanliness() {
        assert_eq!(corrected_status(Status::Initialized, &obs(3, 0, Stage::Ready, 0)), None);
    }

    fn report(tfstate: Option<&str>, detected: Option<&str>, inventory: &str) -> NodeReport {
        NodeReport {
            name: "n11".into(),
            inventory_ip: inventory.into(),
            tfstate_ip: tfstate.map(str::to_string),
            detected_ip: detected.map(str::to_string),
            ssh_ok: true,
            cos_ssh_ok: None,
            services: Vec::new(),
            volumes: VolumeState::VolumeOk,
            stage: Stage::Ready,
            adminui_ok: true,
            db_port_ok: true,
            issues: Vec::new(),
        }
    }

    #[test]
    fn ip_precedence_is_tfstate_then_metadata_then_inventory() {
        let r = report(Some("1.1.1.1"), Some("2.2.2.2"), "3.3.3.3");
        assert_eq!(preferred_ip(&r).unwrap(), "1.1.1.1");
        let r = report(None, Some("2.2.2.2"), "3.3.3.3");
        assert_eq!(preferred_ip(&r).unwrap(), "2.2.2.2");
        let r = report(None, None, "3.3.3.3");
        assert_eq!(preferred_ip(&r).unwrap(), "3.3.3.3");
    }
}
