use std::fs;

use exacat_definitions::providers::{ADMINUI_PORT, COS_SSH_PORT, DB_PORT};

use super::{CloudProvider, DeploymentDir, Result, State};

/// One cluster node as listed in `inventory.ini`
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub ip: String,
}

/// Node names count up from n11
pub fn node_name(index: usize) -> String {
    format!("n{}", 11 + index)
}

/// Read the `[exasol_nodes]` section, in file order
///
/// A deployment without an inventory has not been deployed (or the file
/// was removed), which callers treat as fatal.
pub fn read_nodes(dir: &DeploymentDir) -> Result<Vec<Node>> {
    let raw = fs::read_to_string(dir.inventory_file())
        .map_err(|e| format_err!("could not read {}: {}", dir.inventory_file().display(), e))?;
    let mut nodes = Vec::new();
    let mut in_section = false;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_section = trimmed == "[exasol_nodes]";
            continue;
        }
        if !in_section || trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let name = parts.next().unwrap_or_default().to_string();
        let ip = parts
            .find_map(|p| p.strip_prefix("ansible_host=").map(str::to_string))
            .ok_or_else(|| format_err!("inventory line for {} has no ansible_host", name))?;
        nodes.push(Node { name, ip });
    }
    if nodes.is_empty() {
        bail!("no nodes in {}", dir.inventory_file().display());
    }
    Ok(nodes)
}

/// Write inventory.ini, ssh_config and INFO.txt for a freshly applied
/// cluster. Ansible talks to the nodes through the same entries the
/// operator uses.
pub fn generate(dir: &DeploymentDir, nodes: &[Node]) -> Result<()> {
    let state = State::read(dir)?;
    write_inventory(dir, nodes, state.cloud_provider)?;
    write_ssh_config(dir, nodes, state.cloud_provider)?;
    write_info(dir, nodes, &state)?;
    Ok(())
}

fn write_inventory(dir: &DeploymentDir, nodes: &[Node], provider: CloudProvider) -> Result<()> {
    let mut out = String::from("[exasol_nodes]\n");
    for n in nodes {
        out.push_str(&format!(
            "{} ansible_host={} ansible_user={}\n",
            n.name, n.ip, provider.ssh_user()
        ));
    }
    out.push_str("\n[exasol_nodes:vars]\n");
    out.push_str(&format!(
        "ansible_ssh_private_key_file={}\n",
        dir.ssh_key_file().display()
    ));
    exacat_definitions::state::write_atomic(&dir.inventory_file(), out.as_bytes())
}

fn write_ssh_config(dir: &DeploymentDir, nodes: &[Node], provider: CloudProvider) -> Result<()> {
    let key = dir.ssh_key_file();
    let mut out = String::new();
    for n in nodes {
        out.push_str(&format!(
            "Host {}\n  HostName {}\n  User {}\n  IdentityFile {}\n  StrictHostKeyChecking no\n  UserKnownHostsFile /dev/null\n\n",
            n.name, n.ip, provider.ssh_user(), key.display()
        ));
        out.push_str(&format!(
            "Host {}-cos\n  HostName {}\n  Port {}\n  User root\n  IdentityFile {}\n  StrictHostKeyChecking no\n  UserKnownHostsFile /dev/null\n\n",
            n.name, n.ip, COS_SSH_PORT, key.display()
        ));
    }
    exacat_definitions::state::write_atomic(&dir.ssh_config_file(), out.as_bytes())
}

fn write_info(dir: &DeploymentDir, nodes: &[Node], state: &State) -> Result<()> {
    let first_ip = &nodes[0].ip;
    let mut out = String::new();
    out.push_str("Exasol deployment\n=================\n");
    out.push_str(&format!("Cloud provider: {}\n", state.cloud_provider));
    out.push_str(&format!("DB version:     {}\n", state.db_version));
    out.push_str(&format!("Cluster size:   {}\n\n", state.cluster_size));
    out.push_str("Nodes:\n");
    for n in nodes {
        out.push_str(&format!("{} {}\n", n.name, n.ip));
    }
    out.push_str(&format!("\nAdmin UI: https://{}:{}\n", first_ip, ADMINUI_PORT));
    out.push_str(&format!("Database: {}:{}\n", first_ip, DB_PORT));
    exacat_definitions::state::write_atomic(&dir.info_file(), out.as_bytes())
}

/// Point one node at a new IP across the three generated files.
///
/// Only the `[exasol_nodes]` line, the two `Host` blocks and the INFO
/// node line are touched; everything else is preserved verbatim.
pub fn update_node_ip(dir: &DeploymentDir, node: &str, new_ip: &str) -> Result<()> {
    rewrite_inventory_ip(dir, node, new_ip)?;
    rewrite_ssh_config_ip(dir, node, new_ip)?;
    rewrite_info_ip(dir, node, new_ip)?;
    Ok(())
}

fn rewrite_inventory_ip(dir: &DeploymentDir, node: &str, new_ip: &str) -> Result<()> {
    let raw = fs::read_to_string(dir.inventory_file())?;
    let mut out = String::new();
    let mut in_section = false;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_section = trimmed == "[exasol_nodes]";
        }
        if in_section && trimmed.split_whitespace().next() == Some(node) {
            let rebuilt: Vec<String> = trimmed.split_whitespace().map(|p| {
                if p.starts_with("ansible_host=") {
                    format!("ansible_host={}", new_ip)
                } else {
                    p.to_string()
                }
            }).collect();
            out.push_str(&rebuilt.join(" "));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    exacat_definitions::state::write_atomic(&dir.inventory_file(), out.as_bytes())
}

fn rewrite_ssh_config_ip(dir: &DeploymentDir, node: &str, new_ip: &str) -> Result<()> {
    let raw = fs::read_to_string(dir.ssh_config_file())?;
    let mut out = String::new();
    let mut in_block = false;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Host ") {
            let host = trimmed[5..].trim();
            in_block = host == node || host == format!("{}-cos", node);
        }
        if in_block && trimmed.starts_with("HostName ") {
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            out.push_str(&format!("{}HostName {}", indent, new_ip));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    exacat_definitions::state::write_atomic(&dir.ssh_config_file(), out.as_bytes())
}

fn rewrite_info_ip(dir: &DeploymentDir, node: &str, new_ip: &str) -> Result<()> {
    let raw = fs::read_to_string(dir.info_file())?;
    let mut out = String::new();
    for line in raw.lines() {
        if line.split_whitespace().next() == Some(node) {
            out.push_str(&format!("{} {}", node, new_ip));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    exacat_definitions::state::write_atomic(&dir.info_file(), out.as_bytes())
}

/// Whether the ssh_config declares a container-OS entry for a node
pub fn has_cos_entry(dir: &DeploymentDir, node: &str) -> bool {
    match fs::read_to_string(dir.ssh_config_file()) {
        Ok(raw) => raw.lines().any(|l| l.trim() == format!("Host {}-cos", node)),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{generate, has_cos_entry, node_name, read_nodes, update_node_ip, Node};
    use crate::{CloudProvider, DeploymentDir, State};
    use exacat_definitions::providers::Architecture;

    fn deployment(size: u32) -> (tempfile::TempDir, DeploymentDir) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DeploymentDir::at(tmp.path());
        State::init(&dir, "exasol-2025.1.8", Architecture::X86_64, CloudProvider::Aws, size).unwrap();
        (tmp, dir)
    }

    fn nodes() -> Vec<Node> {
        vec![
            Node { name: "n11".into(), ip: "10.0.0.11".into() },
            Node { name: "n12".into(), ip: "10.0.0.12".into() },
        ]
    }

    #[test]
    fn node_names_start_at_n11() {
        assert_eq!(node_name(0), "n11");
        assert_eq!(node_name(2), "n13");
    }

    #[test]
    fn generate_then_read_round_trips() {
        let (_tmp, dir) = deployment(2);
        generate(&dir, &nodes()).unwrap();
        assert_eq!(read_nodes(&dir).unwrap(), nodes());
        assert!(has_cos_entry(&dir, "n11"));
        assert!(!has_cos_entry(&dir, "n13"));
        let info = std::fs::read_to_string(dir.info_file()).unwrap();
        assert!(info.contains("n11 10.0.0.11"));
        assert!(info.contains("https://10.0.0.11:8443"));
    }

    #[test]
    fn ssh_config_has_both_users() {
        let (_tmp, dir) = deployment(2);
        generate(&dir, &nodes()).unwrap();
        let cfg = std::fs::read_to_string(dir.ssh_config_file()).unwrap();
        assert!(cfg.contains("Host n11\n"));
        assert!(cfg.contains("Host n11-cos\n"));
        assert!(cfg.contains("Port 20002"));
        assert!(cfg.contains("User ubuntu"));
    }

    #[test]
    fn ip_rewrite_touches_only_the_node() {
        let (_tmp, dir) = deployment(2);
        generate(&dir, &nodes()).unwrap();
        update_node_ip(&dir, "n11", "52.1.2.3").unwrap();

        let got = read_nodes(&dir).unwrap();
        assert_eq!(got[0].ip, "52.1.2.3");
        assert_eq!(got[1].ip, "10.0.0.12");

        let cfg = std::fs::read_to_string(dir.ssh_config_file()).unwrap();
        // both the operator and the cos block moved
        assert_eq!(cfg.matches("HostName 52.1.2.3").count(), 2);
        assert_eq!(cfg.matches("HostName 10.0.0.12").count(), 2);

        let info = std::fs::read_to_string(dir.info_file()).unwrap();
        assert!(info.contains("n11 52.1.2.3"));
        assert!(info.contains("n12 10.0.0.12"));
    }

    #[test]
    fn missing_inventory_is_fatal() {
        let (_tmp, dir) = deployment(1);
        assert!(read_nodes(&dir).is_err());
    }
}
