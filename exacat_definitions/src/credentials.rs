use std::fs;
use std::os::unix::fs::PermissionsExt;

use rand::Rng;

use super::paths::DeploymentDir;
use super::versions::VersionEntry;
use super::Result;

/// Shell, HCL and JSON safe password alphabet; ambiguous glyphs left out
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
const PASSWORD_LEN: usize = 16;

/// Generated secrets and resolved artifact references (`.credentials.json`).
///
/// Written once by init with mode 0600 and read back by deploy. The
/// passwords never go through the logger; note the absence of a Debug
/// derive.
#[derive(Serialize, Deserialize, Clone)]
pub struct Credentials {
    pub db_password: String,
    pub adminui_password: String,
    pub host_password: String,
    pub db_download_url: String,
    pub db_checksum: String,
    pub c4_download_url: String,
    pub c4_checksum: String,
}

impl Credentials {
    /// Assemble credentials, generating any password not supplied
    pub fn assemble(
        entry: &VersionEntry,
        db_password: Option<String>,
        adminui_password: Option<String>,
        host_password: Option<String>,
    ) -> Credentials {
        Credentials {
            db_password: db_password.unwrap_or_else(generate_password),
            adminui_password: adminui_password.unwrap_or_else(generate_password),
            host_password: host_password.unwrap_or_else(generate_password),
            db_download_url: entry.db_download_url.clone(),
            db_checksum: entry.db_checksum.clone(),
            c4_download_url: entry.c4_download_url.clone(),
            c4_checksum: entry.c4_checksum.clone(),
        }
    }

    pub fn read(dir: &DeploymentDir) -> Result<Credentials> {
        let raw = fs::read_to_string(dir.credentials_file())
            .map_err(|e| format_err!("could not read {}: {}", dir.credentials_file().display(), e))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write the document and clamp it to owner read/write
    pub fn write(&self, dir: &DeploymentDir) -> Result<()> {
        let path = dir.credentials_file();
        super::state::write_atomic(&path, serde_json::to_string_pretty(self)?.as_bytes())?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        Ok(())
    }
}

/// 16 chars from the OS RNG over a password safe alphabet
pub fn generate_password() -> String {
    let mut rng = rand::rngs::OsRng;
    (0..PASSWORD_LEN)
        .map(|_| ALPHABET[rng.gen_range(0, ALPHABET.len())] as char)
        .collect()
}
