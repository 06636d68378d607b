///
/// Discovery of newer database releases for the versions catalog
///

use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use semver::Version;
use sha2::{Digest, Sha256};

use exacat_definitions::conf::{Conf, Section};
use exacat_definitions::versions::{self, VersionsCatalog, ALIAS_KEY};

use super::Result;

/// Probe horizons above the current baseline
const PATCH_PROBES: u64 = 10;
const MINOR_PROBES: u64 = 5;
const MAJOR_PROBES: u64 = 3;

/// Discover newer versions and append them to the catalog.
///
/// Idempotent: a version already present is never probed again, and a
/// run that discovers nothing writes nothing.
pub fn run() -> Result<()> {
    let path = versions::catalog_path()?;
    update_catalog(&path)
}

pub fn update_catalog(path: &Path) -> Result<()> {
    let catalog = VersionsCatalog::from_conf(Conf::read(path)?);
    let (base_version, base_name) = baseline(&catalog)?;
    info!("current baseline is {} ({})", base_name, base_version);
    let base = catalog.entry(&base_name)?;

    let client = reqwest::Client::new();
    let mut found: Option<Version> = None;
    for cand in candidates(&base_version) {
        let name = format!("exasol-{}", cand);
        if catalog.exists(&name) {
            debug!("{} already in the catalog", name);
            continue;
        }
        let url = substitute_version(&base.db_download_url, &base_version.to_string(), &cand.to_string());
        if head_ok(&client, &url) {
            info!("found {}", name);
            found = Some(cand);
        }
    }

    let newest = match found {
        Some(v) => v,
        None => {
            info!("no newer versions found");
            return Ok(());
        }
    };

    let db_url = substitute_version(&base.db_download_url, &base_version.to_string(), &newest.to_string());
    if !head_ok(&client, &base.c4_download_url) {
        bail!("companion tool at {} is not reachable", base.c4_download_url);
    }

    let staging = cache_dir(&newest.to_string())?;
    info!("downloading artifacts into {}", staging.display());
    let db_file = staging.join(url_file_name(&db_url));
    download(&client, &db_url, &db_file)?;
    let db_checksum = sha256_file(&db_file)?;
    let c4_file = staging.join(url_file_name(&base.c4_download_url));
    download(&client, &base.c4_download_url, &c4_file)?;
    let c4_checksum = sha256_file(&c4_file)?;

    // reread under the advisory lock so a concurrent editor is not lost
    let _lock = CatalogLock::take(path)?;
    let mut conf = Conf::read(path)?;
    let name = format!("exasol-{}", newest);
    let local_name = format!("{}-local", name);

    let mut section = Section::new(&name);
    section.set("ARCHITECTURE", base.architecture.as_str());
    section.set("DB_VERSION", &newest.to_string());
    section.set("DB_DOWNLOAD_URL", &db_url);
    section.set("DB_CHECKSUM", &db_checksum);
    section.set("C4_VERSION", &base.c4_version);
    section.set("C4_DOWNLOAD_URL", &base.c4_download_url);
    section.set("C4_CHECKSUM", &c4_checksum);
    conf.push_section(section);

    let mut local = Section::new(&local_name);
    local.set("ARCHITECTURE", base.architecture.as_str());
    local.set("DB_VERSION", &newest.to_string());
    local.set("DB_DOWNLOAD_URL", &format!("file://{}", db_file.display()));
    local.set("DB_CHECKSUM", &db_checksum);
    local.set("C4_VERSION", &base.c4_version);
    local.set("C4_DOWNLOAD_URL", &format!("file://{}", c4_file.display()));
    local.set("C4_CHECKSUM", &c4_checksum);
    conf.push_section(local);

    set_alias(&mut conf, "default", &name);
    set_alias(&mut conf, "default-local", &local_name);
    conf.write(path)?;
    info!("added {} and {} to {}", name, local_name, path.display());
    Ok(())
}

/// The highest plain `exasol-X.Y.Z` section; arm64, dev and local
/// variants never drive discovery.
fn baseline(catalog: &VersionsCatalog) -> Result<(Version, String)> {
    let mut best: Option<(Version, String)> = None;
    for name in catalog.names() {
        let ver = match name.strip_prefix("exasol-") {
            Some(rest) => rest,
            None => continue,
        };
        let parsed = match Version::parse(ver) {
            Ok(v) => v,
            Err(_) => continue, // carries a suffix; not a plain version
        };
        if best.as_ref().map(|(b, _)| parsed > *b).unwrap_or(true) {
            best = Some((parsed, name.to_string()));
        }
    }
    best.ok_or_else(|| format_err!("catalog has no plain exasol-X.Y.Z section to start from"))
}

fn candidates(base: &Version) -> Vec<Version> {
    let mut out = Vec::new();
    for p in 1..=PATCH_PROBES {
        out.push(Version::new(base.major, base.minor, base.patch + p));
    }
    for m in 1..=MINOR_PROBES {
        out.push(Version::new(base.major, base.minor + m, 0));
    }
    for maj in 1..=MAJOR_PROBES {
        out.push(Version::new(base.major + maj, 0, 0));
    }
    out
}

fn substitute_version(url: &str, old: &str, new: &str) -> String {
    url.replace(old, new)
}

fn head_ok(client: &reqwest::Client, url: &str) -> bool {
    match client.head(url).send() {
        Ok(res) => res.status().is_success(),
        Err(e) => {
            debug!("HEAD {} failed: {}", url, e);
            false
        }
    }
}

fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    debug!("GET {} -> {}", url, dest.display());
    let mut res = client.get(url).send()?;
    if !res.status().is_success() {
        bail!("GET {} returned {}", url, res.status());
    }
    let mut file = File::create(dest)?;
    res.copy_to(&mut file)?;
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.input(&buf[..n]);
    }
    Ok(hasher.result().iter().map(|b| format!("{:02x}", b)).collect())
}

fn url_file_name(url: &str) -> String {
    url.rsplit('/').next().unwrap_or("artifact").to_string()
}

fn cache_dir(version: &str) -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| format_err!("no home directory"))?;
    let dir = home.join(".exacat").join("cache").join(version);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn set_alias(conf: &mut Conf, alias: &str, target: &str) {
    match conf.section_mut(alias) {
        Some(s) => s.set(ALIAS_KEY, target),
        None => {
            let mut s = Section::new(alias);
            s.set(ALIAS_KEY, target);
            conf.push_section(s);
        }
    }
}

/// Advisory lock over the catalog file while it is rewritten
struct CatalogLock {
    path: PathBuf,
}

impl CatalogLock {
    fn take(catalog: &Path) -> Result<CatalogLock> {
        let path = catalog.with_extension("conf.lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(CatalogLock { path }),
            Err(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                bail!("another update-versions is writing {} (remove {} if not)",
                      catalog.display(), path.display())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::{baseline, candidates, head_ok, substitute_version, update_catalog};
    use exacat_definitions::conf::Conf;
    use exacat_definitions::versions::VersionsCatalog;
    use semver::Version;

    fn catalog(raw: &str) -> VersionsCatalog {
        VersionsCatalog::from_conf(Conf::parse(raw).unwrap())
    }

    #[test]
    fn candidate_grid() {
        let c = candidates(&Version::parse("2025.1.8").unwrap());
        assert_eq!(c.len(), 18);
        assert!(c.contains(&Version::parse("2025.1.9").unwrap()));
        assert!(c.contains(&Version::parse("2025.1.18").unwrap()));
        assert!(!c.contains(&Version::parse("2025.1.19").unwrap()));
        assert!(c.contains(&Version::parse("2025.2.0").unwrap()));
        assert!(c.contains(&Version::parse("2025.6.0").unwrap()));
        assert!(c.contains(&Version::parse("2028.0.0").unwrap()));
        assert!(!c.contains(&Version::parse("2029.0.0").unwrap()));
    }

    #[test]
    fn baseline_skips_variants() {
        let c = catalog("\
[exasol-2025.1.8]
ARCHITECTURE=x86_64
[exasol-2025.1.9-arm64]
ARCHITECTURE=arm64
[exasol-2025.1.9-local]
ARCHITECTURE=x86_64
[exasol-2024.2.1]
ARCHITECTURE=x86_64
");
        let (v, name) = baseline(&c).unwrap();
        assert_eq!(name, "exasol-2025.1.8");
        assert_eq!(v, Version::parse("2025.1.8").unwrap());
    }

    #[test]
    fn baseline_needs_a_plain_section() {
        let c = catalog("[exasol-2025.1.8-arm64]\nARCHITECTURE=arm64\n");
        assert!(baseline(&c).is_err());
    }

    #[test]
    fn url_substitution() {
        assert_eq!(
            substitute_version("https://dl.example/exasol-2025.1.8.tar.gz", "2025.1.8", "2025.1.9"),
            "https://dl.example/exasol-2025.1.9.tar.gz"
        );
    }

    #[test]
    fn head_probe_follows_status() {
        let _ok = mockito::mock("HEAD", "/db-2025.1.9.tar.gz").with_status(200).create();
        let client = reqwest::Client::new();
        assert!(head_ok(&client, &format!("{}/db-2025.1.9.tar.gz", mockito::SERVER_URL)));
        assert!(!head_ok(&client, &format!("{}/db-2099.0.0.tar.gz", mockito::SERVER_URL)));
    }

    #[test]
    fn no_upstream_changes_means_no_writes() {
        // catalog whose URLs point at a server that knows nothing
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("versions.conf");
        let raw = format!("\
[default]
VERSION=exasol-2025.1.8

[exasol-2025.1.8]
ARCHITECTURE=x86_64
DB_VERSION=2025.1.8
DB_DOWNLOAD_URL={base}/exa-2025.1.8.tgz
DB_CHECKSUM=aa11
C4_VERSION=4.2.1
C4_DOWNLOAD_URL={base}/companion-4.2.1
C4_CHECKSUM=bb22
", base = mockito::SERVER_URL);
        std::fs::write(&path, &raw).unwrap();
        update_catalog(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), raw);
    }
}
