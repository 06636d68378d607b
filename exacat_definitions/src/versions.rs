use std::env;
use std::path::PathBuf;

use regex::Regex;

use super::conf::Conf;
use super::providers::Architecture;

// New failure error type
#[derive(Debug)]
pub struct VersionsError {
    inner: Context<VErrKind>,
}
// its associated enum
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum VErrKind {
    #[fail(display = "version '{}' not found in the catalog", _0)]
    NotFound(String),

    #[fail(display = "catalog section '{}' is missing required key '{}'", _0, _1)]
    MalformedSection(String, String),

    #[fail(display = "'{}' is not a valid version name (expected name-X.Y.Z[-arm64][dev.N][-local])", _0)]
    MalformedVersionName(String),

    #[fail(display = "alias chain starting at '{}' does not terminate", _0)]
    AliasLoop(String),
}
use failure::{Error, Fail, Context, Backtrace};
use std::fmt::{self, Display};

// boilerplate error wrapping (might go away)
impl Fail for VersionsError {
    fn cause(&self) -> Option<&Fail> { self.inner.cause() }
    fn backtrace(&self) -> Option<&Backtrace> { self.inner.backtrace() }
}
impl Display for VersionsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<VErrKind> for VersionsError {
    fn from(kind: VErrKind) -> VersionsError {
        VersionsError { inner: Context::new(kind) }
    }
}
impl From<Context<VErrKind>> for VersionsError {
    fn from(inner: Context<VErrKind>) -> VersionsError {
        VersionsError { inner: inner }
    }
}
type Result<T> = std::result::Result<T, Error>;

pub const VERSIONS_FILE: &str = "versions.conf";
/// Alias sections carry a single pointer key instead of artifact data
pub const ALIAS_KEY: &str = "VERSION";

/// One resolved version section from the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct VersionEntry {
    /// Section name, e.g. `exasol-2025.1.8-arm64`
    pub name: String,
    pub architecture: Architecture,
    /// Canonical identifier handed to the installer, e.g. `2025.1.8`
    pub db_version: String,
    pub db_download_url: String,
    pub db_checksum: String,
    pub c4_version: String,
    pub c4_download_url: String,
    pub c4_checksum: String,
}

/// The user editable versions catalog (`versions.conf`).
///
/// Sections are either real versions carrying artifact URLs/checksums, or
/// aliases (`default`, `default-local`, ...) holding a single `VERSION`
/// pointer to a real section. Read-only at deploy time; only
/// update-versions appends to it.
#[derive(Debug, Clone)]
pub struct VersionsCatalog {
    conf: Conf,
}

impl VersionsCatalog {
    pub fn load() -> Result<VersionsCatalog> {
        Ok(VersionsCatalog { conf: Conf::read(catalog_path()?)? })
    }

    pub fn from_conf(conf: Conf) -> VersionsCatalog {
        VersionsCatalog { conf }
    }

    pub fn conf(&self) -> &Conf {
        &self.conf
    }

    pub fn exists(&self, name: &str) -> bool {
        self.conf.has_section(name)
    }

    /// Chase alias sections until a real version section is reached
    pub fn resolve(&self, name: &str) -> Result<String> {
        let mut cur = name.to_string();
        // alias chains are short; anything deeper is a cycle
        for _ in 0..8 {
            let section = self.conf.section(&cur)
                .ok_or_else(|| VersionsError::from(VErrKind::NotFound(cur.clone())))?;
            match section.get(ALIAS_KEY) {
                Some(target) => cur = target.to_string(),
                None => return Ok(cur),
            }
        }
        Err(VErrKind::AliasLoop(name.into()).into())
    }

    /// Resolve and load a full version entry
    pub fn entry(&self, name: &str) -> Result<VersionEntry> {
        let real = self.resolve(name)?;
        validate_version_name(&real)?;
        let get = |key: &str| -> Result<String> {
            self.conf.get(&real, key)
                .map(str::to_string)
                .ok_or_else(|| VersionsError::from(VErrKind::MalformedSection(real.clone(), key.into())).into())
        };
        Ok(VersionEntry {
            name: real.clone(),
            architecture: get("ARCHITECTURE")?.parse()?,
            db_version: get("DB_VERSION")?,
            db_download_url: get("DB_DOWNLOAD_URL")?,
            db_checksum: normalize_checksum(&get("DB_CHECKSUM")?),
            c4_version: get("C4_VERSION")?,
            c4_download_url: get("C4_DOWNLOAD_URL")?,
            c4_checksum: normalize_checksum(&get("C4_CHECKSUM")?),
        })
    }

    /// Real version sections, in catalog order
    pub fn names(&self) -> Vec<&str> {
        self.conf.sections.iter()
            .filter(|s| s.get(ALIAS_KEY).is_none())
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Alias sections, in catalog order
    pub fn aliases(&self) -> Vec<(&str, &str)> {
        self.conf.sections.iter()
            .filter_map(|s| s.get(ALIAS_KEY).map(|v| (s.name.as_str(), v)))
            .collect()
    }
}

/// Validate the version name grammar `name-X.Y.Z[-arm64][dev.N][-local]`
pub fn validate_version_name(name: &str) -> Result<()> {
    let re = Regex::new(r"^[a-z][a-z0-9]*-\d+\.\d+\.\d+(-arm64)?(-?dev\.\d+)?(-local)?$").unwrap();
    if !re.is_match(name) {
        return Err(VErrKind::MalformedVersionName(name.into()).into());
    }
    Ok(())
}

/// Checksums may carry a `sha256:` prefix in the catalog; strip it
pub fn normalize_checksum(raw: &str) -> String {
    raw.trim_start_matches("sha256:").to_string()
}

/// Location of the versions catalog
///
/// `EXASOL_VERSIONS_CONFIG` wins; otherwise look next to the running
/// binary (the tool ships as a directory containing binary, catalogs and
/// templates), then in the current directory.
pub fn catalog_path() -> Result<PathBuf> {
    config_file_path("EXASOL_VERSIONS_CONFIG", VERSIONS_FILE)
}

pub(crate) fn config_file_path(evar: &str, file: &str) -> Result<PathBuf> {
    if let Ok(p) = env::var(evar) {
        let pth = PathBuf::from(&p);
        if !pth.is_file() {
            bail!("{} points at '{}' which does not exist", evar, p);
        }
        return Ok(pth);
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let cand = dir.join(file);
            if cand.is_file() {
                return Ok(cand);
            }
        }
    }
    let cwd = env::current_dir()?.join(file);
    if cwd.is_file() {
        return Ok(cwd);
    }
    bail!("could not locate {} (set {} to override)", file, evar);
}

#[cfg(test)]
mod tests {
    use super::{validate_version_name, VersionsCatalog};
    use crate::conf::Conf;
    use crate::providers::Architecture;

    static CATALOG: &str = "\
[default]
VERSION=exasol-2025.1.8

[default-local]
VERSION=exasol-2025.1.8-local

[exasol-2025.1.8]
ARCHITECTURE=x86_64
DB_VERSION=2025.1.8
DB_DOWNLOAD_URL=https://dl.example/exasol-2025.1.8.tar.gz
DB_CHECKSUM=sha256:aa11
C4_VERSION=4.2.1
C4_DOWNLOAD_URL=https://dl.example/c4-4.2.1
C4_CHECKSUM=bb22

[exasol-2025.1.8-arm64]
ARCHITECTURE=arm64
DB_VERSION=2025.1.8
DB_DOWNLOAD_URL=https://dl.example/exasol-2025.1.8-arm64.tar.gz
DB_CHECKSUM=cc33
C4_VERSION=4.2.1
C4_DOWNLOAD_URL=https://dl.example/c4-4.2.1-arm64
C4_CHECKSUM=dd44

[exasol-2025.1.8-local]
ARCHITECTURE=x86_64
DB_VERSION=2025.1.8
DB_DOWNLOAD_URL=file:///var/cache/exasol-2025.1.8.tar.gz
DB_CHECKSUM=aa11
C4_VERSION=4.2.1
C4_DOWNLOAD_URL=file:///var/cache/c4-4.2.1
C4_CHECKSUM=bb22
";

    fn catalog() -> VersionsCatalog {
        VersionsCatalog::from_conf(Conf::parse(CATALOG).unwrap())
    }

    #[test]
    fn grammar_accepts_the_known_shapes() {
        for ok in &[
            "exasol-2025.1.8",
            "exasol-2025.1.8-arm64",
            "exasol-2025.1.8-local",
            "exasol-2025.1.8-arm64-local",
            "exasol-2025.2.0-arm64dev.0",
            "exasol-2025.2.0-dev.3",
        ] {
            assert!(validate_version_name(ok).is_ok(), "should accept {}", ok);
        }
    }

    #[test]
    fn grammar_rejects_everything_else() {
        for bad in &[
            "exasol",
            "exasol-2025.1",
            "exasol-2025.1.8-",
            "exasol-2025.1.8-armv7",
            "exasol-2025.1.8-local-arm64",
            "Exasol-2025.1.8",
            "exasol-2025.1.8 arm64",
            "2025.1.8",
        ] {
            assert!(validate_version_name(bad).is_err(), "should reject {}", bad);
        }
    }

    #[test]
    fn aliases_resolve_to_real_sections() {
        let c = catalog();
        assert_eq!(c.resolve("default").unwrap(), "exasol-2025.1.8");
        assert_eq!(c.resolve("default-local").unwrap(), "exasol-2025.1.8-local");
        assert_eq!(c.resolve("exasol-2025.1.8-arm64").unwrap(), "exasol-2025.1.8-arm64");
        assert!(c.resolve("exasol-9.9.9").is_err());
    }

    #[test]
    fn alias_loops_are_bounded() {
        let raw = "[a]\nVERSION=b\n[b]\nVERSION=a\n";
        let c = VersionsCatalog::from_conf(Conf::parse(raw).unwrap());
        assert!(c.resolve("a").is_err());
    }

    #[test]
    fn entry_loads_and_normalises() {
        let c = catalog();
        let e = c.entry("default").unwrap();
        assert_eq!(e.name, "exasol-2025.1.8");
        assert_eq!(e.architecture, Architecture::X86_64);
        assert_eq!(e.db_version, "2025.1.8");
        // sha256: prefix stripped
        assert_eq!(e.db_checksum, "aa11");
        let arm = c.entry("exasol-2025.1.8-arm64").unwrap();
        assert_eq!(arm.architecture, Architecture::Arm64);
    }

    #[test]
    fn entry_requires_all_keys() {
        let raw = "[exasol-2025.1.8]\nARCHITECTURE=x86_64\nDB_VERSION=2025.1.8\n";
        let c = VersionsCatalog::from_conf(Conf::parse(raw).unwrap());
        let err = c.entry("exasol-2025.1.8").unwrap_err();
        assert!(format!("{}", err).contains("DB_DOWNLOAD_URL"));
    }

    #[test]
    fn names_excludes_aliases() {
        let c = catalog();
        assert_eq!(c.names(), vec![
            "exasol-2025.1.8",
            "exasol-2025.1.8-arm64",
            "exasol-2025.1.8-local",
        ]);
        assert_eq!(c.aliases().len(), 2);
    }
}
