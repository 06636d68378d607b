use std::fs;
use std::path::Path;

use super::Result;

/// One line inside a section
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// `KEY=VALUE`
    Entry(String, String),
    /// `# comment` kept verbatim
    Comment(String),
    Blank,
}

/// A `[name]` section with its lines in file order
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    pub lines: Vec<Line>,
}

impl Section {
    pub fn new(name: &str) -> Section {
        Section { name: name.into(), lines: Vec::new() }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|l| match l {
            Line::Entry(k, v) if k == key => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn set(&mut self, key: &str, value: &str) {
        for l in &mut self.lines {
            if let Line::Entry(k, v) = l {
                if k == key {
                    *v = value.into();
                    return;
                }
            }
        }
        self.lines.push(Line::Entry(key.into(), value.into()));
    }

    pub fn keys(&self) -> Vec<&str> {
        self.lines.iter().filter_map(|l| match l {
            Line::Entry(k, _) => Some(k.as_str()),
            _ => None,
        }).collect()
    }
}

/// Section keyed `KEY=VALUE` document, order preserving.
///
/// Both catalogs (`versions.conf`, `instance-types.conf`) use this shape.
/// Comments and blank lines survive a read/write cycle so a user edited
/// catalog is not mangled when update-versions appends to it. Unknown
/// keys are tolerated for forward compatibility.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conf {
    /// Comments/blanks before the first section header
    pub preamble: Vec<Line>,
    pub sections: Vec<Section>,
}

impl Conf {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Conf> {
        let raw = fs::read_to_string(path.as_ref())
            .map_err(|e| format_err!("could not read {}: {}", path.as_ref().display(), e))?;
        Conf::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Conf> {
        let mut conf = Conf::default();
        for (n, line) in raw.lines().enumerate() {
            let trimmed = line.trim();
            let parsed = if trimmed.is_empty() {
                Line::Blank
            } else if trimmed.starts_with('#') || trimmed.starts_with(';') {
                Line::Comment(trimmed.to_string())
            } else if trimmed.starts_with('[') {
                if !trimmed.ends_with(']') || trimmed.len() < 3 {
                    bail!("malformed section header on line {}: {}", n + 1, trimmed);
                }
                conf.sections.push(Section::new(&trimmed[1..trimmed.len() - 1]));
                continue;
            } else if let Some(eq) = trimmed.find('=') {
                let (k, v) = trimmed.split_at(eq);
                Line::Entry(k.trim().to_string(), v[1..].trim().to_string())
            } else {
                bail!("malformed line {} (expected KEY=VALUE): {}", n + 1, trimmed);
            };
            match conf.sections.last_mut() {
                Some(s) => s.lines.push(parsed),
                None => {
                    if let Line::Entry(ref k, _) = parsed {
                        bail!("entry '{}' on line {} appears before any [section]", k, n + 1);
                    }
                    conf.preamble.push(parsed);
                }
            }
        }
        Ok(conf)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name == name)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.get(key))
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn push_section(&mut self, section: Section) {
        self.sections.push(section);
    }

    pub fn to_string(&self) -> String {
        let mut out = String::new();
        for l in &self.preamble {
            render_line(&mut out, l);
        }
        for s in &self.sections {
            out.push_str(&format!("[{}]\n", s.name));
            for l in &s.lines {
                render_line(&mut out, l);
            }
        }
        out
    }

    /// Atomically rewrite the document
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        super::state::write_atomic(path.as_ref(), self.to_string().as_bytes())
    }
}

fn render_line(out: &mut String, line: &Line) {
    match line {
        Line::Entry(k, v) => out.push_str(&format!("{}={}\n", k, v)),
        Line::Comment(c) => out.push_str(&format!("{}\n", c)),
        Line::Blank => out.push('\n'),
    }
}

#[cfg(test)]
mod tests {
    use super::Conf;

    static SAMPLE: &str = "\
# catalog
[default]
VERSION=exasol-2025.1.8

[exasol-2025.1.8]
ARCHITECTURE=x86_64
DB_VERSION=2025.1.8
DB_DOWNLOAD_URL=https://x.example/db-2025.1.8.tar.gz
DB_CHECKSUM=0123abcd
";

    #[test]
    fn parses_sections_and_keys() {
        let c = Conf::parse(SAMPLE).unwrap();
        assert_eq!(c.section_names(), vec!["default", "exasol-2025.1.8"]);
        assert_eq!(c.get("default", "VERSION"), Some("exasol-2025.1.8"));
        assert_eq!(c.get("exasol-2025.1.8", "ARCHITECTURE"), Some("x86_64"));
        assert_eq!(c.get("exasol-2025.1.8", "NOPE"), None);
    }

    #[test]
    fn rewrite_is_stable() {
        let c = Conf::parse(SAMPLE).unwrap();
        assert_eq!(c.to_string(), SAMPLE);
        // and a second parse of the render agrees
        let c2 = Conf::parse(&c.to_string()).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn whitespace_around_equals_is_normalised() {
        let c = Conf::parse("[s]\nKEY = value\n").unwrap();
        assert_eq!(c.get("s", "KEY"), Some("value"));
        assert_eq!(c.to_string(), "[s]\nKEY=value\n");
    }

    #[test]
    fn rejects_orphan_entries() {
        assert!(Conf::parse("KEY=value\n[s]\n").is_err());
    }

    #[test]
    fn rejects_unterminated_headers() {
        assert!(Conf::parse("[oops\n").is_err());
    }

    #[test]
    fn set_updates_in_place() {
        let mut c = Conf::parse(SAMPLE).unwrap();
        c.section_mut("default").unwrap().set("VERSION", "exasol-2025.1.9");
        assert_eq!(c.get("default", "VERSION"), Some("exasol-2025.1.9"));
        // no duplicate key appended
        assert_eq!(c.section("default").unwrap().keys(), vec!["VERSION"]);
    }
}
