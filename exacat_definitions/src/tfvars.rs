use std::fmt;

use super::paths::DeploymentDir;
use super::Result;

/// A value in the variables file.
///
/// The writer never interpolates raw strings into HCL; everything goes
/// through these variants and their quoting rules.
#[derive(Debug, Clone, PartialEq)]
pub enum TfValue {
    Str(String),
    Num(i64),
    Bool(bool),
}

impl fmt::Display for TfValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TfValue::Str(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            TfValue::Num(n) => write!(f, "{}", n),
            TfValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for TfValue {
    fn from(s: &str) -> TfValue {
        TfValue::Str(s.into())
    }
}
impl From<String> for TfValue {
    fn from(s: String) -> TfValue {
        TfValue::Str(s)
    }
}
impl From<i64> for TfValue {
    fn from(n: i64) -> TfValue {
        TfValue::Num(n)
    }
}
impl From<u32> for TfValue {
    fn from(n: u32) -> TfValue {
        TfValue::Num(n as i64)
    }
}
impl From<bool> for TfValue {
    fn from(b: bool) -> TfValue {
        TfValue::Bool(b)
    }
}

/// Ordered writer for `variables.auto.tfvars`
#[derive(Debug, Clone, Default)]
pub struct TfVars {
    vars: Vec<(String, TfValue)>,
}

impl TfVars {
    pub fn new() -> TfVars {
        Default::default()
    }

    pub fn push<V: Into<TfValue>>(&mut self, key: &str, value: V) -> &mut TfVars {
        self.vars.push((key.into(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&TfValue> {
        self.vars.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn to_string(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.vars {
            out.push_str(&format!("{} = {}\n", k, v));
        }
        out
    }

    pub fn write(&self, dir: &DeploymentDir) -> Result<()> {
        super::state::write_atomic(&dir.tfvars_file(), self.to_string().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::{TfValue, TfVars};

    #[test]
    fn rendering_rules() {
        assert_eq!(TfValue::from("us-east-1").to_string(), "\"us-east-1\"");
        assert_eq!(TfValue::from(3u32).to_string(), "3");
        assert_eq!(TfValue::from(true).to_string(), "true");
        // quotes and backslashes are escaped, never interpolated
        assert_eq!(TfValue::from("a\"b\\c").to_string(), "\"a\\\"b\\\\c\"");
    }

    #[test]
    fn file_shape() {
        let mut v = TfVars::new();
        v.push("cloud_provider", "aws")
            .push("node_count", 3u32)
            .push("spot_instance", false);
        assert_eq!(
            v.to_string(),
            "cloud_provider = \"aws\"\nnode_count = 3\nspot_instance = false\n"
        );
        assert_eq!(v.get("node_count"), Some(&TfValue::Num(3)));
    }
}
