//! A small `key=value` properties file parser, used for the CA's
//! distinguished-name fields and other low-churn on-disk settings.
//! Grounded on `aether/program/properties.cpp` in the original
//! implementation: one `key=value` pair per line, `#`-prefixed and blank
//! lines ignored, no nesting, no quoting.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use aether_core::error::StartupError;

#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    pub fn load(path: &Path) -> Result<Self, StartupError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| StartupError::PropertiesMalformed(format!("reading {}: {e}", path.display())))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, StartupError> {
        let mut values = HashMap::new();
        for (lineno, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                StartupError::PropertiesMalformed(format!("line {}: missing '='", lineno + 1))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(StartupError::PropertiesMalformed(format!(
                    "line {}: empty key",
                    lineno + 1
                )));
            }
            values.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs_and_skips_comments() {
        let props = Properties::parse(
            "# comment\n\norganization=aether proxy\nport = 8080\n",
        )
        .unwrap();
        assert_eq!(props.get("organization"), Some("aether proxy"));
        assert_eq!(props.get("port"), Some("8080"));
    }

    #[test]
    fn rejects_line_without_equals() {
        let err = Properties::parse("not-a-pair\n").unwrap_err();
        assert!(matches!(err, StartupError::PropertiesMalformed(_)));
    }

    #[test]
    fn get_or_falls_back_to_default() {
        let props = Properties::parse("a=1\n").unwrap();
        assert_eq!(props.get_or("missing", "fallback"), "fallback");
    }
}
