//! Channel configuration text format.
//!
//! Operators edit a channel's environment as a single text block:
//!
//! ```text
//! DATABASE_URL=postgres://db/app
//! WORKERS=4; LOG_LEVEL=info
//! # comments and blank entries are ignored
//! ```
//!
//! Entries are separated by a newline or `;` and must have the form
//! `KEY=VALUE`. A line starting with `#` is a comment up to its end, `;`
//! included. Keys must match `[A-Za-z_][A-Za-z0-9_]*` and be at most
//! 100 bytes; values are at most 1000 bytes, cannot contain an entry
//! separator and have no surrounding whitespace. A key may appear only once.
//!
//! Every malformed entry is rejected with its 1-based entry number so the
//! operator can correct it; nothing is silently dropped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum key length in bytes.
pub const MAX_KEY_LENGTH: usize = 100;

/// Maximum value length in bytes.
pub const MAX_VALUE_LENGTH: usize = 1000;

/// Configuration format errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvFormatError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("invalid value for key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("duplicate key '{key}'")]
    DuplicateKey { key: String },

    /// An entry of a text block could not be accepted.
    #[error("entry {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// A single environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// An ordered, key-unique set of environment variables.
///
/// Insertion order is preserved so the rendered text matches what the
/// operator entered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<EnvVar>", into = "Vec<EnvVar>")]
pub struct Configuration {
    vars: Vec<EnvVar>,
}

impl TryFrom<Vec<EnvVar>> for Configuration {
    type Error = EnvFormatError;

    fn try_from(vars: Vec<EnvVar>) -> Result<Self, Self::Error> {
        Self::try_from_iter(vars.into_iter().map(|v| (v.key, v.value)))
    }
}

impl From<Configuration> for Vec<EnvVar> {
    fn from(config: Configuration) -> Self {
        config.vars
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from key/value pairs, rejecting duplicates.
    pub fn try_from_iter<I, K, V>(iter: I) -> Result<Self, EnvFormatError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::new();
        for (k, v) in iter {
            config.insert(k, v)?;
        }
        Ok(config)
    }

    /// Appends a new variable. Fails if the key is already present.
    pub fn insert<K: Into<String>, V: Into<String>>(
        &mut self,
        key: K,
        value: V,
    ) -> Result<(), EnvFormatError> {
        let key = key.into();
        let value = value.into();

        validate_key(&key)?;
        validate_value(&key, &value)?;

        if self.contains_key(&key) {
            return Err(EnvFormatError::DuplicateKey { key });
        }

        self.vars.push(EnvVar { key, value });
        Ok(())
    }

    /// Sets a variable, replacing an existing value in place.
    ///
    /// Returns the previous value if the key existed.
    pub fn set<K: Into<String>, V: Into<String>>(
        &mut self,
        key: K,
        value: V,
    ) -> Result<Option<String>, EnvFormatError> {
        let key = key.into();
        let value = value.into();

        validate_key(&key)?;
        validate_value(&key, &value)?;

        if let Some(existing) = self.vars.iter_mut().find(|v| v.key == key) {
            return Ok(Some(std::mem::replace(&mut existing.value, value)));
        }

        self.vars.push(EnvVar { key, value });
        Ok(None)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|v| v.key == key)
            .map(|v| v.value.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.vars.iter().position(|v| v.key == key)?;
        Some(self.vars.remove(index).value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.iter().any(|v| v.key == key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over key-value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|v| (v.key.as_str(), v.value.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|v| v.key.as_str())
    }

    /// Render as a newline-separated text block.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for var in &self.vars {
            out.push_str(&var.key);
            out.push('=');
            out.push_str(&var.value);
            out.push('\n');
        }
        out
    }

    /// Parse a text block.
    pub fn parse(content: &str) -> Result<Self, EnvFormatError> {
        let mut config = Self::new();

        let mut entry_number = 0;
        for line in content.lines() {
            // A comment runs to the end of its line, separators included.
            if line.trim_start().starts_with('#') {
                entry_number += 1;
                continue;
            }

            for entry in line.split(';') {
                entry_number += 1;
                let entry = entry.trim();
                if !entry.is_empty() {
                    parse_entry(entry_number, entry, &mut config)?;
                }
            }
        }

        Ok(config)
    }
}

impl std::str::FromStr for Configuration {
    type Err = EnvFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_key(key: &str) -> Result<(), EnvFormatError> {
    let invalid = |reason: String| EnvFormatError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return Err(invalid("key cannot be empty".to_string()));
    };

    if key.len() > MAX_KEY_LENGTH {
        return Err(invalid(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }

    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(invalid(
            "key must start with a letter or underscore".to_string(),
        ));
    }

    if let Some(c) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(invalid(format!("invalid character '{}' in key", c)));
    }

    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), EnvFormatError> {
    if value.len() > MAX_VALUE_LENGTH {
        return Err(EnvFormatError::InvalidValue {
            key: key.to_string(),
            reason: format!(
                "value exceeds maximum length of {} bytes",
                MAX_VALUE_LENGTH
            ),
        });
    }

    if value.trim() != value {
        return Err(EnvFormatError::InvalidValue {
            key: key.to_string(),
            reason: "value cannot start or end with whitespace".to_string(),
        });
    }

    if value.contains(['\n', '\r', ';']) {
        return Err(EnvFormatError::InvalidValue {
            key: key.to_string(),
            reason: "value cannot contain a newline or ';'".to_string(),
        });
    }

    Ok(())
}

fn parse_entry(line: usize, entry: &str, config: &mut Configuration) -> Result<(), EnvFormatError> {
    let Some((key, value)) = entry.split_once('=') else {
        return Err(EnvFormatError::Parse {
            line,
            reason: "expected KEY=VALUE format".to_string(),
        });
    };

    config
        .insert(key.trim(), value.trim())
        .map_err(|e| EnvFormatError::Parse {
            line,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("FOO", true)]
    #[case("foo_bar", true)]
    #[case("_private", true)]
    #[case("FOO123", true)]
    #[case("", false)]
    #[case("123foo", false)]
    #[case("foo-bar", false)]
    #[case("foo.bar", false)]
    fn test_key_validation(#[case] key: &str, #[case] valid: bool) {
        assert_eq!(validate_key(key).is_ok(), valid);
    }

    #[test]
    fn test_key_length_limit() {
        assert!(validate_key(&"K".repeat(MAX_KEY_LENGTH)).is_ok());
        assert!(validate_key(&"K".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_parse_newlines_and_semicolons() {
        let config = Configuration::parse("A=1\nB=2; C = 3\r\n\n;").unwrap();
        let pairs: Vec<_> = config.iter().collect();
        assert_eq!(pairs, vec![("A", "1"), ("B", "2"), ("C", "3")]);
    }

    #[test]
    fn test_value_may_contain_equals() {
        let config = Configuration::parse("DATABASE_URL=postgres://u:p@h/db?sslmode=require").unwrap();
        assert_eq!(
            config.get("DATABASE_URL"),
            Some("postgres://u:p@h/db?sslmode=require")
        );
    }

    #[test]
    fn test_comments_and_blank_entries_skipped() {
        let config = Configuration::parse("# header\n\nA=1\n   \n").unwrap();
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn test_missing_equals_reports_entry() {
        let err = Configuration::parse("A=1\nB=2;oops").unwrap_err();
        assert_eq!(
            err,
            EnvFormatError::Parse {
                line: 3,
                reason: "expected KEY=VALUE format".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = Configuration::parse("A=1\nA=2").unwrap_err();
        assert!(matches!(err, EnvFormatError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = Configuration::parse("=value").unwrap_err();
        assert!(matches!(err, EnvFormatError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut config = Configuration::try_from_iter([("A", "1"), ("B", "2")]).unwrap();
        assert_eq!(config.set("A", "9").unwrap(), Some("1".to_string()));
        assert_eq!(config.render(), "A=9\nB=2\n");
        assert_eq!(config.remove("A"), Some("9".to_string()));
        assert!(!config.contains_key("A"));
    }

    #[test]
    fn test_value_with_separator_rejected() {
        let mut config = Configuration::new();
        assert!(matches!(
            config.set("A", "x;y"),
            Err(EnvFormatError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_comment_line_hides_its_separators() {
        let config = Configuration::parse("# old; A=1\nB=2").unwrap();
        let pairs: Vec<_> = config.iter().collect();
        assert_eq!(pairs, vec![("B", "2")]);

        let err = Configuration::parse("# note; x\noops").unwrap_err();
        assert!(matches!(err, EnvFormatError::Parse { line: 2, .. }));
    }

    #[rstest]
    #[case(" padded")]
    #[case("padded ")]
    #[case("\tpadded")]
    fn test_value_with_surrounding_whitespace_rejected(#[case] value: &str) {
        let mut config = Configuration::new();
        assert!(matches!(
            config.set("A", value),
            Err(EnvFormatError::InvalidValue { .. })
        ));
        assert!(config.insert("A", value).is_err());
        assert!(config.set("A", "inner space ok").is_ok());
    }

    #[test]
    fn test_render_parses_back() {
        let config = Configuration::try_from_iter([("PORT", "8080"), ("MODE", "a=b")]).unwrap();
        assert_eq!(Configuration::parse(&config.render()).unwrap(), config);
    }

    #[test]
    fn test_serializes_as_list() {
        let config = Configuration::try_from_iter([("A", "1")]).unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json, serde_json::json!([{"key": "A", "value": "1"}]));
    }

    #[test]
    fn test_deserialize_validates_entries() {
        let padded = serde_json::json!([{"key": "A", "value": " 1"}]);
        assert!(serde_json::from_value::<Configuration>(padded).is_err());

        let duplicate = serde_json::json!([
            {"key": "A", "value": "1"},
            {"key": "A", "value": "2"}
        ]);
        assert!(serde_json::from_value::<Configuration>(duplicate).is_err());
    }
}
