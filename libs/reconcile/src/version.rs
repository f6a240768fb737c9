//! Revision numbers and their ordering keys.
//!
//! A revision number is `N(.N)*(-PRE)?`: dot-separated decimal release
//! components with an optional dot-separated pre-release suffix. The
//! [`OrderKey`] derived from it gives revisions of one application a total
//! order (highest = most recent):
//!
//! - release components compare numerically, trailing zeros ignored (`1.0` == `1`)
//! - a pre-release sorts before its release (`2-rc.1` < `2`)
//! - pre-release identifiers compare numerically when both are numeric,
//!   numeric before alphanumeric, otherwise lexicographically

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid revision number '{number}': {reason}")]
pub struct VersionError {
    pub number: String,
    pub reason: String,
}

impl VersionError {
    fn new(number: &str, reason: impl Into<String>) -> Self {
        Self {
            number: number.to_string(),
            reason: reason.into(),
        }
    }
}

/// One pre-release identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PreIdent {
    Numeric(u64),
    Alpha(String),
}

/// Total ordering key of a revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    release: Vec<u64>,
    pre: Vec<PreIdent>,
}

impl OrderKey {
    pub(crate) fn new(mut release: Vec<u64>, pre: Vec<PreIdent>) -> Self {
        while release.last() == Some(&0) {
            release.pop();
        }
        Self { release, pre }
    }

    /// Release component `index`, counting missing components as zero.
    pub fn component(&self, index: usize) -> u64 {
        self.release.get(index).copied().unwrap_or(0)
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release.cmp(&other.release).then_with(|| {
            match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            }
        })
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A revision number as registered, with its derived ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionNumber {
    raw: String,
    key: OrderKey,
}

impl RevisionNumber {
    pub fn parse(number: &str) -> Result<Self, VersionError> {
        let raw = number.trim();
        let (release, pre) = split_release(raw).map_err(|reason| VersionError::new(raw, reason))?;
        let release = parse_release(release).map_err(|reason| VersionError::new(raw, reason))?;
        let pre = match pre {
            Some(pre) => parse_pre(pre).map_err(|reason| VersionError::new(raw, reason))?,
            None => Vec::new(),
        };

        Ok(Self {
            raw: raw.to_string(),
            key: OrderKey::new(release, pre),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn order_key(&self) -> &OrderKey {
        &self.key
    }
}

impl std::fmt::Display for RevisionNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for RevisionNumber {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RevisionNumber {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RevisionNumber> for String {
    fn from(number: RevisionNumber) -> Self {
        number.raw
    }
}

/// Splits `1.2-rc.1` into `("1.2", Some("rc.1"))`.
pub(crate) fn split_release(text: &str) -> Result<(&str, Option<&str>), String> {
    if text.is_empty() {
        return Err("cannot be empty".to_string());
    }
    match text.split_once('-') {
        Some((_, "")) => Err("pre-release cannot be empty".to_string()),
        Some((release, pre)) => Ok((release, Some(pre))),
        None => Ok((text, None)),
    }
}

pub(crate) fn parse_release(text: &str) -> Result<Vec<u64>, String> {
    text.split('.').map(parse_numeric).collect()
}

pub(crate) fn parse_numeric(part: &str) -> Result<u64, String> {
    if part.is_empty() {
        return Err("empty release component".to_string());
    }
    if !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("release component '{part}' is not a number"));
    }
    part.parse::<u64>()
        .map_err(|_| format!("release component '{part}' is too large"))
}

pub(crate) fn parse_pre(text: &str) -> Result<Vec<PreIdent>, String> {
    text.split('.')
        .map(|part| {
            if part.is_empty() {
                return Err("empty pre-release identifier".to_string());
            }
            if !part.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return Err(format!("invalid pre-release identifier '{part}'"));
            }
            Ok(match part.parse::<u64>() {
                Ok(n) if part.bytes().all(|b| b.is_ascii_digit()) => PreIdent::Numeric(n),
                _ => PreIdent::Alpha(part.to_string()),
            })
        })
        .collect()
}
