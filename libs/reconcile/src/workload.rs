//! Workload spec hashing.
//!
//! The scheduler only needs to hear about a channel when what it runs
//! changes: the resolved revision, environment, domain, port or the
//! application's storage. The hash of that spec decides whether an edit
//! needs a reschedule.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::Channel;

/// What the scheduler runs for one channel. Field order is the hashed
/// order; environment keys are sorted.
#[derive(Debug, Serialize)]
struct WorkloadSpec<'a> {
    active_revision: Option<String>,
    environment: BTreeMap<&'a str, &'a str>,
    domain: Option<&'a str>,
    port: u16,
    storage: &'a str,
}

/// A spec hash for deterministic comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Hash of what the scheduler runs for `channel` under `storage`.
    pub fn for_channel(channel: &Channel, storage: &str) -> Result<Self, serde_json::Error> {
        let spec = WorkloadSpec {
            active_revision: channel.active_revision.map(|id| id.to_string()),
            environment: channel.configuration.iter().collect(),
            domain: channel.domain.as_ref().map(|d| d.as_str()),
            port: channel.port.0,
            storage,
        };
        let bytes = serde_json::to_vec(&spec)?;
        let digest = Sha256::digest(&bytes);
        Ok(Self(format!("sha256:{}", hex::encode(&digest[..16]))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Domain, Port, Selection};
    use crate::rule::RangeRule;
    use berth_env_format::Configuration;
    use berth_id::{AppId, RevisionId};

    fn channel() -> Channel {
        Channel::new(
            AppId::new(),
            "web",
            Selection::RangeRule(RangeRule::parse("*").unwrap()),
            Port(20000),
        )
    }

    #[test]
    fn test_environment_order_does_not_affect_workload() {
        let mut a = channel();
        a.configuration = Configuration::parse("A=1\nB=2").unwrap();
        let mut b = channel();
        b.configuration = Configuration::parse("B=2;A=1").unwrap();
        assert_eq!(
            SpecHash::for_channel(&a, "local").unwrap(),
            SpecHash::for_channel(&b, "local").unwrap()
        );
    }

    #[test]
    fn test_hash_is_prefixed_hex() {
        let hash = SpecHash::for_channel(&channel(), "local").unwrap();
        let hex = hash.as_str().strip_prefix("sha256:").unwrap();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_name_does_not_affect_workload() {
        let mut c = channel();
        let before = SpecHash::for_channel(&c, "local").unwrap();
        c.name = "renamed".to_string();
        assert_eq!(before, SpecHash::for_channel(&c, "local").unwrap());
    }

    #[test]
    fn test_workload_fields_affect_hash() {
        let c = channel();
        let base = SpecHash::for_channel(&c, "local").unwrap();

        assert_ne!(base, SpecHash::for_channel(&c, "s3://other").unwrap());

        let mut with_revision = c.clone();
        with_revision.active_revision = Some(RevisionId::new());
        assert_ne!(base, SpecHash::for_channel(&with_revision, "local").unwrap());

        let mut with_env = c.clone();
        with_env.configuration.set("A", "1").unwrap();
        assert_ne!(base, SpecHash::for_channel(&with_env, "local").unwrap());

        let mut with_domain = c;
        with_domain.domain = Some(Domain::parse("example.com").unwrap());
        assert_ne!(base, SpecHash::for_channel(&with_domain, "local").unwrap());
    }
}
