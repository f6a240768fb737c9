//! Typed ID definitions for berth resources.

use crate::define_id;

// =============================================================================
// Application Model
// =============================================================================

define_id!(AppId, "app");
define_id!(RevisionId, "rev");
define_id!(ChannelId, "chan");

// =============================================================================
// Accounts and Requests
// =============================================================================

define_id!(UserId, "usr");
define_id!(RequestId, "req");

// =============================================================================
// Events
// =============================================================================

/// Event ID is a monotonic integer assigned by the event store, not ULID-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(i64);

impl EventId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl serde::Serialize for EventId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for EventId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = i64::deserialize(deserializer)?;
        Ok(Self(id))
    }
}

// =============================================================================
// Optimistic Concurrency Version
// =============================================================================

/// Version of a persisted record, bumped on every committed write.
///
/// Writers present the version they loaded; the store rejects the write when
/// the stored version has moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(i64);

impl Version {
    /// The version of a freshly created record.
    pub const FIRST: Self = Self(1);

    #[must_use]
    pub const fn new(version: i64) -> Self {
        Self(version)
    }

    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Returns the version a successful write produces.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::FIRST
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(version: i64) -> Self {
        Self(version)
    }
}

impl serde::Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let version = i64::deserialize(deserializer)?;
        Ok(Self(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_app_id_roundtrip() {
        let id = AppId::new();
        let s = id.to_string();
        assert!(s.starts_with("app_"));
        let parsed: AppId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_channel_id_rejects_revision_prefix() {
        let rev = RevisionId::new().to_string();
        let result: Result<ChannelId, _> = rev.parse();
        let err = result.unwrap_err();
        assert!(err.is_prefix_error());
        assert!(matches!(
            err,
            crate::IdError::InvalidPrefix { expected: "chan", .. }
        ));
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<AppId, _> = "app01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert_eq!(result.unwrap_err(), crate::IdError::MissingSeparator);
    }

    #[test]
    fn test_empty() {
        let result: Result<RevisionId, _> = "".parse();
        assert_eq!(result.unwrap_err(), crate::IdError::Empty);
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<RevisionId, _> = "rev_invalid".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidUlid(_)
        ));
    }

    #[test]
    fn test_json_uses_prefixed_form() {
        let id = ChannelId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: ChannelId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_version_next() {
        let v = Version::FIRST;
        assert_eq!(v.value(), 1);
        assert_eq!(v.next().value(), 2);
        assert_eq!(v.next().to_string(), "v2");
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            AppId::PREFIX,
            RevisionId::PREFIX,
            ChannelId::PREFIX,
            UserId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_parse_display_agree(raw in any::<u128>()) {
            let id = RevisionId::from_ulid(crate::Ulid::from(raw));
            let parsed = RevisionId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(id, parsed);
        }
    }
}
