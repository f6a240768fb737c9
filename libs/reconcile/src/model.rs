//! Applications, revisions and channels.

use berth_env_format::Configuration;
use berth_events::SelectionStrategy;
use berth_id::{AppId, ChannelId, RevisionId, UserId, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::RevisionLedger;
use crate::rule::RangeRule;
use crate::version::RevisionNumber;

/// One immutable, numbered build of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub app_id: AppId,
    pub number: RevisionNumber,
    pub created_at: DateTime<Utc>,
}

impl Revision {
    pub fn new(app_id: AppId, number: RevisionNumber) -> Self {
        Self {
            id: RevisionId::new(),
            app_id,
            number,
            created_at: Utc::now(),
        }
    }
}

/// How a channel picks its active revision.
///
/// The strategy tag and the data it needs travel together, so a channel can
/// never claim a range rule without having one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "value", rename_all = "snake_case")]
pub enum Selection {
    /// Always the given revision, or nothing once it is deleted.
    #[serde(rename = "use_specified_revision")]
    Specified(RevisionId),
    /// The most recent revision the rule matches.
    #[serde(rename = "use_range_rule")]
    RangeRule(RangeRule),
}

impl Selection {
    pub fn strategy(&self) -> SelectionStrategy {
        match self {
            Selection::Specified(_) => SelectionStrategy::UseSpecifiedRevision,
            Selection::RangeRule(_) => SelectionStrategy::UseRangeRule,
        }
    }

    pub fn specified_revision(&self) -> Option<RevisionId> {
        match self {
            Selection::Specified(id) => Some(*id),
            Selection::RangeRule(_) => None,
        }
    }

    pub fn range_rule(&self) -> Option<&RangeRule> {
        match self {
            Selection::Specified(_) => None,
            Selection::RangeRule(rule) => Some(rule),
        }
    }
}

/// Hostname a channel is served on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Domain(String);

impl Domain {
    pub const MAX_LENGTH: usize = 253;

    /// Validates and lowercases a hostname.
    pub fn parse(hostname: &str) -> Result<Self, String> {
        let hostname = hostname.trim().trim_end_matches('.').to_ascii_lowercase();

        if hostname.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }
        if hostname.len() > Self::MAX_LENGTH {
            return Err(format!(
                "hostname cannot exceed {} characters",
                Self::MAX_LENGTH
            ));
        }
        for label in hostname.split('.') {
            if label.is_empty() || label.len() > 63 {
                return Err(format!("invalid label '{label}' in hostname"));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(format!("label '{label}' cannot start or end with '-'"));
            }
            if !label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
            {
                return Err(format!("label '{label}' contains invalid characters"));
            }
        }

        Ok(Self(hostname))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Domain {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Domain> for String {
    fn from(domain: Domain) -> Self {
        domain.0
    }
}

/// Port assigned to a channel for the scheduler's use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Port(pub u16);

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named traffic-routing target of an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub app_id: AppId,
    pub name: String,
    pub selection: Selection,
    /// Cached result of the revision selector. Never a source of truth.
    pub active_revision: Option<RevisionId>,
    pub configuration: Configuration,
    pub domain: Option<Domain>,
    pub port: Port,
    pub version: Version,
}

impl Channel {
    /// A new channel with nothing resolved yet.
    pub fn new(app_id: AppId, name: impl Into<String>, selection: Selection, port: Port) -> Self {
        Self {
            id: ChannelId::new(),
            app_id,
            name: name.into(),
            selection,
            active_revision: None,
            configuration: Configuration::new(),
            domain: None,
            port,
            version: Version::FIRST,
        }
    }

    pub fn reference(&self) -> ChannelReference {
        ChannelReference::new(self.app_id, self.id)
    }
}

/// Application-level fields, persisted separately from revisions and channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRecord {
    pub id: AppId,
    pub name: String,
    pub storage: String,
    pub collaborators: Vec<UserId>,
}

/// The aggregate an edit operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub id: AppId,
    pub name: String,
    pub storage: String,
    pub ledger: RevisionLedger,
    /// Channels in insertion order.
    pub channels: Vec<Channel>,
    pub collaborators: Vec<UserId>,
    pub version: Version,
}

impl Application {
    pub fn new(name: impl Into<String>, storage: impl Into<String>) -> Self {
        let id = AppId::new();
        Self {
            id,
            name: name.into(),
            storage: storage.into(),
            ledger: RevisionLedger::new(id),
            channels: Vec::new(),
            collaborators: Vec::new(),
            version: Version::FIRST,
        }
    }

    pub fn record(&self) -> ApplicationRecord {
        ApplicationRecord {
            id: self.id,
            name: self.name.clone(),
            storage: self.storage.clone(),
            collaborators: self.collaborators.clone(),
        }
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.id == id)
    }

    pub fn channel_by_name(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn channel_references(&self) -> Vec<ChannelReference> {
        self.channels.iter().map(Channel::reference).collect()
    }
}

/// A detected transition of a channel's active revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActiveRevisionChange {
    pub app_id: AppId,
    pub channel_id: ChannelId,
    pub changed_from: Option<RevisionId>,
    pub changed_to: Option<RevisionId>,
}

/// Unit of work for the external scheduler: "re-sync this channel".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelReference {
    pub app_id: AppId,
    pub channel_id: ChannelId,
}

impl ChannelReference {
    pub fn new(app_id: AppId, channel_id: ChannelId) -> Self {
        Self { app_id, channel_id }
    }
}

impl std::fmt::Display for ChannelReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app_id, self.channel_id)
    }
}
