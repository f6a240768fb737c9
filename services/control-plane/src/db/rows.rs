//! Row types and their conversion to the domain model.

use berth_env_format::Configuration;
use berth_id::{AppId, ChannelId, RevisionId, UserId, Version};
use berth_reconcile::{
    Application, Channel, Domain, Port, Revision, RevisionLedger, RevisionNumber, Selection,
};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Row};

use super::DbError;

#[derive(Debug, Clone)]
pub(crate) struct ApplicationRow {
    pub app_id: String,
    pub name: String,
    pub storage: String,
    pub collaborators: serde_json::Value,
    pub version: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ApplicationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            app_id: row.try_get("app_id")?,
            name: row.try_get("name")?,
            storage: row.try_get("storage")?,
            collaborators: row.try_get("collaborators")?,
            version: row.try_get("version")?,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RevisionRow {
    pub revision_id: String,
    pub app_id: String,
    pub number: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for RevisionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            revision_id: row.try_get("revision_id")?,
            app_id: row.try_get("app_id")?,
            number: row.try_get("number")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl RevisionRow {
    pub fn into_revision(self) -> Result<Revision, DbError> {
        let what = || format!("revision {}", self.revision_id);
        Ok(Revision {
            id: RevisionId::parse(&self.revision_id).map_err(|e| DbError::corrupt(what(), e))?,
            app_id: AppId::parse(&self.app_id).map_err(|e| DbError::corrupt(what(), e))?,
            number: RevisionNumber::parse(&self.number).map_err(|e| DbError::corrupt(what(), e))?,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ChannelRow {
    pub channel_id: String,
    pub app_id: String,
    pub name: String,
    pub selection: serde_json::Value,
    pub active_revision_id: Option<String>,
    pub configuration: serde_json::Value,
    pub domain: Option<String>,
    pub port: i32,
    pub version: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ChannelRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            channel_id: row.try_get("channel_id")?,
            app_id: row.try_get("app_id")?,
            name: row.try_get("name")?,
            selection: row.try_get("selection")?,
            active_revision_id: row.try_get("active_revision_id")?,
            configuration: row.try_get("configuration")?,
            domain: row.try_get("domain")?,
            port: row.try_get("port")?,
            version: row.try_get("version")?,
        })
    }
}

impl ChannelRow {
    pub fn into_channel(self) -> Result<Channel, DbError> {
        let what = format!("channel {}", self.channel_id);
        let corrupt = |e: &dyn std::fmt::Display| DbError::corrupt(what.clone(), e);

        let selection: Selection =
            serde_json::from_value(self.selection).map_err(|e| corrupt(&e))?;
        let configuration: Configuration =
            serde_json::from_value(self.configuration).map_err(|e| corrupt(&e))?;
        let domain = self
            .domain
            .as_deref()
            .map(Domain::parse)
            .transpose()
            .map_err(|e| corrupt(&e))?;
        let active_revision = self
            .active_revision_id
            .as_deref()
            .map(RevisionId::parse)
            .transpose()
            .map_err(|e| corrupt(&e))?;
        let port = u16::try_from(self.port).map_err(|e| corrupt(&e))?;

        Ok(Channel {
            id: ChannelId::parse(&self.channel_id).map_err(|e| corrupt(&e))?,
            app_id: AppId::parse(&self.app_id).map_err(|e| corrupt(&e))?,
            name: self.name,
            selection,
            active_revision,
            configuration,
            domain,
            port: Port(port),
            version: Version::new(self.version),
        })
    }
}

/// Column values written for a channel.
pub(crate) struct ChannelColumns {
    pub selection: serde_json::Value,
    pub active_revision_id: Option<String>,
    pub configuration: serde_json::Value,
    pub domain: Option<String>,
    pub port: i32,
}

impl ChannelColumns {
    pub fn from_channel(channel: &Channel) -> Result<Self, DbError> {
        Ok(Self {
            selection: serde_json::to_value(&channel.selection)?,
            active_revision_id: channel.active_revision.map(|id| id.to_string()),
            configuration: serde_json::to_value(&channel.configuration)?,
            domain: channel.domain.as_ref().map(|d| d.to_string()),
            port: i32::from(channel.port.0),
        })
    }
}

/// Rebuilds the aggregate from its rows. Channels must already be in
/// insertion order.
pub(crate) fn assemble(
    app: ApplicationRow,
    revisions: Vec<RevisionRow>,
    channels: Vec<ChannelRow>,
) -> Result<Application, DbError> {
    let what = format!("application {}", app.app_id);
    let id = AppId::parse(&app.app_id).map_err(|e| DbError::corrupt(what.clone(), e))?;
    let collaborators: Vec<UserId> = serde_json::from_value(app.collaborators)
        .map_err(|e| DbError::corrupt(what.clone(), e))?;

    let revisions = revisions
        .into_iter()
        .map(RevisionRow::into_revision)
        .collect::<Result<Vec<_>, _>>()?;
    let ledger =
        RevisionLedger::from_revisions(id, revisions).map_err(|e| DbError::corrupt(what, e))?;

    let channels = channels
        .into_iter()
        .map(ChannelRow::into_channel)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Application {
        id,
        name: app.name,
        storage: app.storage,
        ledger,
        channels,
        collaborators,
        version: Version::new(app.version),
    })
}
