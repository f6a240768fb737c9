//! Postgres application store.
//!
//! A commit runs in one transaction: version guards first, then revision,
//! channel and event writes. Any guard that does not hold rolls the whole
//! transaction back and reports [`CommitResult::Conflict`] or
//! [`CommitResult::NotFound`].

use async_trait::async_trait;
use berth_id::{AppId, EventId, Version};
use berth_reconcile::{
    AppWrite, Application, ApplicationRecord, ApplicationStore, ChannelWrite, Commit,
    CommitResult, Port, StoreError,
};
use sqlx::{postgres::PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use super::error::is_unique_violation;
use super::rows::{assemble, ApplicationRow, ChannelColumns, ChannelRow, RevisionRow};
use super::DbError;

type Tx = Transaction<'static, Postgres>;

/// Outcome of one guarded step.
enum Step {
    Continue,
    Reject(CommitResult),
}

#[derive(Clone)]
pub struct PgApplicationStore {
    pool: PgPool,
    port_range_start: u16,
}

impl PgApplicationStore {
    pub fn new(pool: PgPool, port_range_start: u16) -> Self {
        Self {
            pool,
            port_range_start,
        }
    }

    async fn load_inner(&self, app_id: AppId) -> Result<Option<Application>, DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;

        let id = app_id.to_string();
        let app = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT app_id, name, storage, collaborators, version
            FROM applications
            WHERE app_id = $1
            "#,
        )
        .bind(&id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        let Some(app) = app else {
            tx.rollback().await.map_err(DbError::Query)?;
            return Ok(None);
        };

        let revisions = sqlx::query_as::<_, RevisionRow>(
            r#"
            SELECT revision_id, app_id, number, created_at
            FROM revisions
            WHERE app_id = $1
            "#,
        )
        .bind(&id)
        .fetch_all(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        let channels = sqlx::query_as::<_, ChannelRow>(
            r#"
            SELECT channel_id, app_id, name, selection, active_revision_id,
                   configuration, domain, port, version
            FROM channels
            WHERE app_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(&id)
        .fetch_all(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        tx.commit().await.map_err(DbError::Query)?;
        assemble(app, revisions, channels).map(Some)
    }

    async fn commit_inner(&self, commit: Commit) -> Result<CommitResult, DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let mut step = write_app(&mut tx, commit.app_id, &commit.app).await?;
        if let Step::Continue = step {
            step = write_revisions(&mut tx, &commit).await?;
        }
        if let Step::Continue = step {
            step = write_channels(&mut tx, commit.app_id, &commit.channels).await?;
        }
        if let Step::Reject(result) = step {
            tx.rollback().await.map_err(DbError::Query)?;
            debug!(app_id = %commit.app_id, result = ?result, "Commit rejected");
            return Ok(result);
        }

        let event_ids = append_events(&mut tx, &commit).await?;
        tx.commit().await.map_err(DbError::Query)?;

        debug!(
            app_id = %commit.app_id,
            channels = commit.channels.len(),
            events = event_ids.len(),
            "Commit applied"
        );
        Ok(CommitResult::Success)
    }

    async fn next_port_inner(&self) -> Result<Port, DbError> {
        let offset: i64 = sqlx::query("SELECT nextval('channel_port_seq') AS port_offset")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::Query)?
            .get("port_offset");

        let port = i64::from(self.port_range_start) + offset;
        u16::try_from(port)
            .map(Port)
            .map_err(|_| DbError::PortsExhausted(port))
    }
}

#[async_trait]
impl ApplicationStore for PgApplicationStore {
    #[instrument(skip(self), fields(app_id = %app_id))]
    async fn load(&self, app_id: AppId) -> Result<Option<Application>, StoreError> {
        Ok(self.load_inner(app_id).await?)
    }

    async fn list_applications(&self) -> Result<Vec<AppId>, StoreError> {
        let rows = sqlx::query("SELECT app_id FROM applications ORDER BY app_id")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Query)?;

        let ids = rows
            .iter()
            .map(|row| {
                let id: String = row.get("app_id");
                AppId::parse(&id).map_err(|e| DbError::corrupt(format!("application {id}"), e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    async fn next_port(&self) -> Result<Port, StoreError> {
        Ok(self.next_port_inner().await?)
    }

    #[instrument(skip(self, commit), fields(app_id = %commit.app_id))]
    async fn commit(&self, commit: Commit) -> Result<CommitResult, StoreError> {
        Ok(self.commit_inner(commit).await?)
    }
}

async fn write_app(tx: &mut Tx, app_id: AppId, write: &AppWrite) -> Result<Step, DbError> {
    let id = app_id.to_string();

    let affected = match write {
        AppWrite::Create(record) => {
            let result = insert_app(tx, record).await;
            return match result {
                Ok(()) => Ok(Step::Continue),
                Err(DbError::Query(e)) if is_unique_violation(&e) => {
                    Ok(Step::Reject(CommitResult::Conflict))
                }
                Err(e) => Err(e),
            };
        }
        AppWrite::Check { expected } => {
            let version: Option<i64> =
                sqlx::query("SELECT version FROM applications WHERE app_id = $1 FOR SHARE")
                    .bind(&id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(DbError::Query)?
                    .map(|row| row.get("version"));
            return Ok(match version {
                None => Step::Reject(CommitResult::NotFound),
                Some(v) if Version::new(v) != *expected => Step::Reject(CommitResult::Conflict),
                Some(_) => Step::Continue,
            });
        }
        AppWrite::Update { record, expected } => sqlx::query(
            r#"
            UPDATE applications
            SET name = $3, storage = $4, collaborators = $5,
                version = version + 1, updated_at = now()
            WHERE app_id = $1 AND version = $2
            "#,
        )
        .bind(&id)
        .bind(expected.value())
        .bind(&record.name)
        .bind(&record.storage)
        .bind(serde_json::to_value(&record.collaborators)?)
        .execute(&mut **tx)
        .await
        .map_err(DbError::Query)?
        .rows_affected(),
        AppWrite::Delete { expected } => {
            sqlx::query("DELETE FROM applications WHERE app_id = $1 AND version = $2")
                .bind(&id)
                .bind(expected.value())
                .execute(&mut **tx)
                .await
                .map_err(DbError::Query)?
                .rows_affected()
        }
    };

    if affected > 0 {
        return Ok(Step::Continue);
    }

    let exists = sqlx::query("SELECT 1 FROM applications WHERE app_id = $1")
        .bind(&id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DbError::Query)?
        .is_some();
    Ok(Step::Reject(if exists {
        CommitResult::Conflict
    } else {
        CommitResult::NotFound
    }))
}

async fn insert_app(tx: &mut Tx, record: &ApplicationRecord) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO applications (app_id, name, storage, collaborators, version)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(record.id.to_string())
    .bind(&record.name)
    .bind(&record.storage)
    .bind(serde_json::to_value(&record.collaborators)?)
    .bind(Version::FIRST.value())
    .execute(&mut **tx)
    .await
    .map_err(DbError::Query)?;
    Ok(())
}

async fn write_revisions(tx: &mut Tx, commit: &Commit) -> Result<Step, DbError> {
    let app_id = commit.app_id.to_string();

    for revision_id in &commit.revisions_removed {
        let affected = sqlx::query("DELETE FROM revisions WHERE revision_id = $1 AND app_id = $2")
            .bind(revision_id.to_string())
            .bind(&app_id)
            .execute(&mut **tx)
            .await
            .map_err(DbError::Query)?
            .rows_affected();
        if affected == 0 {
            return Ok(Step::Reject(CommitResult::Conflict));
        }
    }

    for revision in &commit.revisions_added {
        let result = sqlx::query(
            r#"
            INSERT INTO revisions (revision_id, app_id, number, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(revision.id.to_string())
        .bind(&app_id)
        .bind(revision.number.as_str())
        .bind(revision.created_at)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(Step::Reject(CommitResult::Conflict)),
            Err(e) => return Err(DbError::Query(e)),
        }
    }

    Ok(Step::Continue)
}

async fn write_channels(
    tx: &mut Tx,
    app_id: AppId,
    writes: &[ChannelWrite],
) -> Result<Step, DbError> {
    let app_id = app_id.to_string();

    for write in writes {
        let result = match write {
            ChannelWrite::Insert(channel) => {
                let columns = ChannelColumns::from_channel(channel)?;
                sqlx::query(
                    r#"
                    INSERT INTO channels (
                        channel_id, app_id, name, selection, active_revision_id,
                        configuration, domain, port, version
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(channel.id.to_string())
                .bind(&app_id)
                .bind(&channel.name)
                .bind(columns.selection)
                .bind(columns.active_revision_id)
                .bind(columns.configuration)
                .bind(columns.domain)
                .bind(columns.port)
                .bind(channel.version.value())
                .execute(&mut **tx)
                .await
            }
            ChannelWrite::Update { channel, expected } => {
                let columns = ChannelColumns::from_channel(channel)?;
                sqlx::query(
                    r#"
                    UPDATE channels
                    SET name = $4, selection = $5, active_revision_id = $6,
                        configuration = $7, domain = $8, port = $9,
                        version = version + 1
                    WHERE channel_id = $1 AND app_id = $2 AND version = $3
                    "#,
                )
                .bind(channel.id.to_string())
                .bind(&app_id)
                .bind(expected.value())
                .bind(&channel.name)
                .bind(columns.selection)
                .bind(columns.active_revision_id)
                .bind(columns.configuration)
                .bind(columns.domain)
                .bind(columns.port)
                .execute(&mut **tx)
                .await
            }
            ChannelWrite::Delete {
                channel_id,
                expected,
            } => {
                sqlx::query(
                    "DELETE FROM channels WHERE channel_id = $1 AND app_id = $2 AND version = $3",
                )
                .bind(channel_id.to_string())
                .bind(&app_id)
                .bind(expected.value())
                .execute(&mut **tx)
                .await
            }
            ChannelWrite::Check {
                channel_id,
                expected,
            } => {
                // Row lock holds the version until this transaction ends.
                let version: Option<i64> = sqlx::query(
                    "SELECT version FROM channels WHERE channel_id = $1 AND app_id = $2 FOR UPDATE",
                )
                .bind(channel_id.to_string())
                .bind(&app_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(DbError::Query)?
                .map(|row| row.get("version"));

                if version != Some(expected.value()) {
                    return Ok(Step::Reject(CommitResult::Conflict));
                }
                continue;
            }
        };

        match result {
            Ok(done) if done.rows_affected() > 0 => {}
            Ok(_) => return Ok(Step::Reject(CommitResult::Conflict)),
            Err(e) if is_unique_violation(&e) => return Ok(Step::Reject(CommitResult::Conflict)),
            Err(e) => return Err(DbError::Query(e)),
        }
    }

    Ok(Step::Continue)
}

/// Appends the commit's events in order, resolving batch causation indexes
/// to the ids just assigned.
async fn append_events(tx: &mut Tx, commit: &Commit) -> Result<Vec<EventId>, DbError> {
    let mut event_ids: Vec<EventId> = Vec::with_capacity(commit.events.len());

    for (index, event) in commit.events.iter().enumerate() {
        let causation_id = match event.causation {
            Some(cause) if cause < index => Some(event_ids[cause]),
            Some(cause) => {
                return Err(DbError::corrupt(
                    "event batch",
                    format!("event {index} caused by later event {cause}"),
                ))
            }
            None => None,
        };

        let row = sqlx::query(
            r#"
            INSERT INTO events (
                occurred_at, aggregate_type, aggregate_id, event_type, event_version,
                actor_type, actor_id, request_id, app_id, correlation_id,
                causation_id, description, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING event_id
            "#,
        )
        .bind(event.occurred_at)
        .bind(event.aggregate_type.to_string())
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(event.event_version)
        .bind(event.actor_type.to_string())
        .bind(&event.actor_id)
        .bind(event.request_id.to_string())
        .bind(event.app_id.to_string())
        .bind(&event.correlation_id)
        .bind(causation_id.map(|id| id.value()))
        .bind(&event.description)
        .bind(&event.payload)
        .fetch_one(&mut **tx)
        .await
        .map_err(DbError::Query)?;

        let event_id: i64 = row.get("event_id");
        event_ids.push(EventId::new(event_id));
    }

    Ok(event_ids)
}
