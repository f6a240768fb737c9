//! Edit service: validates an edit, reconciles affected channels, commits
//! the aggregate with its audit trail and hands changed channels to the
//! scheduler.
//!
//! Every operation follows the same order:
//!
//! 1. load the application and validate input (nothing mutated on failure)
//! 2. apply the edit to the in-memory aggregate
//! 3. reevaluate affected channels
//! 4. record the edit event, then the revision-change events it caused
//! 5. commit state and events atomically
//! 6. enqueue reschedules for channels whose workload changed
//!
//! There are no retries here. A conflicting commit surfaces as
//! [`EditError::Conflict`] (or [`EditError::NotFound`] if the target is gone)
//! and the caller decides whether to reload and try again.

use std::sync::Arc;

use berth_env_format::Configuration;
use berth_events::{EventError, RevisionChangeReason, SelectionStrategy};
use berth_id::{AppId, ChannelId, RevisionId, UserId};
use tracing::{error, info, instrument, warn};

use crate::context::OpContext;
use crate::engine::{reevaluate, reevaluate_all, ReevaluateErrors, ReevaluateOutcome};
use crate::error::{EditError, ValidationError};
use crate::model::{
    ActiveRevisionChange, Application, Channel, ChannelReference, Domain, Revision, Selection,
};
use crate::notifier::RescheduleNotifier;
use crate::recorder::EventRecorder;
use crate::rule::RangeRule;
use crate::store::{AppWrite, ApplicationStore, ChannelWrite, Commit, CommitResult};
use crate::version::RevisionNumber;
use crate::workload::SpecHash;

/// Longest accepted application or channel name.
pub const MAX_NAME_LENGTH: usize = 64;

/// Channel settings as submitted by a caller, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelDraft {
    pub name: String,
    pub strategy: Option<SelectionStrategy>,
    pub specified_revision: Option<RevisionId>,
    pub range_rule: Option<String>,
    /// Environment variable text block.
    pub environment: String,
    pub domain: Option<String>,
}

impl ChannelDraft {
    pub fn specified(name: impl Into<String>, revision_id: RevisionId) -> Self {
        Self {
            name: name.into(),
            strategy: Some(SelectionStrategy::UseSpecifiedRevision),
            specified_revision: Some(revision_id),
            ..Self::default()
        }
    }

    pub fn range_rule(name: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: Some(SelectionStrategy::UseRangeRule),
            range_rule: Some(rule.into()),
            ..Self::default()
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Draft that reproduces `channel` as it stands.
    pub fn from_channel(channel: &Channel) -> Self {
        Self {
            name: channel.name.clone(),
            strategy: Some(channel.selection.strategy()),
            specified_revision: channel.selection.specified_revision(),
            range_rule: channel.selection.range_rule().map(|r| r.to_string()),
            environment: channel.configuration.render(),
            domain: channel.domain.as_ref().map(|d| d.to_string()),
        }
    }
}

/// A draft that passed validation.
#[derive(Debug)]
struct ValidDraft {
    name: String,
    selection: Selection,
    configuration: Configuration,
    domain: Option<Domain>,
}

impl ValidDraft {
    fn apply(self, channel: &mut Channel) {
        channel.name = self.name;
        channel.selection = self.selection;
        channel.configuration = self.configuration;
        channel.domain = self.domain;
    }
}

/// What an edit changed and which channels were handed to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditOutcome {
    pub changes: Vec<ActiveRevisionChange>,
    pub rescheduled: Vec<ChannelReference>,
}

pub struct EditService {
    store: Arc<dyn ApplicationStore>,
    notifier: RescheduleNotifier,
}

impl EditService {
    pub fn new(store: Arc<dyn ApplicationStore>, notifier: RescheduleNotifier) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &Arc<dyn ApplicationStore> {
        &self.store
    }

    // =========================================================================
    // Applications
    // =========================================================================

    #[instrument(skip(self, ctx, name, storage), fields(request_id = %ctx.request_id))]
    pub async fn create_application(
        &self,
        ctx: &OpContext,
        name: &str,
        storage: &str,
    ) -> Result<AppId, EditError> {
        let name = validate_name(name)?;
        let app = Application::new(name, storage);

        let mut recorder = EventRecorder::new(ctx, app.id);
        recorder.record_app_created(&app)?;

        let commit =
            Commit::new(app.id, AppWrite::Create(app.record())).with_events(recorder.finish());
        self.commit(commit, &[]).await?;

        info!(app_id = %app.id, name = %app.name, "Application created");
        Ok(app.id)
    }

    /// Moves the application's storage. Every channel's workload changes, so
    /// every channel is rescheduled.
    #[instrument(skip(self, ctx, storage), fields(request_id = %ctx.request_id, app_id = %app_id))]
    pub async fn change_storage(
        &self,
        ctx: &OpContext,
        app_id: AppId,
        storage: &str,
    ) -> Result<EditOutcome, EditError> {
        let mut app = self.load(app_id).await?;
        if app.storage == storage {
            return Ok(EditOutcome::default());
        }

        let previous = std::mem::replace(&mut app.storage, storage.to_string());
        let mut recorder = EventRecorder::new(ctx, app.id);
        recorder.record_app_storage_changed(&app, &previous)?;

        let commit = Commit::new(app.id, update_app(&app)).with_events(recorder.finish());
        self.commit(commit, &[]).await?;

        let channels: Vec<ChannelId> = app.channels.iter().map(|c| c.id).collect();
        let rescheduled = self.reschedule(ctx, app.id, channels).await?;
        Ok(EditOutcome {
            changes: Vec::new(),
            rescheduled,
        })
    }

    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id, app_id = %app_id))]
    pub async fn add_collaborator(
        &self,
        ctx: &OpContext,
        app_id: AppId,
        user_id: UserId,
    ) -> Result<(), EditError> {
        let mut app = self.load(app_id).await?;
        if app.collaborators.contains(&user_id) {
            return Ok(());
        }
        app.collaborators.push(user_id);

        let mut recorder = EventRecorder::new(ctx, app.id);
        recorder.record_collaborator(user_id, true)?;
        let commit = Commit::new(app.id, update_app(&app)).with_events(recorder.finish());
        self.commit(commit, &[]).await
    }

    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id, app_id = %app_id))]
    pub async fn remove_collaborator(
        &self,
        ctx: &OpContext,
        app_id: AppId,
        user_id: UserId,
    ) -> Result<(), EditError> {
        let mut app = self.load(app_id).await?;
        let before = app.collaborators.len();
        app.collaborators.retain(|u| *u != user_id);
        if app.collaborators.len() == before {
            return Err(EditError::not_found("collaborator", user_id));
        }

        let mut recorder = EventRecorder::new(ctx, app.id);
        recorder.record_collaborator(user_id, false)?;
        let commit = Commit::new(app.id, update_app(&app)).with_events(recorder.finish());
        self.commit(commit, &[]).await
    }

    /// Deletes the application with its revisions and channels, then asks
    /// the scheduler to tear down every channel's workload.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id, app_id = %app_id))]
    pub async fn delete_application(
        &self,
        ctx: &OpContext,
        app_id: AppId,
    ) -> Result<EditOutcome, EditError> {
        let app = self.load(app_id).await?;

        let mut recorder = EventRecorder::new(ctx, app.id);
        let deleted = recorder.record_app_deleted(&app)?;
        for channel in &app.channels {
            recorder.record_deletion(channel.id, &channel.name, Some(deleted))?;
        }

        let commit = Commit::new(
            app.id,
            AppWrite::Delete {
                expected: app.version,
            },
        )
        .with_events(recorder.finish());
        self.commit(commit, &[]).await?;
        info!(app_id = %app.id, channels = app.channels.len(), "Application deleted");

        let channels: Vec<ChannelId> = app.channels.iter().map(|c| c.id).collect();
        let rescheduled = self.reschedule(ctx, app.id, channels).await?;
        Ok(EditOutcome {
            changes: Vec::new(),
            rescheduled,
        })
    }

    // =========================================================================
    // Revisions
    // =========================================================================

    /// Registers a new revision and moves every channel that now resolves to
    /// something else.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id, app_id = %app_id))]
    pub async fn register_revision(
        &self,
        ctx: &OpContext,
        app_id: AppId,
        number: &str,
    ) -> Result<(RevisionId, EditOutcome), EditError> {
        let number = RevisionNumber::parse(number)?;
        let mut app = self.load(app_id).await?;

        let revision = Revision::new(app.id, number);
        app.ledger.add(revision.clone())?;

        let mut recorder = EventRecorder::new(ctx, app.id);
        let registered = recorder.record_revision_registered(&revision)?;
        let pass = reevaluate_all(&mut app);
        recorder.record_changes(
            &app,
            &pass.changes,
            RevisionChangeReason::RevisionRegistered,
            Some(registered),
        )?;

        let mut commit = Commit::new(app.id, update_app(&app));
        commit.revisions_added.push(revision.clone());
        commit.channels = guarded_channel_writes(&app, &pass.changes);
        let commit = commit.with_events(recorder.finish());

        info!(revision = %revision.number, changes = pass.changes.len(), "Revision registered");
        let outcome = self.finish_pass(ctx, &app, commit, pass).await?;
        Ok((revision.id, outcome))
    }

    /// Removes a revision. Channels that served it are re-resolved; a channel
    /// that named it explicitly ends up serving nothing.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id, app_id = %app_id))]
    pub async fn delete_revision(
        &self,
        ctx: &OpContext,
        app_id: AppId,
        revision_id: RevisionId,
    ) -> Result<EditOutcome, EditError> {
        let mut app = self.load(app_id).await?;
        let revision = app
            .ledger
            .remove(revision_id)
            .ok_or_else(|| EditError::not_found("revision", revision_id))?;

        let mut recorder = EventRecorder::new(ctx, app.id);
        let deleted = recorder.record_revision_deleted(&revision)?;
        let pass = reevaluate_all(&mut app);
        recorder.record_changes(
            &app,
            &pass.changes,
            RevisionChangeReason::RevisionDeleted,
            Some(deleted),
        )?;

        let mut commit = Commit::new(app.id, update_app(&app));
        commit.revisions_removed.push(revision.id);
        commit.channels = guarded_channel_writes(&app, &pass.changes);
        let commit = commit.with_events(recorder.finish());

        info!(revision = %revision.number, changes = pass.changes.len(), "Revision deleted");
        self.finish_pass(ctx, &app, commit, pass).await
    }

    // =========================================================================
    // Channels
    // =========================================================================

    #[instrument(skip(self, ctx, draft), fields(request_id = %ctx.request_id, app_id = %app_id))]
    pub async fn create_channel(
        &self,
        ctx: &OpContext,
        app_id: AppId,
        draft: ChannelDraft,
    ) -> Result<(ChannelId, EditOutcome), EditError> {
        let app = self.load(app_id).await?;
        let valid = validate_draft(&app, &draft, None)?;
        let port = self.store.next_port().await?;

        let mut channel = Channel::new(app.id, valid.name.clone(), valid.selection.clone(), port);
        valid.apply(&mut channel);
        let change = reevaluate(&mut channel, &app.ledger).map_err(ReevaluateErrors::from)?;

        let mut recorder = EventRecorder::new(ctx, app.id);
        let created = recorder.record_channel_created(&channel)?;
        if let Some(change) = &change {
            recorder.record_revision_change(
                &channel,
                change.changed_from,
                RevisionChangeReason::ChannelCreated,
                Some(created),
            )?;
        }

        // Bumps the app version so a concurrent ledger write cannot miss
        // the new channel.
        let mut commit = Commit::new(app.id, update_app(&app));
        commit.channels.push(ChannelWrite::Insert(channel.clone()));
        self.commit(commit.with_events(recorder.finish()), &[])
            .await?;
        info!(channel_id = %channel.id, name = %channel.name, port = %channel.port, "Channel created");

        let rescheduled = self.reschedule(ctx, app.id, vec![channel.id]).await?;
        Ok((
            channel.id,
            EditOutcome {
                changes: change.into_iter().collect(),
                rescheduled,
            },
        ))
    }

    /// Replaces a channel's settings. The channel is reevaluated in the same
    /// commit and rescheduled only when its workload changed.
    #[instrument(
        skip(self, ctx, draft),
        fields(request_id = %ctx.request_id, app_id = %app_id, channel_id = %channel_id)
    )]
    pub async fn edit_channel(
        &self,
        ctx: &OpContext,
        app_id: AppId,
        channel_id: ChannelId,
        draft: ChannelDraft,
    ) -> Result<EditOutcome, EditError> {
        let mut app = self.load(app_id).await?;
        let original = app
            .channel(channel_id)
            .cloned()
            .ok_or_else(|| EditError::not_found("channel", channel_id))?;
        let valid = validate_draft(&app, &draft, Some(channel_id))?;

        let ledger = &app.ledger;
        let Some(channel) = app.channels.iter_mut().find(|c| c.id == channel_id) else {
            return Err(EditError::not_found("channel", channel_id));
        };
        valid.apply(channel);
        let change = reevaluate(channel, ledger).map_err(ReevaluateErrors::from)?;

        if *channel == original {
            return Ok(EditOutcome::default());
        }

        let mut recorder = EventRecorder::new(ctx, app.id);
        let edited = recorder.record_edit(channel)?;
        if let Some(change) = &change {
            recorder.record_revision_change(
                channel,
                change.changed_from,
                RevisionChangeReason::ChannelEdited,
                Some(edited),
            )?;
        }

        let reschedule = SpecHash::for_channel(&original, &app.storage).map_err(EventError::from)?
            != SpecHash::for_channel(channel, &app.storage).map_err(EventError::from)?;

        let mut commit = Commit::new(
            app.id,
            AppWrite::Check {
                expected: app.version,
            },
        );
        commit.channels.push(ChannelWrite::update(channel));
        self.commit(commit.with_events(recorder.finish()), &[channel_id])
            .await?;
        info!(changed = change.is_some(), reschedule, "Channel edited");

        let rescheduled = if reschedule {
            self.reschedule(ctx, app.id, vec![channel_id]).await?
        } else {
            Vec::new()
        };
        Ok(EditOutcome {
            changes: change.into_iter().collect(),
            rescheduled,
        })
    }

    /// Deletes a channel and asks the scheduler to tear down its workload.
    #[instrument(
        skip(self, ctx),
        fields(request_id = %ctx.request_id, app_id = %app_id, channel_id = %channel_id)
    )]
    pub async fn delete_channel(
        &self,
        ctx: &OpContext,
        app_id: AppId,
        channel_id: ChannelId,
    ) -> Result<EditOutcome, EditError> {
        let app = self.load(app_id).await?;
        let channel = app
            .channel(channel_id)
            .ok_or_else(|| EditError::not_found("channel", channel_id))?;

        let mut recorder = EventRecorder::new(ctx, app.id);
        recorder.record_deletion(channel.id, &channel.name, None)?;

        let mut commit = Commit::new(
            app.id,
            AppWrite::Check {
                expected: app.version,
            },
        );
        commit.channels.push(ChannelWrite::Delete {
            channel_id,
            expected: channel.version,
        });
        self.commit(commit.with_events(recorder.finish()), &[channel_id])
            .await?;
        info!(name = %channel.name, "Channel deleted");

        let rescheduled = self.reschedule(ctx, app.id, vec![channel_id]).await?;
        Ok(EditOutcome {
            changes: Vec::new(),
            rescheduled,
        })
    }

    // =========================================================================
    // Repair
    // =========================================================================

    /// Recomputes every cached active revision and fixes the ones that drifted.
    ///
    /// A consistent application produces no commit and no events.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id, app_id = %app_id))]
    pub async fn reconcile_application(
        &self,
        ctx: &OpContext,
        app_id: AppId,
    ) -> Result<EditOutcome, EditError> {
        let mut app = self.load(app_id).await?;
        let pass = reevaluate_all(&mut app);
        if pass.changes.is_empty() {
            return match pass.into_result() {
                Ok(_) => Ok(EditOutcome::default()),
                Err(errors) => Err(errors.into()),
            };
        }

        let mut recorder = EventRecorder::new(ctx, app.id);
        recorder.record_changes(&app, &pass.changes, RevisionChangeReason::Repair, None)?;

        let mut commit = Commit::new(
            app.id,
            AppWrite::Check {
                expected: app.version,
            },
        );
        commit.channels = guarded_channel_writes(&app, &pass.changes);
        let commit = commit.with_events(recorder.finish());

        warn!(changes = pass.changes.len(), "Repairing drifted active revisions");
        self.finish_pass(ctx, &app, commit, pass).await
    }

    /// Re-enqueues every channel of an application without changing state.
    ///
    /// Recovery path after a [`EditError::Notification`] failure.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id, app_id = %app_id))]
    pub async fn reschedule_all(
        &self,
        ctx: &OpContext,
        app_id: AppId,
    ) -> Result<Vec<ChannelReference>, EditError> {
        let app = self.load(app_id).await?;
        let channels: Vec<ChannelId> = app.channels.iter().map(|c| c.id).collect();
        self.reschedule(ctx, app.id, channels).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load(&self, app_id: AppId) -> Result<Application, EditError> {
        self.store
            .load(app_id)
            .await?
            .ok_or_else(|| EditError::not_found("application", app_id))
    }

    /// Commits, then maps a rejected commit to the error the caller sees.
    ///
    /// `channels` are the existing channels the commit targets; if one of
    /// them vanished the conflict is reported as `NotFound`.
    async fn commit(&self, commit: Commit, channels: &[ChannelId]) -> Result<(), EditError> {
        let app_id = commit.app_id;
        match self.store.commit(commit).await? {
            CommitResult::Success => Ok(()),
            CommitResult::NotFound => Err(EditError::not_found("application", app_id)),
            CommitResult::Conflict => {
                warn!(app_id = %app_id, "Commit conflicted with a concurrent edit");
                let Some(current) = self.store.load(app_id).await? else {
                    return Err(EditError::not_found("application", app_id));
                };
                if let Some(missing) = channels.iter().find(|id| current.channel(**id).is_none()) {
                    return Err(EditError::not_found("channel", missing));
                }
                Err(EditError::Conflict { app_id })
            }
        }
    }

    /// Commits the result of a reevaluation pass, reschedules what changed and
    /// then reports any channel that could not be resolved.
    async fn finish_pass(
        &self,
        ctx: &OpContext,
        app: &Application,
        commit: Commit,
        pass: ReevaluateOutcome,
    ) -> Result<EditOutcome, EditError> {
        let targets: Vec<ChannelId> = pass.changes.iter().map(|c| c.channel_id).collect();
        self.commit(commit, &targets).await?;

        let rescheduled = self.reschedule(ctx, app.id, targets).await?;
        match pass.into_result() {
            Ok(changes) => Ok(EditOutcome {
                changes,
                rescheduled,
            }),
            Err(errors) => {
                error!(
                    app_id = %app.id,
                    failures = errors.failures.len(),
                    "Some channels could not be reevaluated"
                );
                Err(errors.into())
            }
        }
    }

    async fn reschedule(
        &self,
        ctx: &OpContext,
        app_id: AppId,
        channels: Vec<ChannelId>,
    ) -> Result<Vec<ChannelReference>, EditError> {
        if channels.is_empty() {
            return Ok(Vec::new());
        }

        match self
            .notifier
            .notify_changed(app_id, channels, &ctx.cancel)
            .await
        {
            Ok(sent) => {
                info!(app_id = %app_id, count = sent.len(), "Reschedules enqueued");
                Ok(sent)
            }
            Err(err) => {
                error!(
                    app_id = %app_id,
                    request_id = %ctx.request_id,
                    enqueued = err.enqueued().len(),
                    unsent = err.unsent().len(),
                    error = %err,
                    "Failed to enqueue reschedules"
                );
                Err(err.into())
            }
        }
    }
}

fn update_app(app: &Application) -> AppWrite {
    AppWrite::Update {
        record: app.record(),
        expected: app.version,
    }
}

/// Writes for a commit that reevaluated every channel: changed channels are
/// updated, the rest are version-checked.
fn guarded_channel_writes(app: &Application, changes: &[ActiveRevisionChange]) -> Vec<ChannelWrite> {
    app.channels
        .iter()
        .map(|channel| {
            if changes.iter().any(|c| c.channel_id == channel.id) {
                ChannelWrite::update(channel)
            } else {
                ChannelWrite::check(channel)
            }
        })
        .collect()
}

fn validate_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::InvalidName {
            reason: "name cannot be empty".to_string(),
        });
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::InvalidName {
            reason: format!("name exceeds {MAX_NAME_LENGTH} characters"),
        });
    }
    if name.chars().any(char::is_control) {
        return Err(ValidationError::InvalidName {
            reason: "name contains control characters".to_string(),
        });
    }
    Ok(name.to_string())
}

/// Validates a draft against the application it targets.
///
/// `editing` is the channel being replaced, excluded from the name check.
fn validate_draft(
    app: &Application,
    draft: &ChannelDraft,
    editing: Option<ChannelId>,
) -> Result<ValidDraft, EditError> {
    let name = validate_name(&draft.name)?;
    if let Some(existing) = app.channel_by_name(&name) {
        if Some(existing.id) != editing {
            return Err(ValidationError::DuplicateChannelName { name }.into());
        }
    }

    let selection = match draft.strategy {
        None => return Err(ValidationError::NoStrategySelected.into()),
        Some(SelectionStrategy::UseSpecifiedRevision) => {
            let id = draft
                .specified_revision
                .ok_or(ValidationError::MissingField("specified_revision"))?;
            if !app.ledger.contains(id) {
                return Err(EditError::not_found("revision", id));
            }
            Selection::Specified(id)
        }
        Some(SelectionStrategy::UseRangeRule) => {
            let text = draft
                .range_rule
                .as_deref()
                .ok_or(ValidationError::MissingField("range_rule"))?;
            Selection::RangeRule(RangeRule::parse(text)?)
        }
    };

    let configuration = Configuration::parse(&draft.environment)?;

    let domain = match draft.domain.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(hostname) => Some(Domain::parse(hostname).map_err(|reason| {
            ValidationError::InvalidDomain {
                domain: hostname.to_string(),
                reason,
            }
        })?),
    };

    Ok(ValidDraft {
        name,
        selection,
        configuration,
        domain,
    })
}
