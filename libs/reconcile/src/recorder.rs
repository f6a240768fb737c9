//! Event recorder: builds the audit trail of one edit in causal order.
//!
//! Events are buffered here and committed together with the state change
//! they describe. Callers record the edit first and then the revision
//! changes it caused, passing the edit's index as the cause.

use berth_events::{
    event_types, AggregateType, AppCollaboratorPayload, AppCreatedPayload, AppDeletedPayload,
    AppStorageChangedPayload, ChannelActiveRevisionChangedPayload, ChannelConfiguredPayload,
    ChannelDeletedPayload, EventError, NewEvent, RevisionChangeReason, RevisionPayload,
};
use berth_id::{AppId, ChannelId, RevisionId, UserId};
use serde::Serialize;

use crate::context::OpContext;
use crate::model::{ActiveRevisionChange, Application, Channel, Revision};

/// Index of a recorded event within the current edit.
pub type EventIndex = usize;

pub struct EventRecorder<'a> {
    ctx: &'a OpContext,
    app_id: AppId,
    events: Vec<NewEvent>,
}

impl<'a> EventRecorder<'a> {
    pub fn new(ctx: &'a OpContext, app_id: AppId) -> Self {
        Self {
            ctx,
            app_id,
            events: Vec::new(),
        }
    }

    fn push<P: Serialize>(
        &mut self,
        aggregate: (AggregateType, String),
        event_type: &str,
        caused_by: Option<EventIndex>,
        description: String,
        payload: &P,
    ) -> Result<EventIndex, EventError> {
        let event = NewEvent::builder()
            .aggregate(aggregate.0, aggregate.1)
            .event_type(event_type)
            .actor(self.ctx.actor_type, self.ctx.actor_id.clone())
            .request_id(self.ctx.request_id)
            .correlation_id(self.ctx.correlation_id.clone())
            .app_id(self.app_id)
            .caused_by(caused_by)
            .description(description)
            .payload(payload)?
            .build()?;
        self.events.push(event);
        Ok(self.events.len() - 1)
    }

    fn app_aggregate(&self) -> (AggregateType, String) {
        (AggregateType::App, self.app_id.to_string())
    }

    pub fn record_app_created(&mut self, app: &Application) -> Result<EventIndex, EventError> {
        self.push(
            self.app_aggregate(),
            event_types::APP_CREATED,
            None,
            format!("application '{}' created", app.name),
            &AppCreatedPayload {
                app_id: app.id,
                name: app.name.clone(),
                storage: app.storage.clone(),
            },
        )
    }

    pub fn record_app_storage_changed(
        &mut self,
        app: &Application,
        previous: &str,
    ) -> Result<EventIndex, EventError> {
        self.push(
            self.app_aggregate(),
            event_types::APP_STORAGE_CHANGED,
            None,
            format!(
                "application '{}' storage changed from '{}' to '{}'",
                app.name, previous, app.storage
            ),
            &AppStorageChangedPayload {
                app_id: app.id,
                previous: previous.to_string(),
                storage: app.storage.clone(),
            },
        )
    }

    pub fn record_collaborator(
        &mut self,
        user_id: UserId,
        added: bool,
    ) -> Result<EventIndex, EventError> {
        let (event_type, verb) = if added {
            (event_types::APP_COLLABORATOR_ADDED, "added")
        } else {
            (event_types::APP_COLLABORATOR_REMOVED, "removed")
        };
        self.push(
            self.app_aggregate(),
            event_type,
            None,
            format!("collaborator {user_id} {verb}"),
            &AppCollaboratorPayload {
                app_id: self.app_id,
                user_id,
            },
        )
    }

    pub fn record_app_deleted(&mut self, app: &Application) -> Result<EventIndex, EventError> {
        self.push(
            self.app_aggregate(),
            event_types::APP_DELETED,
            None,
            format!("application '{}' deleted", app.name),
            &AppDeletedPayload {
                app_id: app.id,
                name: app.name.clone(),
                revision_count: app.ledger.len(),
                channel_count: app.channels.len(),
            },
        )
    }

    pub fn record_revision_registered(
        &mut self,
        revision: &Revision,
    ) -> Result<EventIndex, EventError> {
        self.push(
            (AggregateType::Revision, revision.id.to_string()),
            event_types::REVISION_REGISTERED,
            None,
            format!("revision {} registered", revision.number),
            &revision_payload(revision),
        )
    }

    pub fn record_revision_deleted(
        &mut self,
        revision: &Revision,
    ) -> Result<EventIndex, EventError> {
        self.push(
            (AggregateType::Revision, revision.id.to_string()),
            event_types::REVISION_DELETED,
            None,
            format!("revision {} deleted", revision.number),
            &revision_payload(revision),
        )
    }

    pub fn record_channel_created(&mut self, channel: &Channel) -> Result<EventIndex, EventError> {
        self.push(
            (AggregateType::Channel, channel.id.to_string()),
            event_types::CHANNEL_CREATED,
            None,
            format!("channel '{}' created", channel.name),
            &configured_payload(channel),
        )
    }

    /// Records a configuration edit of `channel` (its state after the edit).
    pub fn record_edit(&mut self, channel: &Channel) -> Result<EventIndex, EventError> {
        self.push(
            (AggregateType::Channel, channel.id.to_string()),
            event_types::CHANNEL_EDITED,
            None,
            format!("channel '{}' edited", channel.name),
            &configured_payload(channel),
        )
    }

    /// Records that `channel` now serves its cached active revision instead
    /// of `changed_from`.
    pub fn record_revision_change(
        &mut self,
        channel: &Channel,
        changed_from: Option<RevisionId>,
        reason: RevisionChangeReason,
        caused_by: Option<EventIndex>,
    ) -> Result<EventIndex, EventError> {
        let describe = |id: Option<RevisionId>| id.map_or_else(|| "nothing".to_string(), |id| id.to_string());
        self.push(
            (AggregateType::Channel, channel.id.to_string()),
            event_types::CHANNEL_ACTIVE_REVISION_CHANGED,
            caused_by,
            format!(
                "channel '{}' now serves {} instead of {} ({})",
                channel.name,
                describe(channel.active_revision),
                describe(changed_from),
                reason
            ),
            &ChannelActiveRevisionChangedPayload {
                channel_id: channel.id,
                app_id: channel.app_id,
                changed_from,
                changed_to: channel.active_revision,
                reason,
            },
        )
    }

    /// Records one revision-change event per transition, in order.
    pub fn record_changes(
        &mut self,
        app: &Application,
        changes: &[ActiveRevisionChange],
        reason: RevisionChangeReason,
        caused_by: Option<EventIndex>,
    ) -> Result<(), EventError> {
        for change in changes {
            let Some(channel) = app.channel(change.channel_id) else {
                continue;
            };
            self.record_revision_change(channel, change.changed_from, reason, caused_by)?;
        }
        Ok(())
    }

    pub fn record_deletion(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        caused_by: Option<EventIndex>,
    ) -> Result<EventIndex, EventError> {
        self.push(
            (AggregateType::Channel, channel_id.to_string()),
            event_types::CHANNEL_DELETED,
            caused_by,
            format!("channel '{}' deleted", name),
            &ChannelDeletedPayload {
                channel_id,
                app_id: self.app_id,
                name: name.to_string(),
            },
        )
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn finish(self) -> Vec<NewEvent> {
        self.events
    }
}

fn revision_payload(revision: &Revision) -> RevisionPayload {
    RevisionPayload {
        revision_id: revision.id,
        app_id: revision.app_id,
        number: revision.number.to_string(),
    }
}

fn configured_payload(channel: &Channel) -> ChannelConfiguredPayload {
    ChannelConfiguredPayload {
        channel_id: channel.id,
        app_id: channel.app_id,
        name: channel.name.clone(),
        strategy: channel.selection.strategy(),
        specified_revision_id: channel.selection.specified_revision(),
        range_rule: channel.selection.range_rule().map(|r| r.to_string()),
        env_keys: channel.configuration.keys().map(str::to_string).collect(),
        domain: channel.domain.as_ref().map(|d| d.to_string()),
        port: channel.port.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Port, Selection};
    use crate::rule::RangeRule;
    use berth_events::{validate_causation, ActorType};

    fn channel(app_id: AppId) -> Channel {
        let mut channel = Channel::new(
            app_id,
            "stable",
            Selection::RangeRule(RangeRule::parse(">=2").unwrap()),
            Port(20000),
        );
        channel.configuration.set("SECRET", "hunter2").unwrap();
        channel
    }

    #[test]
    fn test_edit_precedes_revision_change() {
        let ctx = OpContext::user("usr_1").with_correlation_id("corr");
        let app_id = AppId::new();
        let mut c = channel(app_id);
        let mut recorder = EventRecorder::new(&ctx, app_id);

        let edit = recorder.record_edit(&c).unwrap();
        let previous = c.active_revision;
        c.active_revision = Some(RevisionId::new());
        recorder
            .record_revision_change(&c, previous, RevisionChangeReason::ChannelEdited, Some(edit))
            .unwrap();

        let events = recorder.finish();
        assert!(validate_causation(&events).is_ok());
        assert_eq!(events[0].event_type, event_types::CHANNEL_EDITED);
        assert_eq!(events[1].event_type, event_types::CHANNEL_ACTIVE_REVISION_CHANGED);
        assert_eq!(events[1].causation, Some(0));
        assert_eq!(events[1].actor_type, ActorType::User);
        assert_eq!(events[1].correlation_id.as_deref(), Some("corr"));
        assert_eq!(events[1].request_id, ctx.request_id);
        assert!(events[1].payload["changed_from"].is_null());
        assert_eq!(events[1].payload["reason"], "channel_edited");
    }

    #[test]
    fn test_edit_payload_omits_env_values() {
        let ctx = OpContext::system();
        let app_id = AppId::new();
        let mut recorder = EventRecorder::new(&ctx, app_id);
        recorder.record_edit(&channel(app_id)).unwrap();

        let events = recorder.finish();
        let payload = &events[0].payload;
        assert_eq!(payload["env_keys"], serde_json::json!(["SECRET"]));
        assert!(!payload.to_string().contains("hunter2"));
        assert_eq!(payload["strategy"], "use_range_rule");
        assert_eq!(payload["range_rule"], ">=2");
    }

    #[test]
    fn test_deletion_event() {
        let ctx = OpContext::system();
        let app_id = AppId::new();
        let channel_id = ChannelId::new();
        let mut recorder = EventRecorder::new(&ctx, app_id);
        recorder.record_deletion(channel_id, "beta", None).unwrap();

        let events = recorder.finish();
        assert_eq!(events[0].aggregate_type, AggregateType::Channel);
        assert_eq!(events[0].aggregate_id, channel_id.to_string());
        assert_eq!(events[0].description, "channel 'beta' deleted");
    }
}
