//! End-to-end edit flows against the in-memory store and queue.

use std::sync::Arc;

use berth_events::event_types;
use berth_id::{AppId, ChannelId, RevisionId};
use berth_reconcile::memory::{InMemoryQueue, InMemoryStore};
use berth_reconcile::{
    resolve, ApplicationStore, ChannelDraft, ChannelReference, EditError, EditService,
    NotifyError, OpContext, RangeRule, RescheduleNotifier, RuleError, Selection,
};
use tokio_util::sync::CancellationToken;

struct Fixture {
    store: Arc<InMemoryStore>,
    queue: Arc<InMemoryQueue>,
    service: EditService,
    ctx: OpContext,
    app_id: AppId,
}

async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(InMemoryQueue::new());
    let service = EditService::new(store.clone(), RescheduleNotifier::new(queue.clone()));
    let ctx = OpContext::user("usr_admin").with_correlation_id("it");
    let app_id = service
        .create_application(&ctx, "shop", "s3://bucket/shop")
        .await
        .unwrap();
    Fixture {
        store,
        queue,
        service,
        ctx,
        app_id,
    }
}

impl Fixture {
    async fn register(&self, number: &str) -> RevisionId {
        self.service
            .register_revision(&self.ctx, self.app_id, number)
            .await
            .unwrap()
            .0
    }

    async fn channel(&self, draft: ChannelDraft) -> ChannelId {
        self.service
            .create_channel(&self.ctx, self.app_id, draft)
            .await
            .unwrap()
            .0
    }

    async fn active(&self, channel_id: ChannelId) -> Option<RevisionId> {
        let app = self.store.load(self.app_id).await.unwrap().unwrap();
        app.channel(channel_id).unwrap().active_revision
    }
}

#[tokio::test]
async fn test_new_highest_revision_moves_range_channel() {
    let f = fixture().await;
    f.register("1").await;
    let two = f.register("2").await;
    let channel_id = f.channel(ChannelDraft::range_rule("stable", ">=2")).await;
    assert_eq!(f.active(channel_id).await, Some(two));

    let events_before = f.store.events().len();
    let (three, outcome) = f
        .service
        .register_revision(&f.ctx, f.app_id, "3")
        .await
        .unwrap();

    assert_eq!(outcome.changes.len(), 1);
    assert_eq!(outcome.changes[0].changed_from, Some(two));
    assert_eq!(outcome.changes[0].changed_to, Some(three));
    assert_eq!(f.active(channel_id).await, Some(three));
    assert_eq!(
        outcome.rescheduled,
        vec![ChannelReference::new(f.app_id, channel_id)]
    );

    let events = f.store.events();
    let new_events = &events[events_before..];
    assert_eq!(new_events.len(), 2);
    assert_eq!(new_events[0].event_type, event_types::REVISION_REGISTERED);
    assert_eq!(
        new_events[1].event_type,
        event_types::CHANNEL_ACTIVE_REVISION_CHANGED
    );
    assert_eq!(new_events[1].causation_id, Some(new_events[0].event_id));
    assert_eq!(new_events[1].correlation_id.as_deref(), Some("it"));
}

#[tokio::test]
async fn test_registering_older_revision_changes_nothing() {
    let f = fixture().await;
    f.register("2").await;
    f.channel(ChannelDraft::range_rule("stable", "*")).await;
    let delivered = f.queue.delivered().len();

    let (_, outcome) = f
        .service
        .register_revision(&f.ctx, f.app_id, "1.5")
        .await
        .unwrap();

    assert!(outcome.changes.is_empty());
    assert_eq!(f.queue.delivered().len(), delivered);
}

#[tokio::test]
async fn test_deleting_specified_revision_serves_nothing() {
    let f = fixture().await;
    f.register("4").await;
    let five = f.register("5").await;
    let channel_id = f.channel(ChannelDraft::specified("pinned", five)).await;
    assert_eq!(f.active(channel_id).await, Some(five));

    let outcome = f
        .service
        .delete_revision(&f.ctx, f.app_id, five)
        .await
        .unwrap();

    assert_eq!(outcome.changes.len(), 1);
    assert_eq!(outcome.changes[0].changed_from, Some(five));
    assert_eq!(outcome.changes[0].changed_to, None);
    assert_eq!(f.active(channel_id).await, None);

    let app = f.store.load(f.app_id).await.unwrap().unwrap();
    assert!(app.channel(channel_id).is_some());
    assert_eq!(app.ledger.len(), 1);
}

#[tokio::test]
async fn test_bad_rule_is_rejected_before_commit() {
    let f = fixture().await;
    let one = f.register("1.0.3").await;
    let channel_id = f.channel(ChannelDraft::range_rule("beta", "1.0.*")).await;
    let before = f.store.load(f.app_id).await.unwrap().unwrap();
    let events = f.store.events().len();
    let delivered = f.queue.delivered().len();

    let err = f
        .service
        .edit_channel(
            &f.ctx,
            f.app_id,
            channel_id,
            ChannelDraft::range_rule("beta", "<<bad>>"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::InvalidRule(RuleError::InvalidClause { .. })));
    assert!(err.is_user_error());
    let after = f.store.load(f.app_id).await.unwrap().unwrap();
    assert_eq!(after, before);
    assert_eq!(f.active(channel_id).await, Some(one));
    assert_eq!(f.store.events().len(), events);
    assert_eq!(f.queue.delivered().len(), delivered);
}

#[tokio::test]
async fn test_strategy_switch_reevaluates_in_same_edit() {
    let f = fixture().await;
    let one = f.register("1").await;
    let two = f.register("2").await;
    let channel_id = f.channel(ChannelDraft::range_rule("beta", "*")).await;
    assert_eq!(f.active(channel_id).await, Some(two));

    let events_before = f.store.events().len();
    let outcome = f
        .service
        .edit_channel(
            &f.ctx,
            f.app_id,
            channel_id,
            ChannelDraft::specified("beta", one),
        )
        .await
        .unwrap();

    assert_eq!(outcome.changes.len(), 1);
    assert_eq!(f.active(channel_id).await, Some(one));

    let events = f.store.events();
    let new_events = &events[events_before..];
    assert_eq!(new_events[0].event_type, event_types::CHANNEL_EDITED);
    assert_eq!(
        new_events[1].event_type,
        event_types::CHANNEL_ACTIVE_REVISION_CHANGED
    );
    assert_eq!(new_events[1].causation_id, Some(new_events[0].event_id));
    assert_eq!(new_events[1].payload["changed_to"], one.to_string());
}

#[tokio::test]
async fn test_enqueue_failure_is_surfaced_after_commit() {
    let f = fixture().await;
    f.register("1").await;
    let mut channels = Vec::new();
    for name in ["a", "b", "c"] {
        channels.push(f.channel(ChannelDraft::range_rule(name, "*")).await);
    }
    f.queue.fail_for(channels[1]);
    let delivered_before = f.queue.delivered().len();

    let err = f
        .service
        .register_revision(&f.ctx, f.app_id, "2")
        .await
        .unwrap_err();

    let EditError::Notification(NotifyError::Failed { failures, enqueued }) = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.channel_id, channels[1]);
    assert_eq!(enqueued.len(), 2);

    let delivered: Vec<ChannelId> = f.queue.delivered()[delivered_before..]
        .iter()
        .map(|r| r.channel_id)
        .collect();
    assert!(delivered.contains(&channels[0]));
    assert!(delivered.contains(&channels[2]));
    assert!(!delivered.contains(&channels[1]));

    // The edit itself is committed.
    let app = f.store.load(f.app_id).await.unwrap().unwrap();
    let latest = app.ledger.latest().unwrap().id;
    for channel_id in &channels {
        assert_eq!(app.channel(*channel_id).unwrap().active_revision, Some(latest));
    }

    f.queue.recover();
    let resent = f.service.reschedule_all(&f.ctx, f.app_id).await.unwrap();
    assert_eq!(resent.len(), 3);
}

#[tokio::test]
async fn test_cancelled_context_fails_notification_only() {
    let f = fixture().await;
    f.register("1").await;
    let channel_id = f.channel(ChannelDraft::range_rule("beta", "*")).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = OpContext::system().with_cancellation(cancel);
    let err = f
        .service
        .register_revision(&ctx, f.app_id, "2")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::Notification(NotifyError::Cancelled { .. })));
    assert_eq!(err.as_label(), "cancelled");
    let app = f.store.load(f.app_id).await.unwrap().unwrap();
    assert_eq!(
        app.channel(channel_id).unwrap().active_revision,
        Some(app.ledger.latest().unwrap().id)
    );
}

#[tokio::test]
async fn test_concurrent_ledger_write_conflicts() {
    let f = fixture().await;
    let store = f.store.clone();
    let app_id = f.app_id;
    f.store.before_next_commit(move || store.touch(app_id));

    let err = f
        .service
        .register_revision(&f.ctx, f.app_id, "1")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::Conflict { .. }));
    assert!(!err.is_user_error());
    let app = f.store.load(f.app_id).await.unwrap().unwrap();
    assert!(app.ledger.is_empty());
}

#[tokio::test]
async fn test_application_deleted_mid_edit_is_not_found() {
    let f = fixture().await;
    let store = f.store.clone();
    let app_id = f.app_id;
    f.store
        .before_next_commit(move || store.remove_application(app_id));

    let err = f
        .service
        .register_revision(&f.ctx, f.app_id, "1")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::NotFound { what: "application", .. }));
}

#[tokio::test]
async fn test_channel_deleted_mid_edit_is_not_found() {
    let f = fixture().await;
    let channel_id = f.channel(ChannelDraft::range_rule("beta", "*")).await;

    let store = f.store.clone();
    let app_id = f.app_id;
    f.store
        .before_next_commit(move || store.remove_channel(app_id, channel_id));

    let err = f
        .service
        .edit_channel(
            &f.ctx,
            f.app_id,
            channel_id,
            ChannelDraft::range_rule("beta", ">=1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::NotFound { what: "channel", .. }));
}

#[tokio::test]
async fn test_edits_of_different_channels_both_commit() {
    let f = fixture().await;
    f.register("1").await;
    let a = f.channel(ChannelDraft::range_rule("a", "*")).await;
    let b = f.channel(ChannelDraft::range_rule("b", "*")).await;

    // Channel b is edited by someone else between a's load and commit.
    let snapshot = f.store.load(f.app_id).await.unwrap().unwrap();
    let mut concurrent_b = snapshot.channel(b).cloned().unwrap();
    concurrent_b.version = concurrent_b.version.next();
    let store = f.store.clone();
    f.store
        .before_next_commit(move || store.overwrite_channel(concurrent_b));

    f.service
        .edit_channel(
            &f.ctx,
            f.app_id,
            a,
            ChannelDraft::range_rule("a", "*").with_environment("A=1"),
        )
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        f.service.edit_channel(
            &f.ctx,
            f.app_id,
            a,
            ChannelDraft::range_rule("a", "*").with_environment("A=2"),
        ),
        f.service.edit_channel(
            &f.ctx,
            f.app_id,
            b,
            ChannelDraft::range_rule("b", "*").with_environment("B=2"),
        ),
    );
    first.unwrap();
    second.unwrap();

    let app = f.store.load(f.app_id).await.unwrap().unwrap();
    assert_eq!(app.channel(a).unwrap().configuration.get("A"), Some("2"));
    assert_eq!(app.channel(b).unwrap().configuration.get("B"), Some("2"));
}

#[tokio::test]
async fn test_same_channel_concurrent_edit_conflicts() {
    let f = fixture().await;
    let a = f.channel(ChannelDraft::range_rule("a", "*")).await;

    let snapshot = f.store.load(f.app_id).await.unwrap().unwrap();
    let mut concurrent = snapshot.channel(a).cloned().unwrap();
    concurrent.version = concurrent.version.next();
    let store = f.store.clone();
    f.store
        .before_next_commit(move || store.overwrite_channel(concurrent));

    let err = f
        .service
        .edit_channel(
            &f.ctx,
            f.app_id,
            a,
            ChannelDraft::range_rule("a", "*").with_environment("A=1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Conflict { .. }));
}

#[tokio::test]
async fn test_reevaluation_is_idempotent_across_edits() {
    let f = fixture().await;
    f.register("1").await;
    f.register("1.1").await;
    f.channel(ChannelDraft::range_rule("a", "~1.1")).await;
    f.channel(ChannelDraft::range_rule("b", "<1.1")).await;

    let outcome = f
        .service
        .reconcile_application(&OpContext::system(), f.app_id)
        .await
        .unwrap();
    assert!(outcome.changes.is_empty());
    assert!(outcome.rescheduled.is_empty());
}

#[tokio::test]
async fn test_registration_conflicts_with_concurrent_channel_edit() {
    let f = fixture().await;
    let one = f.register("1").await;
    let two = f.register("2").await;
    let channel_id = f.channel(ChannelDraft::range_rule("stable", "<2")).await;
    assert_eq!(f.active(channel_id).await, Some(one));

    // Someone switches the rule to `>=1` and commits while revision 3 is
    // being registered; their resolution still sees the old ledger.
    let snapshot = f.store.load(f.app_id).await.unwrap().unwrap();
    let mut edited = snapshot.channel(channel_id).cloned().unwrap();
    edited.selection = Selection::RangeRule(RangeRule::parse(">=1").unwrap());
    edited.active_revision = Some(two);
    edited.version = edited.version.next();
    let store = f.store.clone();
    f.store
        .before_next_commit(move || store.overwrite_channel(edited));

    let err = f
        .service
        .register_revision(&f.ctx, f.app_id, "3")
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Conflict { .. }));
    let app = f.store.load(f.app_id).await.unwrap().unwrap();
    assert_eq!(app.ledger.len(), 2);

    // Retrying against the fresh state moves the edited channel to 3.
    let (three, outcome) = f
        .service
        .register_revision(&f.ctx, f.app_id, "3")
        .await
        .unwrap();
    assert_eq!(outcome.changes.len(), 1);
    assert_eq!(outcome.changes[0].changed_from, Some(two));
    assert_eq!(f.active(channel_id).await, Some(three));

    let app = f.store.load(f.app_id).await.unwrap().unwrap();
    for channel in &app.channels {
        let expected = resolve(channel, &app.ledger).unwrap().map(|r| r.id);
        assert_eq!(channel.active_revision, expected);
    }
}

#[tokio::test]
async fn test_channel_creation_conflicts_with_concurrent_registration() {
    let f = fixture().await;
    f.register("1").await;

    // A registration commits between the creation's load and commit.
    let store = f.store.clone();
    let app_id = f.app_id;
    f.store.before_next_commit(move || store.touch(app_id));

    let err = f
        .service
        .create_channel(&f.ctx, f.app_id, ChannelDraft::range_rule("beta", "*"))
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Conflict { .. }));
    assert!(f.store.load(f.app_id).await.unwrap().unwrap().channels.is_empty());
}

#[tokio::test]
async fn test_channel_creation_bumps_application_version() {
    let f = fixture().await;
    let before = f.store.load(f.app_id).await.unwrap().unwrap().version;
    f.channel(ChannelDraft::range_rule("beta", "*")).await;
    let after = f.store.load(f.app_id).await.unwrap().unwrap().version;
    assert_eq!(after, before.next());
}
