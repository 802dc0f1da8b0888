use std::time::Duration;

use anyhow::Result;
use matchday::{
    ContentApi, ContentKind, CoreConfig, EventRef, EventStatus, KindSettings, LifecycleWorker,
    UpdateUntil, WorkerKey, WorkerPhase,
};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::support::harness::Harness;
use crate::support::helpers::{
    action, config_builder, day, document, home_event, init_tracing, starts_at, sub_event,
    wait_until, TEAM_ID,
};

const EVENT: u64 = 5;
const PER_EVENT: WorkerKey = WorkerKey {
    event_id: EVENT,
    kind: ContentKind::PerEvent,
};
const POST_EVENT: WorkerKey = WorkerKey {
    event_id: EVENT,
    kind: ContentKind::PostEvent,
};

fn setup(config: CoreConfig, entry: EventRef) -> Harness {
    init_tracing();
    let h = Harness::new(config);
    h.provider.set_schedule(day(), vec![entry.clone()]);
    h.board()
        .reset(day(), entry.tracked(TEAM_ID).into_iter().collect::<Vec<_>>());
    h
}

fn spawn(h: &Harness, key: WorkerKey, token: &CancellationToken) -> JoinHandle<Result<()>> {
    let worker = LifecycleWorker::new(key, day(), h.ctx.clone(), token.clone()).unwrap();
    tokio::spawn(worker.run())
}

async fn run_to_end(h: &Harness, key: WorkerKey) -> Result<()> {
    let token = CancellationToken::new();
    timeout(Duration::from_secs(5), spawn(h, key, &token))
        .await
        .expect("worker should finish")?
}

#[tokio::test]
async fn recorded_content_is_adopted_without_publishing() -> Result<()> {
    let h = setup(
        config_builder().build()?,
        home_event(EVENT, starts_at(23), EventStatus::Final),
    );
    h.provider.publish_revision(EVENT, "t0", document("F", vec![]));
    let existing = h.content.seed("per-event 2024-04-01 event 5", "old body");
    h.store()
        .record_posted(EVENT, ContentKind::PerEvent, day(), &existing)
        .await?;

    run_to_end(&h, PER_EVENT).await?;

    assert_eq!(h.content.publish_calls(), 0);
    assert_eq!(h.board().phase(PER_EVENT), Some(WorkerPhase::Terminal));
    assert_eq!(h.board().content_id(PER_EVENT), Some(existing.clone()));
    let item = h.content.item(&existing).unwrap();
    assert_eq!(item.body, "status=Final plays=0");
    assert_eq!(h.telemetry.snapshot().content_adopted, 1);
    Ok(())
}

#[tokio::test]
async fn restarted_process_never_publishes_twice() -> Result<()> {
    let h = setup(
        config_builder().build()?,
        home_event(EVENT, starts_at(23), EventStatus::Final),
    );
    h.provider.publish_revision(EVENT, "t0", document("F", vec![]));

    run_to_end(&h, PER_EVENT).await?;
    assert_eq!(h.content.publish_calls(), 1);

    let restarted = h.restart();
    restarted.board().reset(day(), h.board().events());
    run_to_end(&restarted, PER_EVENT).await?;

    assert_eq!(h.content.publish_calls(), 1);
    assert_eq!(h.content.posts().len(), 1);
    Ok(())
}

#[tokio::test]
async fn publish_failure_skips_content_and_alerts() -> Result<()> {
    let h = setup(
        config_builder().build()?,
        home_event(EVENT, starts_at(23), EventStatus::Live),
    );
    h.provider.publish_revision(EVENT, "t0", document("I", vec![]));
    h.content.fail_publish(true);

    run_to_end(&h, PER_EVENT).await?;

    assert_eq!(h.content.publish_calls(), 1);
    assert_eq!(h.board().phase(PER_EVENT), Some(WorkerPhase::Terminal));
    assert_eq!(h.alerts.count_containing("publishing content failed"), 1);
    assert!(h
        .store()
        .posted(EVENT, ContentKind::PerEvent, day())
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn listed_content_with_matching_title_is_adopted() -> Result<()> {
    let h = setup(
        config_builder().build()?,
        home_event(EVENT, starts_at(23), EventStatus::Final),
    );
    h.provider.publish_revision(EVENT, "t0", document("F", vec![]));
    let orphan = h.content.seed("per-event 2024-04-01 event 5", "from a crashed run");

    run_to_end(&h, PER_EVENT).await?;

    assert_eq!(h.content.publish_calls(), 0);
    let recorded = h
        .store()
        .posted(EVENT, ContentKind::PerEvent, day())
        .await?
        .expect("adopted content recorded");
    assert_eq!(recorded.content_id, orphan);
    assert!(h.content.item(&orphan).unwrap().pinned);
    Ok(())
}

#[tokio::test]
async fn called_off_event_removes_posted_content() -> Result<()> {
    let h = setup(
        config_builder().build()?,
        home_event(EVENT, starts_at(23), EventStatus::Postponed),
    );
    h.provider.publish_revision(EVENT, "t0", document("D", vec![]));
    let existing = h.content.seed("per-event 2024-04-01 event 5", "preview");
    h.store()
        .record_posted(EVENT, ContentKind::PerEvent, day(), &existing)
        .await?;

    run_to_end(&h, PER_EVENT).await?;

    assert!(h.content.item(&existing).unwrap().deleted);
    assert!(h
        .store()
        .posted(EVENT, ContentKind::PerEvent, day())
        .await?
        .is_none());
    assert_eq!(h.telemetry.snapshot().content_deleted, 1);
    assert_eq!(h.board().content_id(PER_EVENT), None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn live_event_gets_notifications_until_final() -> Result<()> {
    let h = setup(
        config_builder().build()?,
        home_event(EVENT, starts_at(23), EventStatus::Live),
    );
    h.provider.publish_revision(
        EVENT,
        "t0",
        document(
            "I",
            vec![sub_event(0, "bottom", false, json!([action(0, "home_run")]), json!({}))],
        ),
    );

    let token = CancellationToken::new();
    let handle = spawn(&h, PER_EVENT, &token);

    wait_until(Duration::from_secs(5), || {
        h.board().content_id(PER_EVENT).is_some_and(|id| h.content.replies(&id).len() == 1)
    })
    .await?;
    assert_eq!(h.board().phase(PER_EVENT), Some(WorkerPhase::Updating));

    let final_doc = document(
        "F",
        vec![sub_event(
            0,
            "bottom",
            true,
            json!([action(0, "home_run")]),
            json!({"eventType": "home_run"}),
        )],
    );
    h.provider.publish_revision(EVENT, "t1", final_doc.clone());
    h.provider.add_full_diff(EVENT, "t0", "t1", final_doc);
    h.provider.set_status(day(), EVENT, EventStatus::Final);

    timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop once the event is final")??;

    let content_id = h.board().content_id(PER_EVENT).unwrap();
    assert_eq!(
        h.content.replies(&content_id),
        vec!["5/0 action 0 home_run".to_string(), "5/0 final home_run".to_string()]
    );
    assert_eq!(h.content.item(&content_id).unwrap().body, "status=Final plays=1");
    assert_eq!(h.board().phase(PER_EVENT), Some(WorkerPhase::Terminal));
    Ok(())
}

#[tokio::test]
async fn post_event_content_takes_over_the_pin() -> Result<()> {
    let mut post_event = KindSettings::defaults_for(ContentKind::PostEvent);
    post_event.update_until = UpdateUntil::Never;
    let h = setup(
        config_builder().kind(ContentKind::PostEvent, post_event).build()?,
        home_event(EVENT, starts_at(23), EventStatus::Final),
    );
    h.provider.publish_revision(EVENT, "t0", document("F", vec![]));

    let per_event = h.content.seed("per-event 2024-04-01 event 5", "live body");
    h.store()
        .record_posted(EVENT, ContentKind::PerEvent, day(), &per_event)
        .await?;
    h.content.set_pinned(&per_event, true).await?;

    run_to_end(&h, POST_EVENT).await?;

    let posts = h.content.posts();
    let post_event = posts
        .iter()
        .find(|item| item.title == "post-event 2024-04-01 event 5")
        .expect("post-event content published");
    assert!(post_event.pinned);
    assert_eq!(post_event.edits, 0);
    assert!(!h.content.item(&per_event).unwrap().pinned);
    Ok(())
}

#[tokio::test]
async fn shutdown_while_waiting_leaves_worker_unfinished() -> Result<()> {
    let mut per_event = KindSettings::defaults_for(ContentKind::PerEvent);
    per_event.minutes_before = 0;
    let far_future = chrono::Utc::now() + chrono::Duration::days(2);
    let h = setup(
        config_builder().kind(ContentKind::PerEvent, per_event).build()?,
        home_event(EVENT, far_future, EventStatus::Scheduled),
    );

    let token = CancellationToken::new();
    let handle = spawn(&h, PER_EVENT, &token);
    wait_until(Duration::from_secs(2), || h.provider.schedule_fetches() >= 2).await?;
    token.cancel();

    timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should observe cancellation")??;
    assert_eq!(h.board().phase(PER_EVENT), Some(WorkerPhase::Waiting));
    assert!(!h.board().is_stopped(PER_EVENT));
    assert_eq!(h.content.publish_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn render_failure_before_publishing_is_retried() -> Result<()> {
    let h = setup(
        config_builder().build()?,
        home_event(EVENT, starts_at(23), EventStatus::Final),
    );
    h.provider.publish_revision(EVENT, "t0", document("F", vec![]));
    h.renderer.fail_next_renders(2);

    run_to_end(&h, PER_EVENT).await?;

    assert_eq!(h.alerts.count_containing("rendering content failed, retrying"), 2);
    assert_eq!(h.content.publish_calls(), 1);
    assert_eq!(h.board().phase(PER_EVENT), Some(WorkerPhase::Terminal));
    assert!(h
        .store()
        .posted(EVENT, ContentKind::PerEvent, day())
        .await?
        .is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_while_render_keeps_failing_publishes_nothing() -> Result<()> {
    let h = setup(
        config_builder().build()?,
        home_event(EVENT, starts_at(23), EventStatus::Live),
    );
    h.provider.publish_revision(EVENT, "t0", document("I", vec![]));
    h.renderer.fail_next_renders(usize::MAX);

    let token = CancellationToken::new();
    let handle = spawn(&h, PER_EVENT, &token);
    wait_until(Duration::from_secs(5), || {
        h.alerts.count_containing("rendering content failed") >= 2
    })
    .await?;
    token.cancel();

    timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should observe cancellation")??;
    assert_eq!(h.content.publish_calls(), 0);
    assert_eq!(h.board().phase(PER_EVENT), Some(WorkerPhase::Publishing));
    assert!(!h.board().is_stopped(PER_EVENT));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn render_failure_while_updating_keeps_the_worker_running() -> Result<()> {
    let h = setup(
        config_builder().build()?,
        home_event(EVENT, starts_at(23), EventStatus::Live),
    );
    h.provider.publish_revision(EVENT, "t0", document("I", vec![]));

    let token = CancellationToken::new();
    let handle = spawn(&h, PER_EVENT, &token);
    wait_until(Duration::from_secs(5), || h.board().content_id(PER_EVENT).is_some()).await?;

    h.renderer.fail_next_renders(1);
    wait_until(Duration::from_secs(5), || {
        h.alerts.count_containing("re-rendering content failed") == 1
    })
    .await?;
    assert_eq!(h.board().phase(PER_EVENT), Some(WorkerPhase::Updating));

    let final_doc = document("F", vec![]);
    h.provider.publish_revision(EVENT, "t1", final_doc.clone());
    h.provider.add_full_diff(EVENT, "t0", "t1", final_doc);
    h.provider.set_status(day(), EVENT, EventStatus::Final);

    timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop once the event is final")??;

    let content_id = h.board().content_id(PER_EVENT).unwrap();
    assert_eq!(h.content.item(&content_id).unwrap().body, "status=Final plays=0");
    assert_eq!(h.content.publish_calls(), 1);
    assert_eq!(h.board().phase(PER_EVENT), Some(WorkerPhase::Terminal));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn earlier_event_ending_releases_the_next_one() -> Result<()> {
    init_tracing();
    let h = Harness::new(config_builder().build()?);
    let later = chrono::Utc::now() + chrono::Duration::days(2);
    let schedule = vec![
        home_event(4, starts_at(17), EventStatus::Live),
        home_event(EVENT, later, EventStatus::Scheduled),
    ];
    h.provider.set_schedule(day(), schedule.clone());
    h.board().reset(
        day(),
        schedule
            .iter()
            .filter_map(|entry| entry.tracked(TEAM_ID))
            .collect::<Vec<_>>(),
    );
    h.provider.publish_revision(EVENT, "t0", document("S", vec![]));

    let token = CancellationToken::new();
    let handle = spawn(&h, PER_EVENT, &token);
    wait_until(Duration::from_secs(2), || h.provider.schedule_fetches() >= 2).await?;
    assert_eq!(h.content.publish_calls(), 0);

    h.provider.set_status(day(), 4, EventStatus::Final);
    wait_until(Duration::from_secs(5), || h.content.publish_calls() == 1).await?;
    token.cancel();

    timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should observe cancellation")??;
    assert!(h.content.posts()[0].title.ends_with("event 5"));
    Ok(())
}
