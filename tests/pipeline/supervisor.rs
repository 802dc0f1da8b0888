use std::time::Duration;

use anyhow::Result;
use matchday::{
    ContentKind, CoreConfig, DayOutcome, EventStatus, KindSettings, StatusSummary, Supervisor,
    WorkerKey, WorkerPhase,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::support::harness::Harness;
use crate::support::helpers::{
    config_builder, day, document, home_event, init_tracing, other_event, starts_at, wait_until,
};

async fn run_day(h: &Harness, shutdown: &CancellationToken) -> Result<DayOutcome> {
    let supervisor = Supervisor::new(h.ctx.clone());
    timeout(Duration::from_secs(10), supervisor.run_day(day(), shutdown))
        .await
        .expect("day should finish")
}

fn final_day(config: CoreConfig, event_ids: &[u64]) -> Harness {
    init_tracing();
    let h = Harness::new(config);
    let mut schedule: Vec<_> = event_ids
        .iter()
        .enumerate()
        .map(|(slot, id)| home_event(*id, starts_at(17 + slot as u32), EventStatus::Final))
        .collect();
    schedule.push(other_event(40, starts_at(18), EventStatus::Final));
    h.provider.set_schedule(day(), schedule);
    for id in event_ids {
        h.provider.publish_revision(*id, "t0", document("F", vec![]));
    }
    h
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn day_completes_once_every_worker_finishes() -> Result<()> {
    let config = config_builder()
        .kind(
            ContentKind::PostEvent,
            KindSettings::defaults_for(ContentKind::PostEvent),
        )
        .build()?;
    let h = final_day(config, &[5]);

    let outcome = run_day(&h, &CancellationToken::new()).await?;

    assert_eq!(outcome, DayOutcome::Completed);
    let titles: Vec<_> = h.content.posts().into_iter().map(|item| item.title).collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"per-event 2024-04-01 event 5".to_string()));
    assert!(titles.contains(&"post-event 2024-04-01 event 5".to_string()));

    let flags = h.board().flags(5).expect("event on the board");
    assert!(flags.content && flags.post_content);
    assert!(!flags.day_summary);
    assert!(h.board().event(40).is_none(), "untracked events stay off the board");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn day_summary_belongs_to_first_event_only() -> Result<()> {
    let config = config_builder()
        .kind(
            ContentKind::DaySummary,
            KindSettings::defaults_for(ContentKind::DaySummary),
        )
        .build()?;
    let h = final_day(config, &[5, 6]);

    let outcome = run_day(&h, &CancellationToken::new()).await?;

    assert_eq!(outcome, DayOutcome::Completed);
    let first = WorkerKey::new(5, ContentKind::DaySummary);
    let second = WorkerKey::new(6, ContentKind::DaySummary);
    assert_eq!(h.board().phase(first), Some(WorkerPhase::Terminal));
    assert_eq!(h.board().phase(second), None);
    let summaries = h
        .content
        .posts()
        .into_iter()
        .filter(|item| item.title.starts_with("day-summary"))
        .count();
    assert_eq!(summaries, 1);
    assert_eq!(h.content.posts().len(), 3);
    Ok(())
}

#[tokio::test]
async fn day_without_tracked_events_reports_no_events() -> Result<()> {
    init_tracing();
    let h = Harness::new(config_builder().build()?);
    h.provider
        .set_schedule(day(), vec![other_event(40, starts_at(18), EventStatus::Scheduled)]);

    let outcome = run_day(&h, &CancellationToken::new()).await?;

    assert_eq!(outcome, DayOutcome::NoEvents);
    assert_eq!(h.board().date(), Some(day()));
    assert!(h.board().events().is_empty());
    assert_eq!(
        StatusSummary::from_board(h.board()).render(),
        "2024-04-01: 0 event(s), 0 active worker(s)"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn schedule_outage_is_retried_and_alerted() -> Result<()> {
    let h = final_day(config_builder().build()?, &[5]);
    h.provider.fail_schedule(2);

    let outcome = run_day(&h, &CancellationToken::new()).await?;

    assert_eq!(outcome, DayOutcome::Completed);
    assert_eq!(h.alerts.count_containing("could not load today's events"), 2);
    assert_eq!(h.content.publish_calls(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crashed_worker_is_respawned_and_finishes() -> Result<()> {
    let h = final_day(config_builder().build()?, &[5]);
    // The first posted-content lookup fails, which the worker cannot absorb.
    h.executor.fail_matching("FROM posted_content WHERE", 1);

    let outcome = run_day(&h, &CancellationToken::new()).await?;

    assert_eq!(outcome, DayOutcome::Completed);
    let counters = h.telemetry.snapshot();
    assert_eq!(counters.worker_crashes, 1);
    assert_eq!(counters.worker_respawns, 1);
    assert_eq!(h.alerts.count_containing("worker died before finishing"), 1);
    assert_eq!(h.content.publish_calls(), 1);
    assert_eq!(
        h.board().phase(WorkerKey::new(5, ContentKind::PerEvent)),
        Some(WorkerPhase::Terminal)
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_cancels_a_day_in_progress() -> Result<()> {
    init_tracing();
    let h = Harness::new(config_builder().build()?);
    let far_future = chrono::Utc::now() + chrono::Duration::days(2);
    h.provider
        .set_schedule(day(), vec![home_event(5, far_future, EventStatus::Scheduled)]);

    let shutdown = CancellationToken::new();
    let supervisor = Supervisor::new(h.ctx.clone());
    let day_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { supervisor.run_day(day(), &shutdown).await })
    };

    let key = WorkerKey::new(5, ContentKind::PerEvent);
    wait_until(Duration::from_secs(2), || {
        h.board().phase(key) == Some(WorkerPhase::Waiting)
    })
    .await?;
    assert_eq!(StatusSummary::from_board(h.board()).active_workers(), 1);
    shutdown.cancel();

    let outcome = timeout(Duration::from_secs(2), day_task)
        .await
        .expect("day should stop on shutdown")??;
    assert_eq!(outcome, DayOutcome::Cancelled);
    assert_eq!(h.content.publish_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn unusable_store_fails_the_day() -> Result<()> {
    init_tracing();
    let h = Harness::new(config_builder().build()?);
    h.executor.fail_matching("COUNT(*)", 1);

    let err = run_day(&h, &CancellationToken::new())
        .await
        .expect_err("store probe failure is fatal for the day");
    assert!(format!("{err:#}").contains("progress store is unusable"));
    assert_eq!(h.provider.schedule_fetches(), 0);
    Ok(())
}
