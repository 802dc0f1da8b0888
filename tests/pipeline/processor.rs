use anyhow::Result;
use matchday::{ProcessingRecord, Snapshot, TeamRole, VersionToken};
use serde_json::{json, Value};

use crate::support::harness::Harness;
use crate::support::helpers::{action, config_builder, document, init_tracing, sub_event};

const EVENT: u64 = 5;

fn snapshot(token: &str, plays: Vec<Value>) -> Snapshot {
    Snapshot::new(EVENT, VersionToken::new(token), document("I", plays))
}

fn harness() -> Harness {
    Harness::new(config_builder().build().unwrap())
}

#[tokio::test]
async fn scanning_twice_publishes_nothing_new() -> Result<()> {
    init_tracing();
    let h = harness();
    let parent = h.content.seed("per-event", "body");
    let snap = snapshot(
        "20240401_230000",
        vec![
            sub_event(
                0,
                "bottom",
                true,
                json!([action(0, "ball"), action(1, "home_run")]),
                json!({"eventType": "home_run", "isScoringPlay": true}),
            ),
            sub_event(1, "top", false, json!([action(0, "strikeout")]), json!({})),
        ],
    );

    let first = h.ctx.processor.scan(EVENT, &parent, &snap, TeamRole::Home).await?;
    assert_eq!(first.published, 3, "home run, its finalization, and a strikeout");
    let record_after_first = h.store().load_processing(EVENT, &parent).await?;

    let second = h.ctx.processor.scan(EVENT, &parent, &snap, TeamRole::Home).await?;
    assert_eq!(second.published, 0);
    assert!(!second.saved);
    assert_eq!(h.content.replies(&parent).len(), 3);
    assert_eq!(
        h.store().load_processing(EVENT, &parent).await?,
        record_after_first
    );
    Ok(())
}

#[tokio::test]
async fn partially_processed_sub_event_finishes_with_one_finalization() -> Result<()> {
    init_tracing();
    let h = harness();
    let parent = h.content.seed("per-event", "body");

    let mut seeded = ProcessingRecord::default();
    seeded.mark_complete(0);
    seeded.record_action(1, 0);
    h.store().save_processing(EVENT, &parent, &seeded).await?;

    let snap = snapshot(
        "20240401_230500",
        vec![
            sub_event(
                0,
                "bottom",
                true,
                json!([action(0, "home_run")]),
                json!({"eventType": "home_run"}),
            ),
            sub_event(
                1,
                "bottom",
                true,
                json!([action(0, "home_run"), action(1, "single")]),
                json!({"eventType": "home_run", "description": "Walk-off"}),
            ),
            sub_event(2, "top", false, json!([]), json!({})),
        ],
    );

    let report = h.ctx.processor.scan(EVENT, &parent, &snap, TeamRole::Home).await?;
    assert_eq!(report.published, 1);
    assert_eq!(report.ignored, 1);
    assert_eq!(report.completed_sub_events, 1);
    assert_eq!(h.content.replies(&parent), vec!["5/1 final home_run".to_string()]);

    let record = h.store().load_processing(EVENT, &parent).await?;
    let sub_one = record.get(1).expect("sub-event 1 tracked");
    assert_eq!(sub_one.processed_actions, vec![0, 1]);
    assert!(sub_one.complete);
    let sub_zero = record.get(0).expect("sub-event 0 kept");
    assert!(sub_zero.complete);
    assert!(sub_zero.processed_actions.is_empty());
    assert!(record.get(2).is_some());
    Ok(())
}

#[tokio::test]
async fn resume_index_never_moves_backwards() -> Result<()> {
    init_tracing();
    let h = harness();
    let parent = h.content.seed("per-event", "body");
    let inning = |index: u32| sub_event(index, "top", true, json!([]), json!({"eventType": "field_out"}));

    let forward = snapshot("t1", vec![inning(0), inning(1), inning(2), inning(3)]);
    let first = h.ctx.processor.scan(EVENT, &parent, &forward, TeamRole::Home).await?;
    assert_eq!(first.resume_index, 3);

    // A provider correction that only carries earlier sub-events.
    let rewound = snapshot("t2", vec![inning(0), inning(1)]);
    let second = h.ctx.processor.scan(EVENT, &parent, &rewound, TeamRole::Home).await?;
    assert_eq!(second.resume_index, 3);

    let extended = snapshot("t3", vec![inning(0), inning(1), inning(2), inning(3), inning(4)]);
    let third = h.ctx.processor.scan(EVENT, &parent, &extended, TeamRole::Home).await?;
    assert_eq!(third.resume_index, 4);
    assert_eq!(third.completed_sub_events, 1);
    Ok(())
}

#[tokio::test]
async fn failed_notification_is_alerted_and_not_retried() -> Result<()> {
    init_tracing();
    let h = harness();
    let parent = h.content.seed("per-event", "body");
    let snap = snapshot(
        "t1",
        vec![sub_event(0, "bottom", false, json!([action(0, "home_run")]), json!({}))],
    );

    h.content.fail_replies(true);
    let first = h.ctx.processor.scan(EVENT, &parent, &snap, TeamRole::Home).await?;
    assert_eq!(first.failed, 1);
    assert_eq!(h.alerts.count_containing("notification for sub-event 0"), 1);

    h.content.fail_replies(false);
    let second = h.ctx.processor.scan(EVENT, &parent, &snap, TeamRole::Home).await?;
    assert_eq!(second.published + second.failed, 0);
    assert!(h.content.replies(&parent).is_empty());
    assert_eq!(h.telemetry.snapshot().notifications_failed, 1);
    Ok(())
}
