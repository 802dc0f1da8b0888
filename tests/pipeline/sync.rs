use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use matchday::{PatchOp, RefreshPolicy, Synchronizer, Telemetry};
use serde_json::json;

use crate::support::helpers::{action, document, init_tracing, sub_event};
use crate::support::mock_provider::ScriptedProvider;

const EVENT: u64 = 9;
const T0: &str = "20240401_230000";
const T1: &str = "20240401_230100";
const T2: &str = "20240401_230200";

fn always_refresh() -> RefreshPolicy {
    RefreshPolicy::within(Duration::ZERO)
}

fn setup() -> (Arc<ScriptedProvider>, Arc<Telemetry>, Synchronizer) {
    init_tracing();
    let provider = ScriptedProvider::new();
    let telemetry = Arc::new(Telemetry::default());
    let sync = Synchronizer::new(provider.clone(), telemetry.clone());
    (provider, telemetry, sync)
}

#[tokio::test]
async fn patch_stream_converges_to_full_document() -> Result<()> {
    let (provider, telemetry, sync) = setup();

    let doc_t0 = document("P", vec![]);
    let doc_t1 = document(
        "I",
        vec![sub_event(0, "top", false, json!([action(0, "ball")]), json!({}))],
    );
    let doc_t2 = document(
        "I",
        vec![
            sub_event(
                0,
                "top",
                true,
                json!([action(0, "ball"), action(1, "strikeout")]),
                json!({"eventType": "strikeout"}),
            ),
            sub_event(1, "top", false, json!([]), json!({})),
        ],
    );

    provider.publish_revision(EVENT, T0, doc_t0);
    let first = sync.get(EVENT, always_refresh()).await?;
    assert_eq!(first.token().as_str(), T0);

    provider.publish_revision(EVENT, T1, doc_t1.clone());
    provider.add_diff(
        EVENT,
        T0,
        T1,
        vec![
            PatchOp::replace("/gameData/status/statusCode", json!("I")),
            PatchOp::add(
                "/liveData/plays/allPlays/0",
                json!({
                    "about": {"atBatIndex": 0, "halfInning": "top", "isComplete": false},
                    "playEvents": [],
                    "result": {},
                }),
            ),
            PatchOp::add("/liveData/plays/allPlays/0/playEvents/0", action(0, "ball")),
        ],
    );
    let second = sync.get(EVENT, always_refresh()).await?;
    assert_eq!(second.token().as_str(), T1);
    assert_eq!(second.document(), &doc_t1);

    provider.publish_revision(EVENT, T2, doc_t2.clone());
    provider.add_diff(
        EVENT,
        T1,
        T2,
        vec![
            PatchOp::replace("/liveData/plays/allPlays/0/about/isComplete", json!(true)),
            PatchOp::add(
                "/liveData/plays/allPlays/0/playEvents/1",
                action(1, "strikeout"),
            ),
            PatchOp::replace(
                "/liveData/plays/allPlays/0/result",
                json!({"eventType": "strikeout"}),
            ),
            PatchOp::replace(
                "/liveData/plays/allPlays/1",
                json!({
                    "about": {"atBatIndex": 1, "halfInning": "top", "isComplete": false},
                    "playEvents": [],
                    "result": {},
                }),
            ),
        ],
    );
    let third = sync.get(EVENT, always_refresh()).await?;
    assert_eq!(third.token().as_str(), T2);
    assert_eq!(third.document(), &doc_t2);

    // Earlier handles still see the revision they were given.
    assert_eq!(first.document(), &document("P", vec![]));
    assert_eq!(provider.snapshot_fetches(EVENT), 1);
    let counters = telemetry.snapshot();
    assert_eq!(counters.patches_applied, 2);
    assert_eq!(counters.full_fetches, 1);
    Ok(())
}

#[tokio::test]
async fn divergent_token_triggers_single_full_fetch_without_diff() -> Result<()> {
    let (provider, telemetry, sync) = setup();
    provider.publish_revision(EVENT, T0, document("I", vec![]));
    sync.get(EVENT, always_refresh()).await?;

    provider.publish_revision(EVENT, T2, document("F", vec![]));
    provider.override_history(EVENT, &[T1, T2]);

    let refreshed = sync.get(EVENT, always_refresh()).await?;
    assert_eq!(refreshed.token().as_str(), T2);
    assert_eq!(provider.diff_calls(EVENT), 0);
    assert_eq!(provider.snapshot_fetches(EVENT), 2);
    assert_eq!(telemetry.snapshot().divergences, 1);
    Ok(())
}

#[tokio::test]
async fn rejected_patch_falls_back_to_full_fetch() -> Result<()> {
    let (provider, telemetry, sync) = setup();
    provider.publish_revision(EVENT, T0, document("I", vec![]));
    sync.get(EVENT, always_refresh()).await?;

    let doc_t1 = document(
        "I",
        vec![sub_event(0, "top", false, json!([]), json!({}))],
    );
    provider.publish_revision(EVENT, T1, doc_t1.clone());
    // Index 3 of an empty list would leave a gap.
    provider.add_diff(
        EVENT,
        T0,
        T1,
        vec![
            PatchOp::replace("/gameData/status/statusCode", json!("F")),
            PatchOp::add("/liveData/plays/allPlays/3", json!({})),
        ],
    );

    let refreshed = sync.get(EVENT, always_refresh()).await?;
    assert_eq!(refreshed.document(), &doc_t1);
    assert_eq!(provider.diff_calls(EVENT), 1);
    assert_eq!(provider.snapshot_fetches(EVENT), 2);
    assert_eq!(telemetry.snapshot().patch_fallbacks, 1);
    Ok(())
}

#[tokio::test]
async fn fresh_cache_is_served_without_provider_calls() -> Result<()> {
    let (provider, _telemetry, sync) = setup();
    provider.publish_revision(EVENT, T0, document("I", vec![]));

    let policy = RefreshPolicy::within(Duration::from_secs(60));
    let first = sync.get(EVENT, policy).await?;
    let second = sync.get(EVENT, policy).await?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(provider.history_calls(EVENT), 0);
    assert_eq!(provider.snapshot_fetches(EVENT), 1);

    // Oversized diffs come back as whole documents.
    provider.publish_revision(EVENT, T1, document("F", vec![]));
    provider.add_full_diff(EVENT, T0, T1, document("F", vec![]));
    let refreshed = sync.get(EVENT, always_refresh()).await?;
    assert_eq!(refreshed.token().as_str(), T1);
    assert_eq!(provider.snapshot_fetches(EVENT), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_refresh() -> Result<()> {
    let (provider, _telemetry, sync) = setup();
    provider.publish_revision(EVENT, T0, document("I", vec![]));
    let sync = Arc::new(sync);

    let policy = RefreshPolicy::within(Duration::from_secs(60));
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let sync = sync.clone();
            tokio::spawn(async move { sync.get(EVENT, policy).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await??.token().as_str(), T0);
    }
    assert_eq!(provider.snapshot_fetches(EVENT), 1);
    Ok(())
}
