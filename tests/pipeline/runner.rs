use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use matchday::supervisor::posting_date;
use matchday::{Collaborators, CoreConfig, EventStatus, Runner};
use tokio::time::timeout;

use crate::support::helpers::{
    config_builder, document, home_event, init_tracing, wait_until, FlakyExecutor,
    RecordingAlertSink, TemplateRenderer,
};
use crate::support::mock_content::RecordingContentApi;
use crate::support::mock_provider::ScriptedProvider;

struct Fixture {
    provider: Arc<ScriptedProvider>,
    content: Arc<RecordingContentApi>,
    executor: Arc<FlakyExecutor>,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        Self {
            provider: ScriptedProvider::new(),
            content: RecordingContentApi::new(),
            executor: FlakyExecutor::in_memory(),
        }
    }

    fn runner(&self, config: CoreConfig) -> Result<Runner> {
        Runner::new(
            config,
            Collaborators {
                provider: self.provider.clone(),
                content: self.content.clone(),
                renderer: Arc::new(TemplateRenderer::default()),
                executor: self.executor.clone(),
                alerts: Arc::new(RecordingAlertSink::default()),
            },
        )
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_posts_today_and_stops_on_cancel() -> Result<()> {
    let fixture = Fixture::new();
    let config = config_builder().build()?;
    let today = posting_date(Utc::now(), config.utc_offset(), config.rollover_hour());
    let start = Utc::now() - chrono::Duration::hours(1);
    fixture
        .provider
        .set_schedule(today, vec![home_event(5, start, EventStatus::Final)]);
    fixture.provider.publish_revision(5, "t0", document("F", vec![]));

    let runner = Arc::new(fixture.runner(config)?);
    let token = runner.cancellation_token();
    let task = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run().await })
    };

    wait_until(Duration::from_secs(5), || {
        runner
            .board()
            .entries()
            .first()
            .is_some_and(|entry| entry.flags.content)
    })
    .await?;
    assert_eq!(fixture.content.publish_calls(), 1);
    assert!(runner.telemetry().snapshot().content_published >= 1);

    token.cancel();
    timeout(Duration::from_secs(2), task)
        .await
        .expect("runner should stop on cancellation")??;
    assert_eq!(fixture.content.publish_calls(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unusable_store_stops_the_runner_with_an_error() -> Result<()> {
    let fixture = Fixture::new();
    let runner = fixture.runner(config_builder().build()?)?;
    fixture.executor.fail_matching("COUNT(*)", 1);

    let err = timeout(Duration::from_secs(2), runner.run())
        .await
        .expect("fatal error should end the run")
        .expect_err("store failure is fatal");
    let message = format!("{err:#}");
    assert!(message.contains("progress store"), "unexpected error: {message}");
    assert!(runner.cancellation_token().is_cancelled());
    Ok(())
}

#[tokio::test]
async fn store_that_cannot_be_opened_rejects_startup() -> Result<()> {
    let fixture = Fixture::new();
    fixture.executor.fail_matching("CREATE TABLE", 1);

    let err = match fixture.runner(config_builder().build()?) {
        Ok(_) => panic!("runner should not start without a store"),
        Err(err) => err,
    };
    assert!(format!("{err:#}").contains("failed to open progress store"));
    Ok(())
}

#[tokio::test]
async fn cancelled_before_start_returns_cleanly() -> Result<()> {
    let fixture = Fixture::new();
    let runner = fixture.runner(config_builder().build()?)?;
    runner.cancellation_token().cancel();

    timeout(Duration::from_secs(2), runner.run())
        .await
        .expect("cancelled runner should return")?;
    assert_eq!(fixture.content.publish_calls(), 0);
    Ok(())
}
