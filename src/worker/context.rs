use crate::processor::EventProcessor;
use crate::provider::{ContentApi, Renderer};
use crate::runtime::alerts::Alerter;
use crate::runtime::config::CoreConfig;
use crate::runtime::telemetry::Telemetry;
use crate::snapshot::Synchronizer;
use crate::store::ProgressStore;
use crate::supervisor::board::EventBoard;
use std::sync::Arc;

/// Everything a lifecycle worker shares with its siblings for the day.
pub struct WorkerContext {
    pub config: Arc<CoreConfig>,
    pub synchronizer: Arc<Synchronizer>,
    pub store: ProgressStore,
    pub content: Arc<dyn ContentApi>,
    pub renderer: Arc<dyn Renderer>,
    pub processor: Arc<EventProcessor>,
    pub alerts: Alerter,
    pub telemetry: Arc<Telemetry>,
    pub board: Arc<EventBoard>,
}

pub struct WorkerContextParams {
    pub config: Arc<CoreConfig>,
    pub synchronizer: Arc<Synchronizer>,
    pub store: ProgressStore,
    pub content: Arc<dyn ContentApi>,
    pub renderer: Arc<dyn Renderer>,
    pub alerts: Alerter,
    pub telemetry: Arc<Telemetry>,
    pub board: Arc<EventBoard>,
}

impl WorkerContext {
    pub fn new(params: WorkerContextParams) -> Self {
        let WorkerContextParams {
            config,
            synchronizer,
            store,
            content,
            renderer,
            alerts,
            telemetry,
            board,
        } = params;

        let processor = Arc::new(EventProcessor::new(
            store.clone(),
            content.clone(),
            renderer.clone(),
            alerts.clone(),
            telemetry.clone(),
            config.rules().clone(),
        ));

        Self {
            config,
            synchronizer,
            store,
            content,
            renderer,
            processor,
            alerts,
            telemetry,
            board,
        }
    }
}
