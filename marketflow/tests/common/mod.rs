//! Shared fixtures for the engine integration tests: configurable test
//! steps and a snapshot-collecting hub.

// Shared across test binaries; not every binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use marketflow_domain::entities::operation::OperationState;
use marketflow_domain::entities::snapshot::OperationSnapshot;
use marketflow_domain::error::OrchestratorError;
use marketflow_domain::services::pipeline_step::PipelineStep;
use marketflow_domain::services::update_hub::UpdateHub;
use marketflow_domain::value_objects::data_spec::DataRequirement;

/// Step whose behavior is scripted per test: sleep, fail N times, fail
/// always, or panic. Records every execute call.
#[derive(Debug)]
pub struct ScriptedStep {
    id: String,
    deps: Vec<String>,
    delay: Duration,
    fail_first: u32,
    fail_always: bool,
    retryable: bool,
    panics: bool,
    required_inputs: Vec<DataRequirement>,
    pub calls: Arc<AtomicU32>,
    pub execution_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl ScriptedStep {
    pub fn succeeding(id: &str, deps: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            delay: Duration::from_millis(10),
            fail_first: 0,
            fail_always: false,
            retryable: false,
            panics: false,
            required_inputs: Vec::new(),
            calls: Arc::new(AtomicU32::new(0)),
            execution_log: None,
        }
    }

    pub fn failing(id: &str, deps: &[&str], retryable: bool) -> Self {
        Self {
            fail_always: true,
            retryable,
            ..Self::succeeding(id, deps)
        }
    }

    /// Fails the first `n` calls with a retryable error, then succeeds.
    pub fn flaky(id: &str, n: u32) -> Self {
        Self {
            fail_first: n,
            retryable: true,
            ..Self::succeeding(id, &[])
        }
    }

    pub fn panicking(id: &str) -> Self {
        Self {
            panics: true,
            ..Self::succeeding(id, &[])
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_required_input(mut self, requirement: DataRequirement) -> Self {
        self.required_inputs.push(requirement);
        self
    }

    pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.execution_log = Some(log);
        self
    }
}

#[async_trait]
impl PipelineStep for ScriptedStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn required_inputs(&self) -> Vec<DataRequirement> {
        self.required_inputs.clone()
    }

    async fn execute(&self, _state: Arc<OperationState>) -> Result<(), OrchestratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(log) = &self.execution_log {
            log.lock().push(self.id.clone());
        }
        tokio::time::sleep(self.delay).await;

        if self.panics {
            panic!("scripted panic in {}", self.id);
        }
        if self.fail_always {
            return Err(OrchestratorError::execution(
                format!("{} failed deliberately", self.id),
                self.retryable,
            ));
        }
        if call <= self.fail_first {
            return Err(OrchestratorError::execution(
                format!("{} transient failure on call {}", self.id, call),
                true,
            ));
        }
        Ok(())
    }
}

/// Hub that records every published snapshot.
#[derive(Default)]
pub struct CollectingHub {
    pub events: Mutex<Vec<(String, String, String, OperationSnapshot)>>,
}

impl CollectingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshots_for(&self, operation_id: &str) -> Vec<OperationSnapshot> {
        self.events
            .lock()
            .iter()
            .filter(|(_, key, _, _)| key == operation_id)
            .map(|(_, _, _, snapshot)| snapshot.clone())
            .collect()
    }
}

impl UpdateHub for CollectingHub {
    fn broadcast_update(
        &self,
        event_type: &str,
        key: &str,
        status: &str,
        payload: &OperationSnapshot,
    ) {
        self.events.lock().push((
            event_type.to_string(),
            key.to_string(),
            status.to_string(),
            payload.clone(),
        ));
    }
}
