//! Hand-written doubles for the pipeline's collaborators.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::memory::MemoryCacheStore;
use crate::cache::{CacheError, CacheResult, CacheStore, DecisionCache};
use crate::errors::UpstreamError;
use crate::evaluation::{
    AuditEvent, EvaluationContext, EvaluationOrchestrator, EvaluationSettings, FlagDefinition,
    TargetingDecision,
};
use crate::events::{EventPublisher, EventQueue, PublishError};
use crate::upstream::{FlagDefinitionClient, TargetingClient};

pub fn definition(enabled_default: bool, has_targeting_rules: bool) -> FlagDefinition {
    FlagDefinition {
        key: "new_checkout".to_string(),
        enabled_default,
        has_targeting_rules,
    }
}

pub struct StubFlagClient {
    response: Result<FlagDefinition, UpstreamError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubFlagClient {
    pub fn returning(definition: FlagDefinition) -> Self {
        Self {
            response: Ok(definition),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: UpstreamError) -> Self {
        Self {
            response: Err(error),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlagDefinitionClient for StubFlagClient {
    async fn fetch_flag_definition(&self, _flag_key: &str) -> Result<FlagDefinition, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.clone()
    }
}

pub struct StubTargetingClient {
    response: Result<TargetingDecision, UpstreamError>,
    calls: AtomicUsize,
}

impl StubTargetingClient {
    pub fn matching(matched: bool) -> Self {
        Self {
            response: Ok(TargetingDecision { matched }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: UpstreamError) -> Self {
        Self {
            response: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetingClient for StubTargetingClient {
    async fn fetch_targeting_decision(
        &self,
        _flag_key: &str,
        _context: &EvaluationContext,
    ) -> Result<TargetingDecision, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

/// Every operation fails, like a Redis that went away.
pub struct UnavailableCacheStore;

#[async_trait]
impl CacheStore for UnavailableCacheStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Connection("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Connection("connection refused".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "unavailable"
    }
}

#[derive(Default)]
pub struct RecordingQueue {
    bodies: Mutex<Vec<String>>,
}

impl RecordingQueue {
    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventQueue for RecordingQueue {
    async fn send(&self, body: String) -> Result<(), PublishError> {
        if let Ok(mut bodies) = self.bodies.lock() {
            bodies.push(body);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FailingQueue {
    attempts: AtomicUsize,
}

impl FailingQueue {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventQueue for FailingQueue {
    async fn send(&self, _body: String) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PublishError::Delivery("queue does not exist".to_string()))
    }
}

/// An orchestrator over stub collaborators plus handles to inspect them.
pub struct Harness {
    pub orchestrator: EvaluationOrchestrator,
    pub flags: Arc<StubFlagClient>,
    pub targeting: Arc<StubTargetingClient>,
    pub events: mpsc::Receiver<AuditEvent>,
}

pub fn harness(flags: StubFlagClient, targeting: StubTargetingClient) -> Harness {
    harness_with_store(flags, targeting, Arc::new(MemoryCacheStore::new()))
}

pub fn harness_with_store(
    flags: StubFlagClient,
    targeting: StubTargetingClient,
    store: Arc<dyn CacheStore>,
) -> Harness {
    let flags = Arc::new(flags);
    let targeting = Arc::new(targeting);
    let (sender, events) = mpsc::channel(64);

    let orchestrator = EvaluationOrchestrator::new(
        flags.clone(),
        targeting.clone(),
        DecisionCache::new(store),
        EventPublisher::from_sender(sender),
        EvaluationSettings::default(),
    );

    Harness {
        orchestrator,
        flags,
        targeting,
        events,
    }
}
