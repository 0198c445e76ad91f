//! Development-time stand-in for the backend.

use crate::config::RuntimeConfig;
use crate::error::TransportError;
use crate::protocol::{PageConfig, RenderConfig};
use crate::transport::ProtocolTransport;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

type Responder = dyn Fn(&RenderConfig) -> Result<RenderConfig, TransportError> + Send + Sync;

/// Answers render requests locally, optionally after a delay.
pub struct MockTransport {
    respond: Box<Responder>,
    delay: Duration,
    calls: AtomicU64,
}

impl MockTransport {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&RenderConfig) -> Result<RenderConfig, TransportError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    pub fn from_fixture(fixture: MockFixture) -> Self {
        Self::new(move |request| fixture.respond(request))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of requests answered so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ProtocolTransport for MockTransport {
    async fn render(&self, request: &RenderConfig) -> Result<RenderConfig, TransportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        debug!(event = ?request.event, "answering render request from mock");
        (self.respond)(request)
    }
}

/// Canned responses keyed by `"component/operation"`.
#[derive(Debug, Clone, Deserialize)]
pub struct MockFixture {
    pub initial: PageConfig,
    #[serde(default)]
    pub responses: IndexMap<String, PageConfig>,
}

impl MockFixture {
    pub fn load(path: &Path) -> Result<Self, TransportError> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Initial fetches get `initial`; known events get their canned page;
    /// other events echo the page the client sent. An event with neither
    /// has no answer.
    pub fn respond(&self, request: &RenderConfig) -> Result<RenderConfig, TransportError> {
        let protocol = match &request.event {
            Some(event) => {
                let key = format!("{}/{}", event.component, event.operation);
                self.responses
                    .get(&key)
                    .or(request.protocol.as_ref())
                    .ok_or(TransportError::NoMock(key))?
            }
            None => request.protocol.as_ref().unwrap_or(&self.initial),
        };

        Ok(RenderConfig {
            scenario: request.scenario.clone(),
            in_params: request.in_params.clone(),
            protocol: Some(protocol.clone()),
            event: None,
        })
    }
}

/// The mock replaces the real transport only when one is supplied and
/// either `force_mock` is set or the runtime's mock switch is on.
pub fn select_transport(
    real: Arc<dyn ProtocolTransport>,
    mock: Option<Arc<dyn ProtocolTransport>>,
    force_mock: bool,
    config: &RuntimeConfig,
) -> Arc<dyn ProtocolTransport> {
    match mock {
        Some(mock) if force_mock || config.use_mock => {
            info!(force_mock, "using mock render transport");
            mock
        }
        _ => real,
    }
}
