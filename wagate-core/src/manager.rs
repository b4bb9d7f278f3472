// ABOUTME: SessionManager - the one object external collaborators hold.
// ABOUTME: Wires config, supervisor, dispatcher, event bus and health log together.

use crate::clock::{Clock, Timers, TokioClock};
use crate::config::Config;
use crate::dispatcher::{OutboundDispatcher, SessionControl};
use crate::error::SessionResult;
use crate::events::{EventBus, EventKind, SessionEvent, Subscription};
use crate::health::{HealthLog, HealthStats};
use crate::message::OutboundResult;
use crate::qr::QrPayload;
use crate::runtime::RuntimeStatus;
use crate::supervisor::{ConnectionSupervisor, ReinitOutcome, StartOutcome};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use wagate_transport::TransportRegistry;

const BUS_CAPACITY: usize = 256;

pub struct SessionManager {
    config: Arc<Config>,
    supervisor: ConnectionSupervisor,
    dispatcher: OutboundDispatcher,
    bus: EventBus,
    health: Option<HealthLog>,
    _health_subscription: Option<Subscription>,
}

impl SessionManager {
    pub fn new(config: Config, registry: TransportRegistry) -> Result<Self> {
        Self::with_clock(config, registry, Arc::new(TokioClock))
    }

    pub fn with_clock(config: Config, registry: TransportRegistry, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = Arc::new(config);
        let bus = EventBus::new(BUS_CAPACITY);
        let timers = Timers::new(Arc::clone(&clock));
        let supervisor = ConnectionSupervisor::new(Arc::clone(&config), registry, bus.clone(), timers);
        let dispatcher = OutboundDispatcher::new(
            Arc::new(supervisor.clone()) as Arc<dyn SessionControl>,
            clock,
            &config.recovery,
        );

        let (health, health_subscription) = if config.health.enabled {
            let log = HealthLog::open(&config.health_db())?;
            let status_source = supervisor.clone();
            let subscription = log.attach(&bus, move || status_source.runtime_status().consecutive_failures);
            (Some(log), Some(subscription))
        } else {
            (None, None)
        };

        tracing::info!(
            primary = %config.session.primary,
            fallback = ?config.session.fallback_kind(),
            data_dir = %config.data_dir().display(),
            "Session manager ready"
        );

        Ok(Self {
            config,
            supervisor,
            dispatcher,
            bus,
            health,
            _health_subscription: health_subscription,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    // Lifecycle

    pub async fn start_session(&self) -> SessionResult<StartOutcome> {
        self.supervisor.start().await
    }

    pub async fn stop_session(&self) {
        self.supervisor.stop().await
    }

    pub async fn force_logout(&self) {
        self.supervisor.force_logout().await
    }

    pub async fn restart_session(&self, wipe_credentials: bool) -> ReinitOutcome {
        self.supervisor.restart(wipe_credentials).await
    }

    // Messaging

    pub async fn send_message(&self, destination: &str, body: &str) -> SessionResult<OutboundResult> {
        self.dispatcher.send(destination, body).await
    }

    pub async fn send_media(
        &self,
        destination: &str,
        path: &Path,
        caption: Option<&str>,
    ) -> SessionResult<OutboundResult> {
        self.dispatcher.send_media(destination, path, caption).await
    }

    pub async fn is_registered(&self, number: &str) -> SessionResult<bool> {
        self.dispatcher.is_registered(number).await
    }

    // Observation

    pub fn is_ready(&self) -> bool {
        self.supervisor.is_ready()
    }

    pub fn latest_qr(&self) -> Option<Arc<QrPayload>> {
        self.supervisor.latest_qr()
    }

    pub fn runtime_status(&self) -> RuntimeStatus {
        self.supervisor.runtime_status()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, handler)
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.stream()
    }

    pub fn health_log(&self) -> Option<&HealthLog> {
        self.health.as_ref()
    }

    /// Health summary, or None when the health log is disabled
    pub fn health_stats(&self, days: u32) -> Result<Option<HealthStats>> {
        self.health.as_ref().map(|log| log.stats(days)).transpose()
    }
}
