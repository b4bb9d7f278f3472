// ABOUTME: Connection supervisor - owns the session state machine and the single live transport.
// ABOUTME: Single-flight start and guarded reinit, failover, close-reason recovery and the watchdog.

use crate::clock::{Clock, Timers};
use crate::close_reason::CloseReason;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::{SessionError, SessionResult};
use crate::events::{EventBus, ReadyInfo, SessionEvent, StatusUpdate};
use crate::health::CLOSE_SOURCE;
use crate::metrics;
use crate::normalizer;
use crate::qr::{PngQrRenderer, QrPairingFlow, QrPayload, QrRejection, QrRenderer};
use crate::runtime::{ConnectionState, RuntimeStatus, SessionRuntime};
use anyhow::Context;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use wagate_transport::{
    CloseInfo, ConnectionUpdate, EventStream, SocketState, TransportAdapter, TransportEvent, TransportKind,
    TransportRegistry,
};

type Flight<T> = Shared<BoxFuture<'static, T>>;

/// Result of `start`, shared by every concurrent caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A transport was initialized; pairing or open follows on its event stream
    Connecting { transport: TransportKind },
    AlreadyActive { transport: TransportKind },
    /// A newer teardown or reinit replaced this attempt before it finished
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReinitOutcome {
    Completed { transport: TransportKind },
    Failed { error: SessionError },
    /// Dropped by the cooldown, the restart throttle, or an operator stop
    Suppressed,
    Superseded,
}

impl ReinitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReinitOutcome::Completed { .. } => "completed",
            ReinitOutcome::Failed { .. } => "failed",
            ReinitOutcome::Suppressed => "suppressed",
            ReinitOutcome::Superseded => "superseded",
        }
    }
}

/// Which credentials a reinit deletes before reconnecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeScope {
    Transport(TransportKind),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReinitRequest {
    pub reason: String,
    pub wipe: Option<WipeScope>,
    pub bypass_cooldown: bool,
}

impl ReinitRequest {
    /// Cooldown-guarded reinit that keeps credentials
    pub fn guarded(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            wipe: None,
            bypass_cooldown: false,
        }
    }
}

struct ActiveTransport {
    generation: u64,
    kind: TransportKind,
    adapter: Arc<dyn TransportAdapter>,
    pump: JoinHandle<()>,
}

struct Inner {
    state: ConnectionState,
    runtime: SessionRuntime,
    active: Option<ActiveTransport>,
    /// Bumped by every teardown and start; events and connects from older generations are discarded
    generation: u64,
    start_flight: Option<Flight<SessionResult<StartOutcome>>>,
    reinit_flight: Option<(u64, Flight<ReinitOutcome>)>,
    next_reinit_id: u64,
    last_operator_restart: Option<Instant>,
    /// Set by an operator stop or logout; guarded reinits stay quiet until the next start
    halted: bool,
    watchdog: Option<JoinHandle<()>>,
}

struct SupervisorCore {
    config: Arc<Config>,
    registry: TransportRegistry,
    credentials: CredentialStore,
    bus: EventBus,
    qr: QrPairingFlow,
    timers: Timers,
    inner: Mutex<Inner>,
}

/// Cheap to clone; every clone drives the same session
#[derive(Clone)]
pub struct ConnectionSupervisor {
    core: Arc<SupervisorCore>,
}

impl ConnectionSupervisor {
    pub fn new(config: Arc<Config>, registry: TransportRegistry, bus: EventBus, timers: Timers) -> Self {
        let renderer = Arc::new(PngQrRenderer {
            min_size: config.recovery.qr_size,
        });
        Self::with_renderer(config, registry, bus, timers, renderer)
    }

    pub fn with_renderer(
        config: Arc<Config>,
        registry: TransportRegistry,
        bus: EventBus,
        timers: Timers,
        renderer: Arc<dyn QrRenderer>,
    ) -> Self {
        let qr = QrPairingFlow::new(Arc::clone(timers.clock()), renderer, config.recovery.qr_throttle());
        let credentials = CredentialStore::new(config.credentials_dir());
        Self {
            core: Arc::new(SupervisorCore {
                config,
                registry,
                credentials,
                bus,
                qr,
                timers,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    runtime: SessionRuntime::default(),
                    active: None,
                    generation: 0,
                    start_flight: None,
                    reinit_flight: None,
                    next_reinit_id: 0,
                    last_operator_restart: None,
                    halted: false,
                    watchdog: None,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.core.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.core.timers.clock()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.core.credentials
    }

    // =========================================================================
    // Read side
    // =========================================================================

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_ready(&self) -> bool {
        let inner = self.lock();
        inner.state == ConnectionState::Connected && inner.active.is_some()
    }

    pub fn latest_qr(&self) -> Option<Arc<QrPayload>> {
        self.core.qr.latest()
    }

    pub fn runtime_status(&self) -> RuntimeStatus {
        let inner = self.lock();
        RuntimeStatus {
            ready: inner.state == ConnectionState::Connected && inner.active.is_some(),
            state: inner.state,
            active_transport: inner.active.as_ref().map(|a| a.kind),
            consecutive_failures: inner.runtime.consecutive_failures,
            stale: inner.runtime.stale,
            last_ready_at: inner.runtime.last_ready_at,
            reinit_in_flight: inner.runtime.reinit_in_flight.is_some(),
            last_reason: inner.runtime.last_reason.clone(),
            qr_attempts: inner.runtime.qr_attempts,
        }
    }

    pub fn active_adapter(&self) -> Option<(TransportKind, Arc<dyn TransportAdapter>)> {
        self.lock()
            .active
            .as_ref()
            .map(|a| (a.kind, Arc::clone(&a.adapter)))
    }

    /// Connected, socket usable, and an authenticated identity reported
    pub async fn deep_health_check(&self) -> bool {
        let adapter = {
            let inner = self.lock();
            if inner.state != ConnectionState::Connected {
                return false;
            }
            match inner.active.as_ref() {
                Some(active) => Arc::clone(&active.adapter),
                None => return false,
            }
        };
        let probe = adapter.probe().await;
        if !probe.is_healthy() {
            tracing::debug!(socket = ?probe.socket, identity = ?probe.identity, "Health probe failed");
        }
        probe.is_healthy()
    }

    pub fn record_send_success(&self) {
        self.lock().runtime.consecutive_failures = 0;
    }

    /// Count a failed send; returns the consecutive failure count
    pub fn record_send_failure(&self) -> u32 {
        let mut inner = self.lock();
        inner.runtime.consecutive_failures += 1;
        inner.runtime.consecutive_failures
    }

    fn publish_status(&self, source: &str, reason: Option<String>) {
        let update = {
            let inner = self.lock();
            StatusUpdate {
                state: inner.state,
                ready: inner.state == ConnectionState::Connected,
                transport: inner.active.as_ref().map(|a| a.kind),
                reason,
                source: source.to_string(),
                at: self.clock().wall(),
            }
        };
        // Handlers may read status back, so the lock is released first
        self.core.bus.publish(SessionEvent::Status(update));
    }

    // =========================================================================
    // Start
    // =========================================================================

    /// Bring the session up. Concurrent callers share one attempt and its outcome.
    pub async fn start(&self) -> SessionResult<StartOutcome> {
        enum Join {
            Start(Flight<SessionResult<StartOutcome>>),
            Reinit(Flight<ReinitOutcome>),
        }

        let join = {
            let mut inner = self.lock();
            inner.halted = false;
            if let Some(active) = inner.active.as_ref() {
                if inner.state.has_live_session() {
                    return Ok(StartOutcome::AlreadyActive { transport: active.kind });
                }
            }
            if let Some(flight) = inner.start_flight.as_ref() {
                tracing::debug!("Joining in-flight start");
                Join::Start(flight.clone())
            } else if let Some((_, flight)) = inner.reinit_flight.as_ref() {
                tracing::debug!("Start joining in-flight reinit");
                Join::Reinit(flight.clone())
            } else {
                inner.generation += 1;
                inner.state = ConnectionState::Initializing;
                let generation = inner.generation;

                let this = self.clone();
                let task = tokio::spawn(async move { this.run_start(generation).await });
                let flight = async move {
                    task.await
                        .unwrap_or_else(|e| Err(SessionError::TransportUnavailable(format!("start task failed: {}", e))))
                }
                .boxed()
                .shared();
                inner.start_flight = Some(flight.clone());
                drop(inner);
                self.publish_status("start", None);
                Join::Start(flight)
            }
        };

        // Armed before the first open so a failed connect is retried
        self.start_watchdog();

        match join {
            Join::Start(flight) => flight.await,
            Join::Reinit(flight) => match flight.await {
                ReinitOutcome::Completed { transport } => Ok(StartOutcome::Connecting { transport }),
                ReinitOutcome::Failed { error } => Err(error),
                ReinitOutcome::Suppressed | ReinitOutcome::Superseded => Ok(StartOutcome::Superseded),
            },
        }
    }

    async fn run_start(&self, generation: u64) -> SessionResult<StartOutcome> {
        tracing::info!("Starting session");
        let result = self.connect_with_failover(generation, "start").await;
        self.lock().start_flight = None;
        result
    }

    /// Try the primary transport, then the fallback
    async fn connect_with_failover(&self, generation: u64, source: &'static str) -> SessionResult<StartOutcome> {
        let mut last_error = String::from("no transports configured");
        for kind in self.core.config.session.transport_order() {
            if self.lock().generation != generation {
                return Ok(StartOutcome::Superseded);
            }
            match self.open_transport(kind).await {
                Ok((adapter, events)) => return Ok(self.install(generation, kind, adapter, events).await),
                Err(e) => {
                    tracing::warn!(transport = %kind, error = %format!("{:#}", e), "Transport failed to initialize");
                    metrics::record_error("transport_unavailable");
                    last_error = format!("{}: {:#}", kind, e);
                }
            }
        }

        let current = {
            let mut inner = self.lock();
            let current = inner.generation == generation;
            if current {
                inner.state = ConnectionState::Disconnected;
            }
            current
        };
        if current {
            self.publish_status(source, Some(last_error.clone()));
        }
        tracing::error!(error = %last_error, "No transport could be initialized");
        Err(SessionError::TransportUnavailable(last_error))
    }

    async fn open_transport(&self, kind: TransportKind) -> anyhow::Result<(Arc<dyn TransportAdapter>, EventStream)> {
        let settings = self.core.config.transport_settings(kind);
        let adapter = self
            .core
            .registry
            .create(kind.as_str(), &settings)
            .with_context(|| format!("Failed to create {} transport", kind))?;
        let dir = self.core.credentials.ensure(kind).await?;
        let events = adapter
            .connect(&dir)
            .await
            .with_context(|| format!("Failed to connect {} transport", kind))?;
        Ok((adapter, events))
    }

    /// Make a freshly connected adapter the active one, unless a newer generation exists
    async fn install(
        &self,
        generation: u64,
        kind: TransportKind,
        adapter: Arc<dyn TransportAdapter>,
        events: EventStream,
    ) -> StartOutcome {
        let installed = {
            let mut inner = self.lock();
            if inner.generation == generation {
                let this = self.clone();
                let pump = tokio::spawn(async move { this.pump(generation, kind, events).await });
                if let Some(previous) = inner.active.replace(ActiveTransport {
                    generation,
                    kind,
                    adapter: Arc::clone(&adapter),
                    pump,
                }) {
                    previous.adapter.detach();
                    previous.pump.abort();
                }
                if inner.state != ConnectionState::Connected {
                    inner.state = ConnectionState::Initializing;
                }
                true
            } else {
                false
            }
        };

        if !installed {
            tracing::info!(transport = %kind, "Discarding superseded connection");
            adapter.detach();
            if let Err(e) = adapter.close().await {
                tracing::warn!(transport = %kind, error = %e, "Failed to close superseded transport");
            }
            return StartOutcome::Superseded;
        }

        tracing::info!(transport = %kind, generation, "Transport initialized");
        StartOutcome::Connecting { transport: kind }
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    async fn pump(self, generation: u64, kind: TransportKind, mut events: EventStream) {
        while let Some(event) = events.next().await {
            if !self.is_current(generation) {
                tracing::debug!(transport = %kind, generation, "Ignoring event from stale transport");
                break;
            }
            self.handle_event(generation, kind, event).await;
        }
        tracing::debug!(transport = %kind, generation, "Transport event stream ended");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().active.as_ref().is_some_and(|a| a.generation == generation)
    }

    /// Apply `f` only if `generation` is still the active transport
    fn update_if_current<R>(&self, generation: u64, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        let mut inner = self.lock();
        if inner.active.as_ref().is_some_and(|a| a.generation == generation) {
            Some(f(&mut inner))
        } else {
            None
        }
    }

    async fn handle_event(&self, generation: u64, kind: TransportKind, event: TransportEvent) {
        match event {
            TransportEvent::Connection(ConnectionUpdate::Connecting) => {
                let changed = self.update_if_current(generation, |inner| {
                    if inner.state != ConnectionState::Initializing {
                        inner.state = ConnectionState::Initializing;
                        true
                    } else {
                        false
                    }
                });
                if changed == Some(true) {
                    self.publish_status("connection.update", None);
                }
            }
            TransportEvent::Connection(ConnectionUpdate::Open { identity }) => {
                self.on_open(generation, kind, identity);
            }
            TransportEvent::Connection(ConnectionUpdate::Closed(info)) => {
                self.on_close(generation, kind, info);
            }
            TransportEvent::PairingCode(code) => self.on_pairing_code(generation, &code),
            TransportEvent::Inbound(payload) => {
                let messages = normalizer::normalize(&payload, self.clock().wall());
                if messages.is_empty() {
                    return;
                }
                self.promote_on_traffic(generation, kind);
                for message in messages {
                    tracing::debug!(from = %message.address_canonical, id = %message.id, "Inbound message");
                    metrics::record_message_received();
                    self.core.bus.publish(SessionEvent::Message(Arc::new(message)));
                }
            }
            TransportEvent::CredentialsUpdated(creds) => {
                if let Err(e) = self.core.credentials.save(kind, &creds).await {
                    tracing::warn!(transport = %kind, error = %format!("{:#}", e), "Failed to persist credentials");
                    metrics::record_error("credentials");
                }
            }
        }
    }

    fn on_open(&self, generation: u64, kind: TransportKind, identity: Option<String>) {
        let now = self.clock().wall();
        let opened = self.update_if_current(generation, |inner| {
            inner.state = ConnectionState::Connected;
            inner.runtime.consecutive_failures = 0;
            inner.runtime.stale = false;
            inner.runtime.last_ready_at = Some(now);
        });
        if opened.is_none() {
            return;
        }

        tracing::info!(transport = %kind, identity = ?identity, "Session connected");
        self.core.qr.clear();
        metrics::set_connected(true);
        self.core.bus.publish(SessionEvent::Ready(ReadyInfo {
            transport: kind,
            identity,
            at: now,
        }));
        self.publish_status("connection.update", None);
        self.start_watchdog();
    }

    /// Inbound traffic proves the session is live even without an open event
    fn promote_on_traffic(&self, generation: u64, kind: TransportKind) {
        let promoted = self.update_if_current(generation, |inner| {
            if inner.state == ConnectionState::Connected {
                return false;
            }
            inner.state = ConnectionState::Connected;
            inner.runtime.stale = false;
            true
        });
        if promoted != Some(true) {
            return;
        }

        tracing::info!(transport = %kind, "Inbound traffic before open event, marking connected");
        self.core.qr.clear();
        metrics::set_connected(true);
        self.core.bus.publish(SessionEvent::Ready(ReadyInfo {
            transport: kind,
            identity: None,
            at: self.clock().wall(),
        }));
        self.publish_status("messages.upsert", None);
        self.start_watchdog();
    }

    fn on_pairing_code(&self, generation: u64, code: &str) {
        if !self.is_current(generation) {
            return;
        }
        match self.core.qr.prepare(code) {
            Ok(payload) => {
                // Committed under the state lock; teardown swaps the generation before clearing the slot
                let current = self.update_if_current(generation, |inner| {
                    self.core.qr.commit(&payload);
                    inner.state = ConnectionState::PairingWaiting;
                    inner.runtime.qr_attempts += 1;
                });
                if current.is_none() {
                    tracing::debug!(generation, "Dropping pairing code from superseded transport");
                    return;
                }
                metrics::record_qr_published();
                self.core.bus.publish(SessionEvent::Qr(payload));
                self.publish_status("qr", None);
            }
            Err(QrRejection::Throttled { .. }) => {}
            Err(rejection) => {
                tracing::warn!(?rejection, "Pairing code not published");
            }
        }
    }

    fn on_close(&self, generation: u64, kind: TransportKind, info: CloseInfo) {
        let reason = CloseReason::classify(&info);
        let plan = reason.plan(&self.core.config.recovery);
        let closed = self.update_if_current(generation, |inner| {
            inner.state = ConnectionState::Disconnected;
            inner.runtime.stale = true;
        });
        if closed.is_none() {
            return;
        }

        tracing::warn!(
            transport = %kind,
            reason = reason.as_str(),
            detail = %info.describe(),
            delay_ms = plan.delay.as_millis() as u64,
            "Transport connection closed"
        );
        metrics::set_connected(false);
        if let Some(error) = reason.error() {
            metrics::record_error(error.kind());
        }
        self.publish_status(CLOSE_SOURCE, Some(format!("{}: {}", plan.reason, info.describe())));

        let this = self.clone();
        self.core.timers.after(plan.delay, "close-recovery", async move {
            if !this.is_current(generation) {
                tracing::debug!(reason = plan.reason, "Close recovery superseded");
                return;
            }
            if plan.force_logout {
                this.logout_and_wipe(plan.reason).await;
            }
            let request = ReinitRequest {
                reason: plan.reason.to_string(),
                wipe: plan.wipe_credentials.then_some(WipeScope::Transport(kind)),
                bypass_cooldown: false,
            };
            this.reinit(request).await;
        });
    }

    // =========================================================================
    // Reinit
    // =========================================================================

    /// Guarded reconnect: joins an in-flight reinit, honours the cooldown for repeated reasons
    pub async fn safe_reinit(&self, reason: &str) -> ReinitOutcome {
        self.reinit(ReinitRequest::guarded(reason)).await
    }

    pub async fn reinit(&self, request: ReinitRequest) -> ReinitOutcome {
        let flight = {
            let mut inner = self.lock();
            if let Some((_, flight)) = inner.reinit_flight.as_ref() {
                tracing::debug!(reason = %request.reason, "Joining in-flight reinit");
                flight.clone()
            } else {
                if !request.bypass_cooldown {
                    if inner.halted {
                        tracing::debug!(reason = %request.reason, "Session stopped, reinit suppressed");
                        return ReinitOutcome::Suppressed;
                    }
                    let now = self.clock().now();
                    let cooldown = self.core.config.recovery.reinit_cooldown();
                    let same_reason = inner.runtime.last_reason.as_deref() == Some(request.reason.as_str());
                    let within = inner
                        .runtime
                        .last_reinit_attempt
                        .is_some_and(|last| now.saturating_duration_since(last) <= cooldown);
                    if same_reason && within {
                        tracing::info!(reason = %request.reason, "Reinit suppressed by cooldown");
                        metrics::record_reinit(&request.reason, ReinitOutcome::Suppressed.label());
                        return ReinitOutcome::Suppressed;
                    }
                }
                if request.wipe == Some(WipeScope::All) {
                    inner.runtime.reset();
                }

                inner.next_reinit_id += 1;
                let id = inner.next_reinit_id;
                inner.halted = false;
                inner.runtime.reinit_in_flight = Some(id);
                inner.runtime.last_reinit_attempt = Some(self.clock().now());
                inner.runtime.last_reason = Some(request.reason.clone());

                let this = self.clone();
                let task = tokio::spawn(async move { this.run_reinit(id, request).await });
                let flight = async move {
                    task.await.unwrap_or_else(|e| ReinitOutcome::Failed {
                        error: SessionError::TransportUnavailable(format!("reinit task failed: {}", e)),
                    })
                }
                .boxed()
                .shared();
                inner.reinit_flight = Some((id, flight.clone()));
                flight
            }
        };
        self.start_watchdog();
        flight.await
    }

    async fn run_reinit(&self, id: u64, request: ReinitRequest) -> ReinitOutcome {
        tracing::info!(reason = %request.reason, id, "Reinitializing session");
        let generation = self
            .teardown(ConnectionState::Reconnecting, "reinit", Some(request.reason.clone()), true)
            .await;

        if let Some(scope) = request.wipe {
            let wiped = match scope {
                WipeScope::Transport(kind) => self.core.credentials.wipe(kind).await,
                WipeScope::All => self.core.credentials.wipe_all().await,
            };
            if let Err(e) = wiped {
                tracing::warn!(error = %format!("{:#}", e), ?scope, "Failed to wipe credentials");
            }
        }

        let outcome = match self.connect_with_failover(generation, "reinit").await {
            Ok(StartOutcome::Connecting { transport }) | Ok(StartOutcome::AlreadyActive { transport }) => {
                ReinitOutcome::Completed { transport }
            }
            Ok(StartOutcome::Superseded) => ReinitOutcome::Superseded,
            Err(error) => ReinitOutcome::Failed { error },
        };
        metrics::record_reinit(&request.reason, outcome.label());
        tracing::info!(reason = %request.reason, outcome = outcome.label(), "Reinit finished");

        let mut inner = self.lock();
        if inner.reinit_flight.as_ref().is_some_and(|(flight_id, _)| *flight_id == id) {
            inner.reinit_flight = None;
        }
        if inner.runtime.reinit_in_flight == Some(id) {
            inner.runtime.reinit_in_flight = None;
        }
        outcome
    }

    /// Operator restart: throttled, bypasses the reinit cooldown, optionally wipes all credentials
    pub async fn restart(&self, wipe_credentials: bool) -> ReinitOutcome {
        {
            let mut inner = self.lock();
            let now = self.clock().now();
            let throttle = self.core.config.recovery.restart_throttle();
            if let Some(last) = inner.last_operator_restart {
                if now.saturating_duration_since(last) < throttle {
                    tracing::info!("Operator restart throttled");
                    return ReinitOutcome::Suppressed;
                }
            }
            inner.last_operator_restart = Some(now);
        }
        self.reinit(ReinitRequest {
            reason: "operator-restart".to_string(),
            wipe: wipe_credentials.then_some(WipeScope::All),
            bypass_cooldown: true,
        })
        .await
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Detach the active transport and move to `target`; returns the new generation
    async fn teardown(
        &self,
        target: ConnectionState,
        source: &str,
        reason: Option<String>,
        grace: bool,
    ) -> u64 {
        let (active, generation) = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.state = target;
            (inner.active.take(), inner.generation)
        };
        self.core.qr.clear();
        metrics::set_connected(false);
        self.publish_status(source, reason);

        if let Some(active) = active {
            self.release(active, grace).await;
        }
        generation
    }

    /// Close only an open socket, then always detach
    async fn release(&self, active: ActiveTransport, grace: bool) {
        let kind = active.kind;
        if active.adapter.probe().await.socket == SocketState::Open {
            if let Err(e) = active.adapter.close().await {
                tracing::warn!(transport = %kind, error = %e, "Failed to close transport");
            }
            if grace {
                self.clock().sleep(self.core.config.recovery.close_grace()).await;
            }
        }
        active.adapter.detach();
        active.pump.abort();
        tracing::debug!(transport = %kind, generation = active.generation, "Transport released");
    }

    /// Close the session without wiping credentials
    pub async fn stop(&self) {
        {
            let mut inner = self.lock();
            inner.halted = true;
            if let Some(watchdog) = inner.watchdog.take() {
                watchdog.abort();
            }
        }
        tracing::info!("Stopping session");
        self.teardown(ConnectionState::Disconnected, "stop", None, true).await;
    }

    /// Unlink the device, wipe all credentials and reset the runtime. Never fails.
    pub async fn force_logout(&self) {
        {
            let mut inner = self.lock();
            inner.halted = true;
            if let Some(watchdog) = inner.watchdog.take() {
                watchdog.abort();
            }
        }
        self.logout_and_wipe("force-logout").await;
    }

    async fn logout_and_wipe(&self, source: &str) {
        tracing::warn!(source, "Forcing logout");
        let active = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.active.take()
        };

        if let Some(active) = active {
            if active.adapter.supports_logout() {
                if let Err(e) = active.adapter.logout().await {
                    tracing::warn!(transport = %active.kind, error = %e, "Logout failed, continuing teardown");
                }
            }
            self.release(active, false).await;
        }

        if let Err(e) = self.core.credentials.wipe_all().await {
            tracing::warn!(error = %format!("{:#}", e), "Failed to wipe credentials during logout");
        }

        {
            let mut inner = self.lock();
            inner.runtime.reset();
            inner.runtime.reinit_in_flight = inner.reinit_flight.as_ref().map(|(id, _)| *id);
            inner.state = ConnectionState::LoggedOut;
        }
        self.core.qr.clear();
        metrics::set_connected(false);
        self.publish_status(source, Some("logged out".to_string()));
    }

    // =========================================================================
    // Watchdog
    // =========================================================================

    fn start_watchdog(&self) {
        let session = &self.core.config.session;
        if !session.watchdog {
            return;
        }
        let mut inner = self.lock();
        if inner.watchdog.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let weak: Weak<SupervisorCore> = Arc::downgrade(&self.core);
        let handle = self.core.timers.every(session.watchdog_interval(), "watchdog", move || {
            let weak = weak.clone();
            async move {
                let Some(core) = weak.upgrade() else {
                    return false;
                };
                let supervisor = ConnectionSupervisor { core };
                supervisor.watchdog_tick().await
            }
        });
        inner.watchdog = Some(handle);
    }

    /// One watchdog pass; false stops the watchdog
    async fn watchdog_tick(&self) -> bool {
        let (state, halted) = {
            let inner = self.lock();
            (inner.state, inner.halted)
        };
        if halted || state == ConnectionState::LoggedOut {
            return false;
        }

        match state {
            ConnectionState::Connected => {
                if self.deep_health_check().await {
                    return true;
                }
                let degraded = {
                    let mut inner = self.lock();
                    if inner.state == ConnectionState::Connected {
                        inner.state = ConnectionState::Degraded;
                        inner.runtime.stale = true;
                        true
                    } else {
                        false
                    }
                };
                if degraded {
                    tracing::warn!("Watchdog health check failed, session degraded");
                    metrics::set_connected(false);
                    self.publish_status("watchdog", Some("health check failed".to_string()));
                    self.spawn_reinit("watchdog");
                }
            }
            // A close whose reinit was suppressed leaves the session here
            ConnectionState::Degraded | ConnectionState::Disconnected => self.spawn_reinit("watchdog"),
            _ => {}
        }
        true
    }

    /// Fire-and-forget guarded reinit
    pub fn spawn_reinit(&self, reason: &'static str) {
        let this = self.clone();
        tokio::spawn(async move {
            this.safe_reinit(reason).await;
        });
    }
}
