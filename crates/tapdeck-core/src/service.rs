// ── Payment service façade ──
//
// The only entry point external callers use. Owns the event bus, the
// authoritative `ConnectionStatus`, the onboarding gate, both
// connection controllers, and the single in-flight session slot.
// Starting a new session cancels the previous one and awaits its
// completion before the new one emits its first event.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tapdeck_hw::{CardReaderService, DiscoveryMethod, SoftwareUpdateEvent, UpdateKind};

use crate::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::config::PaymentsConfig;
use crate::connection::ReaderConnectionController;
use crate::error::CoreError;
use crate::events::{EventBus, PaymentEvent, PaymentEventStream};
use crate::known_readers::KnownReaderStore;
use crate::model::{
    CancellationSource, ConnectionResult, ConnectionStatus, Order, PaymentOutcome, SessionKind,
};
use crate::onboarding::{OnboardingGate, OnboardingViewModel, Readiness, ReadinessProvider};
use crate::payment::PaymentSessionOrchestrator;
use crate::preflight::PreflightController;

// ── Connection status handle ─────────────────────────────────────────

/// The single mutation path for [`ConnectionStatus`].
///
/// Constructed only by the façade and handed to the preflight
/// controller; no other component writes the status.
#[derive(Clone)]
pub(crate) struct StatusHandle {
    tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl StatusHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn current(&self) -> ConnectionStatus {
        self.tx.borrow().clone()
    }

    pub(crate) fn set(&self, status: ConnectionStatus) {
        debug!(?status, "connection status");
        self.tx.send_replace(status);
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}

// ── Software update monitor ──────────────────────────────────────────

/// Whether a reader software update is currently installing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UpdateMonitorState {
    Idle,
    Installing { kind: UpdateKind, progress: f32 },
}

/// Normalize the port's update broadcast onto a watch channel so the
/// orchestrator can queue payments behind an in-progress update. The
/// subscription is established at façade construction, before any
/// session can start.
fn spawn_update_monitor(
    mut events: broadcast::Receiver<SoftwareUpdateEvent>,
) -> watch::Receiver<UpdateMonitorState> {
    let (tx, rx) = watch::channel(UpdateMonitorState::Idle);
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SoftwareUpdateEvent::Started { kind, .. }) => {
                    let _ = tx.send(UpdateMonitorState::Installing {
                        kind,
                        progress: 0.0,
                    });
                }
                Ok(SoftwareUpdateEvent::Installing { kind, progress }) => {
                    let _ = tx.send(UpdateMonitorState::Installing { kind, progress });
                }
                Ok(SoftwareUpdateEvent::Completed | SoftwareUpdateEvent::Failed(_)) => {
                    let _ = tx.send(UpdateMonitorState::Idle);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "update monitor lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    rx
}

// ── Session slot ─────────────────────────────────────────────────────

struct SessionGuard {
    kind: SessionKind,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Marks the session finished when the owning call returns, whatever
/// path it takes out.
struct SessionDoneGuard {
    done: watch::Sender<bool>,
}

impl Drop for SessionDoneGuard {
    fn drop(&mut self) {
        let _ = self.done.send(true);
    }
}

// ── Façade ───────────────────────────────────────────────────────────

/// Card-present payment service.
///
/// Cheaply cloneable via `Arc`; construct once per merchant site and
/// share. Must be created inside a Tokio runtime (it spawns the
/// software-update monitor task).
#[derive(Clone)]
pub struct CardPaymentService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    bus: EventBus,
    status: StatusHandle,
    gate: OnboardingGate,
    preflight: PreflightController,
    orchestrator: PaymentSessionOrchestrator,
    port: Arc<dyn CardReaderService>,
    analytics: Arc<dyn AnalyticsSink>,
    session: Mutex<Option<SessionGuard>>,
    config: PaymentsConfig,
}

impl CardPaymentService {
    pub fn new(
        port: Arc<dyn CardReaderService>,
        readiness: Arc<dyn ReadinessProvider>,
        known_readers: Arc<dyn KnownReaderStore>,
        analytics: Arc<dyn AnalyticsSink>,
        config: PaymentsConfig,
    ) -> Self {
        let bus = EventBus::new();
        let status = StatusHandle::new();
        let update_state = spawn_update_monitor(port.software_update_events());

        let bluetooth = ReaderConnectionController::new(
            DiscoveryMethod::BluetoothScan,
            Arc::clone(&port),
            Arc::clone(&known_readers),
            bus.clone(),
            Arc::clone(&analytics),
            config.store_admin_url.clone(),
        );
        let built_in = ReaderConnectionController::new(
            DiscoveryMethod::BuiltIn,
            Arc::clone(&port),
            Arc::clone(&known_readers),
            bus.clone(),
            Arc::clone(&analytics),
            config.store_admin_url.clone(),
        );
        let preflight =
            PreflightController::new(Arc::clone(&port), status.clone(), bluetooth, built_in);
        let orchestrator = PaymentSessionOrchestrator::new(
            Arc::clone(&port),
            bus.clone(),
            Arc::clone(&analytics),
            config.clone(),
            update_state,
        );

        Self {
            inner: Arc::new(ServiceInner {
                bus,
                status,
                gate: OnboardingGate::new(readiness),
                preflight,
                orchestrator,
                port,
                analytics,
                session: Mutex::new(None),
                config,
            }),
        }
    }

    // ── Public operations ────────────────────────────────────────────

    /// Discover and connect a reader reachable via `method`.
    ///
    /// Reuses a matching connection, disconnects a mismatched one.
    /// Cancellation (by the merchant or by a superseding session)
    /// resolves to [`ConnectionResult::Canceled`], never an error.
    pub async fn connect_reader(
        &self,
        method: DiscoveryMethod,
    ) -> Result<ConnectionResult, CoreError> {
        let (cancel, _done) = self.begin_session(SessionKind::Connection).await;
        if !self.ensure_ready(&cancel).await? {
            self.inner.bus.idle();
            return Ok(ConnectionResult::Canceled(CancellationSource::Onboarding));
        }
        self.inner
            .preflight
            .attempt_connection(method, &cancel, true)
            .await
    }

    /// Collect a card-present payment for `order`.
    ///
    /// Runs onboarding → preflight → collection → capture. Cancelling
    /// at any suspension point resolves to
    /// [`PaymentOutcome::Cancellation`] within this same call.
    pub async fn collect_payment(
        &self,
        order: &Order,
        method: DiscoveryMethod,
    ) -> Result<PaymentOutcome, CoreError> {
        let (cancel, _done) = self.begin_session(SessionKind::Payment).await;
        if !self.ensure_ready(&cancel).await? {
            self.inner.bus.idle();
            return Ok(PaymentOutcome::Cancellation);
        }
        self.inner
            .orchestrator
            .collect_payment(order, method, &self.inner.preflight, &cancel)
            .await
    }

    /// Cancel the in-flight payment session, if any. No-op otherwise.
    pub async fn cancel_payment(&self) {
        let slot = self.inner.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.kind == SessionKind::Payment {
                debug!("cancelling in-flight payment session");
                session.cancel.cancel();
            }
        }
    }

    /// Disconnect the current reader. Best-effort; also cancels any
    /// in-flight session first.
    pub async fn disconnect_reader(&self) {
        self.supersede_session().await;

        self.inner.status.set(ConnectionStatus::Disconnecting);
        if let Err(error) = self.inner.port.disconnect().await {
            warn!(error = %error, "disconnect failed (best-effort)");
        }
        self.inner.status.set(ConnectionStatus::Disconnected);
        self.inner.bus.idle();
        self.inner.analytics.track(
            AnalyticsEvent::ReaderDisconnected,
            json!({ "site_id": self.inner.config.site_id }),
        );
        info!("reader disconnected");
    }

    /// Re-run the onboarding readiness check unless already ready.
    /// Called by the presentation layer after the merchant resolves an
    /// onboarding block.
    pub async fn refresh_onboarding(&self) -> Result<(), CoreError> {
        self.inner.gate.refresh_if_necessary().await
    }

    // ── Streams ──────────────────────────────────────────────────────

    /// Replay-latest stream of payment events. New subscribers
    /// immediately observe the current event.
    pub fn payment_events(&self) -> PaymentEventStream {
        self.inner.bus.subscribe()
    }

    /// Lossless feed of every event transition, in publish order.
    pub fn events(&self) -> broadcast::Receiver<PaymentEvent> {
        self.inner.bus.feed()
    }

    /// Replay-latest stream of the authoritative connection status.
    pub fn connected_reader(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Readiness changes from the onboarding gate (`None` until first
    /// checked).
    pub fn readiness_changed(&self) -> watch::Receiver<Option<Readiness>> {
        self.inner.gate.readiness_changed()
    }

    // ── Session management ───────────────────────────────────────────

    /// Claim the single in-flight session slot: cancel the previous
    /// session and await its completion, then install a new one.
    async fn begin_session(&self, kind: SessionKind) -> (CancellationToken, SessionDoneGuard) {
        let mut slot = self.inner.session.lock().await;
        if let Some(previous) = slot.take() {
            debug!(superseded = ?previous.kind, starting = ?kind, "superseding in-flight session");
            previous.cancel.cancel();
            let mut done = previous.done;
            while !*done.borrow_and_update() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        }

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        *slot = Some(SessionGuard {
            kind,
            cancel: cancel.clone(),
            done: done_rx,
        });
        (cancel, SessionDoneGuard { done: done_tx })
    }

    /// Cancel and await any in-flight session without starting a new
    /// one.
    async fn supersede_session(&self) {
        let mut slot = self.inner.session.lock().await;
        if let Some(previous) = slot.take() {
            debug!(kind = ?previous.kind, "cancelling in-flight session");
            previous.cancel.cancel();
            let mut done = previous.done;
            while !*done.borrow_and_update() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Mandatory before every connection and payment attempt. Publishes
    /// the onboarding screen and suspends until the site becomes ready.
    /// Returns `false` when the wait was cancelled.
    async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<bool, CoreError> {
        match self.inner.gate.check_readiness().await? {
            Readiness::Ready => Ok(true),
            Readiness::NotReady(reason) => {
                info!(?reason, "site is not ready for card-present payments");
                self.inner
                    .bus
                    .publish(PaymentEvent::ShowOnboarding(OnboardingViewModel {
                        reason,
                        admin_url: self.inner.config.store_admin_url.clone(),
                    }));
                Ok(self.inner.gate.wait_until_ready(cancel).await)
            }
        }
    }
}
