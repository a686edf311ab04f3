//! Scriptable in-process reader service.
//!
//! Plays the role of the vendor SDK for the demo binary and the
//! integration tests: discovery batches, connection outcomes, firmware
//! updates, card prompts, and capture results are all driven by a
//! [`SimScript`] assembled through [`SimulatedReaderService::builder`].
//! Unscripted operations take the happy path, so a default-built
//! service completes a payment end-to-end.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CancellationOrigin, DeviceError, ServiceError};
use crate::reader::{
    CardInputMethods, DiscoveryMethod, PaymentIntent, PaymentParameters, PaymentReceipt, Reader,
    ReaderEvent,
};
use crate::update::{SoftwareUpdateEvent, UpdateKind};
use crate::{CardReaderService, DiscoveryEvent};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

// ── Script model ─────────────────────────────────────────────────────

/// One scripted outcome for a `connect` call.
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// Connect cleanly.
    Succeed,
    /// Run a firmware update first. Mandatory updates complete before
    /// the call returns; optional updates keep installing in the
    /// background until [`SimulatedReaderService::complete_update`].
    SucceedAfterUpdate { kind: UpdateKind },
    /// The update fails and so does the connection.
    FailUpdate {
        error: DeviceError,
        battery_level: Option<f32>,
    },
    /// Plain connection failure.
    Fail(DeviceError),
}

/// One scripted outcome for a `collect_payment_method` call.
#[derive(Debug, Clone)]
pub enum CollectScript {
    /// Prompt for a card, then suspend until the test presents one
    /// ([`SimulatedReaderService::present_card`]) or the payment is
    /// cancelled.
    AwaitCard {
        input_methods: CardInputMethods,
        messages: Vec<String>,
    },
    /// Prompt and approve without waiting.
    Approve { input_methods: CardInputMethods },
    /// Prompt, then fail with the given code.
    Fail {
        input_methods: CardInputMethods,
        error: DeviceError,
    },
}

/// One scripted outcome for a `capture_payment` call.
#[derive(Debug, Clone)]
pub enum CaptureScript {
    Succeed,
    Fail(DeviceError),
    /// Suspend until [`SimulatedReaderService::release_capture`]; a
    /// cancel arriving meanwhile is refused (capture already sent).
    HoldThenSucceed,
}

/// Full behavior script. Empty queues fall back to the happy path.
#[derive(Debug, Clone, Default)]
pub struct SimScript {
    /// Reader sets announced by discovery, in order.
    pub discovery_batches: Vec<Vec<Reader>>,
    /// Terminal discovery failure announced after the batches.
    pub discovery_failure: Option<DeviceError>,
    pub connect: VecDeque<ConnectScript>,
    pub collect: VecDeque<CollectScript>,
    pub capture: VecDeque<CaptureScript>,
}

// ── Signals between test hooks and in-flight operations ──────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CollectSignal {
    #[default]
    Pending,
    CardPresented,
    Cancelled,
}

struct SimState {
    script: SimScript,
    connected: Option<Reader>,
    discovery_tx: Option<mpsc::UnboundedSender<DiscoveryEvent>>,
    collecting: bool,
    capturing: bool,
}

/// Scriptable [`CardReaderService`] implementation.
pub struct SimulatedReaderService {
    state: Mutex<SimState>,
    update_tx: broadcast::Sender<SoftwareUpdateEvent>,
    collect_signal: watch::Sender<CollectSignal>,
    update_release: watch::Sender<bool>,
    capture_release: watch::Sender<bool>,
}

impl SimulatedReaderService {
    pub fn builder() -> SimBuilder {
        SimBuilder::default()
    }

    pub fn new(script: SimScript) -> Arc<Self> {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (collect_signal, _) = watch::channel(CollectSignal::Pending);
        let (update_release, _) = watch::channel(false);
        let (capture_release, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(SimState {
                script,
                connected: None,
                discovery_tx: None,
                collecting: false,
                capturing: false,
            }),
            update_tx,
            collect_signal,
            update_release,
            capture_release,
        })
    }

    // ── Test hooks ───────────────────────────────────────────────────

    /// Present a card to an in-flight `AwaitCard` collection.
    pub fn present_card(&self) {
        let _ = self.collect_signal.send(CollectSignal::CardPresented);
    }

    /// Let a backgrounded optional update finish installing.
    pub fn complete_update(&self) {
        let _ = self.update_release.send(true);
    }

    /// Release a `HoldThenSucceed` capture.
    pub fn release_capture(&self) {
        let _ = self.capture_release.send(true);
    }

    /// The reader the service currently considers connected.
    pub fn connected_reader(&self) -> Option<Reader> {
        self.lock_state().connected.clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn run_update(&self, kind: UpdateKind) {
        let cancel = CancellationToken::new();
        let _ = self.update_tx.send(SoftwareUpdateEvent::Started {
            kind,
            cancel: cancel.clone(),
        });
        for progress in [0.25_f32, 0.5, 0.75] {
            let _ = self
                .update_tx
                .send(SoftwareUpdateEvent::Installing { kind, progress });
            tokio::task::yield_now().await;
        }
        match kind {
            UpdateKind::Mandatory => {
                let _ = self.update_tx.send(SoftwareUpdateEvent::Completed);
            }
            UpdateKind::Optional => {
                // Finish in the background once the hook releases it.
                let update_tx = self.update_tx.clone();
                let mut release = self.update_release.subscribe();
                tokio::spawn(async move {
                    while !*release.borrow() {
                        if release.changed().await.is_err() {
                            return;
                        }
                    }
                    let _ = update_tx.send(SoftwareUpdateEvent::Installing {
                        kind,
                        progress: 1.0,
                    });
                    let _ = update_tx.send(SoftwareUpdateEvent::Completed);
                });
            }
        }
    }
}

#[async_trait]
impl CardReaderService for SimulatedReaderService {
    async fn start_discovery(
        &self,
        method: DiscoveryMethod,
    ) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>, ServiceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (batches, failure) = {
            let mut state = self.lock_state();
            state.discovery_tx = Some(tx.clone());
            (
                state.script.discovery_batches.clone(),
                state.script.discovery_failure.clone(),
            )
        };
        debug!(?method, batches = batches.len(), "sim discovery started");

        tokio::spawn(async move {
            for batch in batches {
                if tx.send(DiscoveryEvent::ReadersChanged(batch)).is_err() {
                    return;
                }
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
            }
            if let Some(error) = failure {
                let _ = tx.send(DiscoveryEvent::Failed(ServiceError::Discovery {
                    source: error,
                }));
            }
        });

        Ok(rx)
    }

    async fn cancel_discovery(&self) -> Result<(), ServiceError> {
        self.lock_state().discovery_tx = None;
        debug!("sim discovery cancelled");
        Ok(())
    }

    async fn connect(&self, reader: &Reader) -> Result<Reader, ServiceError> {
        let step = self
            .lock_state()
            .script
            .connect
            .pop_front()
            .unwrap_or(ConnectScript::Succeed);

        match step {
            ConnectScript::Succeed => {}
            ConnectScript::SucceedAfterUpdate { kind } => self.run_update(kind).await,
            ConnectScript::FailUpdate {
                error,
                battery_level,
            } => {
                let failure = ServiceError::SoftwareUpdate {
                    source: error,
                    battery_level,
                };
                let _ = self
                    .update_tx
                    .send(SoftwareUpdateEvent::Failed(failure.clone()));
                return Err(failure);
            }
            ConnectScript::Fail(error) => {
                return Err(ServiceError::Connection { source: error });
            }
        }

        let mut state = self.lock_state();
        if state.connected.is_some() {
            return Err(ServiceError::Connection {
                source: DeviceError::AlreadyConnectedToReader,
            });
        }
        state.connected = Some(reader.clone());
        debug!(reader = %reader.id, "sim reader connected");
        Ok(reader.clone())
    }

    async fn disconnect(&self) -> Result<(), ServiceError> {
        let mut state = self.lock_state();
        if state.connected.take().is_none() {
            return Err(ServiceError::Disconnection {
                source: DeviceError::NotConnectedToReader,
            });
        }
        debug!("sim reader disconnected");
        Ok(())
    }

    fn software_update_events(&self) -> broadcast::Receiver<SoftwareUpdateEvent> {
        self.update_tx.subscribe()
    }

    async fn collect_payment_method(
        &self,
        parameters: &PaymentParameters,
        events: mpsc::UnboundedSender<ReaderEvent>,
    ) -> Result<PaymentIntent, ServiceError> {
        let step = {
            let mut state = self.lock_state();
            if state.connected.is_none() {
                return Err(ServiceError::PaymentMethodCollection {
                    source: DeviceError::NotConnectedToReader,
                });
            }
            state.collecting = true;
            state.script.collect.pop_front().unwrap_or(CollectScript::Approve {
                input_methods: CardInputMethods::all(),
            })
        };
        let _ = self.collect_signal.send(CollectSignal::Pending);

        let result = match step {
            CollectScript::Approve { input_methods } => {
                let _ = events.send(ReaderEvent::WaitingForInput(input_methods));
                tokio::task::yield_now().await;
                Ok(())
            }
            CollectScript::Fail {
                input_methods,
                error,
            } => {
                let _ = events.send(ReaderEvent::WaitingForInput(input_methods));
                tokio::task::yield_now().await;
                Err(error)
            }
            CollectScript::AwaitCard {
                input_methods,
                messages,
            } => {
                let _ = events.send(ReaderEvent::WaitingForInput(input_methods));
                for message in messages {
                    let _ = events.send(ReaderEvent::DisplayMessage(message));
                }
                let mut signal = self.collect_signal.subscribe();
                loop {
                    match *signal.borrow_and_update() {
                        CollectSignal::CardPresented => break Ok(()),
                        CollectSignal::Cancelled => {
                            break Err(DeviceError::CommandCancelled(CancellationOrigin::App));
                        }
                        CollectSignal::Pending => {}
                    }
                    if signal.changed().await.is_err() {
                        break Err(DeviceError::InternalServiceError);
                    }
                }
            }
        };
        self.lock_state().collecting = false;

        match result {
            Ok(()) => {
                let _ = events.send(ReaderEvent::CardRemovedAfterCapture);
                Ok(PaymentIntent {
                    id: uuid::Uuid::new_v4(),
                    amount: parameters.amount,
                    currency: parameters.currency.clone(),
                })
            }
            Err(source) => Err(ServiceError::PaymentMethodCollection { source }),
        }
    }

    async fn capture_payment(
        &self,
        intent: &PaymentIntent,
    ) -> Result<PaymentReceipt, ServiceError> {
        let step = {
            let mut state = self.lock_state();
            state.capturing = true;
            state.script.capture.pop_front().unwrap_or(CaptureScript::Succeed)
        };

        let result = match step {
            CaptureScript::Succeed => Ok(()),
            CaptureScript::Fail(error) => Err(error),
            CaptureScript::HoldThenSucceed => {
                let mut release = self.capture_release.subscribe();
                loop {
                    if *release.borrow_and_update() {
                        break Ok(());
                    }
                    if release.changed().await.is_err() {
                        break Err(DeviceError::InternalServiceError);
                    }
                }
            }
        };
        self.lock_state().capturing = false;

        match result {
            Ok(()) => Ok(PaymentReceipt {
                reference: uuid::Uuid::new_v4(),
                amount: intent.amount,
                currency: intent.currency.clone(),
                captured_at: chrono::Utc::now(),
            }),
            Err(source) => Err(ServiceError::PaymentCapture { source }),
        }
    }

    async fn cancel_payment(&self) -> Result<(), ServiceError> {
        let (collecting, capturing) = {
            let state = self.lock_state();
            (state.collecting, state.capturing)
        };
        if collecting {
            let _ = self.collect_signal.send(CollectSignal::Cancelled);
            return Ok(());
        }
        if capturing {
            debug!("cancel refused: capture already submitted");
        }
        // Capture already sent (or nothing in flight): the hardware
        // refuses the cancel.
        Err(ServiceError::PaymentCancellation {
            source: DeviceError::NoActivePaymentIntent,
        })
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Builder for [`SimulatedReaderService`].
#[derive(Debug, Default)]
pub struct SimBuilder {
    script: SimScript,
}

impl SimBuilder {
    /// Announce a single batch of discovered readers.
    pub fn discover_readers(mut self, readers: Vec<Reader>) -> Self {
        self.script.discovery_batches.push(readers);
        self
    }

    /// Fail discovery after any scripted batches.
    pub fn discovery_failure(mut self, error: DeviceError) -> Self {
        self.script.discovery_failure = Some(error);
        self
    }

    pub fn on_connect(mut self, step: ConnectScript) -> Self {
        self.script.connect.push_back(step);
        self
    }

    pub fn on_collect(mut self, step: CollectScript) -> Self {
        self.script.collect.push_back(step);
        self
    }

    pub fn on_capture(mut self, step: CaptureScript) -> Self {
        self.script.capture.push_back(step);
        self
    }

    pub fn build(self) -> Arc<SimulatedReaderService> {
        SimulatedReaderService::new(self.script)
    }
}
