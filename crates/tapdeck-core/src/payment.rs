// ── Payment session orchestrator ──
//
// Drives a single payment: validating order → preparing reader →
// waiting for input → processing → success/error. Recoverable failures
// become alerts with retry handles; cancellation is a result, never an
// error; at most one orchestrator runs per façade (session slot).

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tapdeck_hw::{
    CancellationOrigin, CardReaderService, DeviceError, DiscoveryMethod, PaymentIntent,
    PaymentParameters, PaymentReceipt, ReaderEvent, ServiceError,
};

use crate::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::config::PaymentsConfig;
use crate::currency;
use crate::error::CoreError;
use crate::events::{ActionHandle, AlertDetail, EventBus, PaymentRetryAction};
use crate::model::{ConnectionResult, Order, PaymentOutcome};
use crate::preflight::PreflightController;
use crate::retry::{RetryApproach, classify};
use crate::service::UpdateMonitorState;

/// Merchant responses routed back from payment alert handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentAction {
    RetryCollection,
    BackToCheckout,
    Dismiss,
    RetryCapture,
}

enum CollectFlow {
    Intent(PaymentIntent),
    Cancelled { on_reader: bool },
    Abandoned,
    Retry,
    Failed(CoreError),
}

enum CaptureFlow {
    Success(PaymentReceipt),
    Cancelled,
    RetryCollection,
    Failed(CoreError),
}

/// Whether a failed capture should be attempted again.
enum CaptureStep {
    Retry,
    Done(CaptureFlow),
}

pub(crate) struct PaymentSessionOrchestrator {
    port: Arc<dyn CardReaderService>,
    bus: EventBus,
    analytics: Arc<dyn AnalyticsSink>,
    config: PaymentsConfig,
    update_state: watch::Receiver<UpdateMonitorState>,
}

impl PaymentSessionOrchestrator {
    pub(crate) fn new(
        port: Arc<dyn CardReaderService>,
        bus: EventBus,
        analytics: Arc<dyn AnalyticsSink>,
        config: PaymentsConfig,
        update_state: watch::Receiver<UpdateMonitorState>,
    ) -> Self {
        Self {
            port,
            bus,
            analytics,
            config,
            update_state,
        }
    }

    pub(crate) async fn collect_payment(
        &self,
        order: &Order,
        method: DiscoveryMethod,
        preflight: &PreflightController,
        cancel: &CancellationToken,
    ) -> Result<PaymentOutcome, CoreError> {
        self.track(AnalyticsEvent::PaymentStarted, order);

        // ── Validating order ────────────────────────────────────────
        self.bus.alert(AlertDetail::ValidatingOrder);
        let total =
            match currency::validate_total(order.total, &order.currency, &self.config.currency) {
                Ok(total) => total,
                Err(error) => {
                    // Setup failure: terminal, never retried through the
                    // hardware layer.
                    self.bus.idle();
                    return Err(error);
                }
            };

        // ── Preparing reader ────────────────────────────────────────
        self.bus.alert(AlertDetail::PreparingForPayment);
        match preflight.attempt_connection(method, cancel, false).await? {
            ConnectionResult::Connected(_) => {}
            ConnectionResult::Canceled(source) => {
                debug!(%source, "payment cancelled while preparing reader");
                self.track(AnalyticsEvent::PaymentCancelled, order);
                self.bus.idle();
                return Ok(PaymentOutcome::Cancellation);
            }
        }

        // An optional reader update may still be installing; queue the
        // payment until it finishes rather than racing it.
        if !self.wait_for_update_idle(cancel).await {
            self.track(AnalyticsEvent::PaymentCancelled, order);
            self.bus.idle();
            return Ok(PaymentOutcome::Cancellation);
        }

        let parameters = PaymentParameters {
            amount: total,
            currency: order.currency.to_lowercase(),
            statement_description: self.config.statement_description.clone(),
        };

        // ── Waiting for input → processing ──────────────────────────
        loop {
            let intent = match self.collect_method(&parameters, cancel).await {
                CollectFlow::Intent(intent) => intent,
                CollectFlow::Cancelled { on_reader } => {
                    self.track(AnalyticsEvent::PaymentCancelled, order);
                    if on_reader {
                        self.bus.alert(AlertDetail::CancelledOnReader);
                    }
                    self.bus.idle();
                    return Ok(PaymentOutcome::Cancellation);
                }
                CollectFlow::Abandoned => {
                    self.track(AnalyticsEvent::PaymentCancelled, order);
                    self.bus.idle();
                    return Ok(PaymentOutcome::Cancellation);
                }
                CollectFlow::Retry => continue,
                CollectFlow::Failed(error) => {
                    self.bus.idle();
                    return Err(error);
                }
            };

            self.bus.alert(AlertDetail::Processing);
            match self.capture(&intent, cancel).await {
                CaptureFlow::Success(receipt) => {
                    self.track(AnalyticsEvent::PaymentSucceeded, order);
                    info!(order = %order.number, reference = %receipt.reference, "payment captured");
                    let bus = self.bus.clone();
                    self.bus.alert(AlertDetail::PaymentSuccess {
                        done: ActionHandle::new(move || bus.idle()),
                    });
                    return Ok(PaymentOutcome::Success(receipt));
                }
                CaptureFlow::Cancelled => {
                    self.track(AnalyticsEvent::PaymentCancelled, order);
                    self.bus.idle();
                    return Ok(PaymentOutcome::Cancellation);
                }
                CaptureFlow::RetryCollection => {}
                CaptureFlow::Failed(error) => {
                    self.bus.idle();
                    return Err(error);
                }
            }
        }
    }

    // ── Payment method collection ────────────────────────────────────

    async fn collect_method(
        &self,
        parameters: &PaymentParameters,
        cancel: &CancellationToken,
    ) -> CollectFlow {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let collect_fut = self.port.collect_payment_method(parameters, event_tx);
        tokio::pin!(collect_fut);

        let result = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    if let Err(error) = self.port.cancel_payment().await {
                        warn!(error = %error, "cancelling payment collection failed");
                    }
                    return CollectFlow::Cancelled { on_reader: false };
                }
                Some(event) = event_rx.recv() => self.handle_reader_event(event, cancel),
                result = &mut collect_fut => break result,
            }
        };

        match result {
            Ok(intent) => CollectFlow::Intent(intent),
            Err(error) if error.is_cancellation() => CollectFlow::Cancelled {
                on_reader: matches!(
                    error.device_error(),
                    DeviceError::CommandCancelled(CancellationOrigin::Reader)
                ),
            },
            Err(error) => self.collection_failed(error, cancel).await,
        }
    }

    fn handle_reader_event(&self, event: ReaderEvent, cancel: &CancellationToken) {
        match event {
            ReaderEvent::WaitingForInput(input_methods) => {
                self.analytics
                    .track(AnalyticsEvent::PaymentWaitingForInput, json!({}));
                let token = cancel.clone();
                self.bus.alert(AlertDetail::TapSwipeOrInsertCard {
                    input_methods,
                    cancel: ActionHandle::new(move || token.cancel()),
                });
            }
            // Surfaced verbatim; the orchestrator never inspects it.
            ReaderEvent::DisplayMessage(message) => {
                self.bus.alert(AlertDetail::DisplayReaderMessage { message });
            }
            ReaderEvent::CardRemovedAfterCapture => {
                self.bus.alert(AlertDetail::Processing);
            }
        }
    }

    async fn collection_failed(
        &self,
        error: ServiceError,
        cancel: &CancellationToken,
    ) -> CollectFlow {
        warn!(error = %error, "payment method collection failed");
        self.analytics.track(
            AnalyticsEvent::PaymentFailed,
            json!({ "error": error.to_string() }),
        );

        let (action_tx, mut action_rx) = mpsc::unbounded_channel();
        match classify(&error) {
            RetryApproach::DontRetry => {
                self.bus.alert(AlertDetail::PaymentErrorNonRetryable {
                    message: error.to_string(),
                    dismiss: action(&action_tx, PaymentAction::Dismiss),
                });
                match self.wait_action(&mut action_rx, cancel).await {
                    None => CollectFlow::Cancelled { on_reader: false },
                    Some(_) => CollectFlow::Failed(CoreError::Payment { source: error }),
                }
            }
            approach => {
                let retry_handle = action(&action_tx, PaymentAction::RetryCollection);
                let retry = if approach == RetryApproach::TryAnotherPaymentMethod {
                    PaymentRetryAction::TryAnotherPaymentMethod {
                        retry: retry_handle,
                    }
                } else {
                    PaymentRetryAction::TryAgain {
                        retry: retry_handle,
                    }
                };
                self.bus.alert(AlertDetail::PaymentError {
                    message: error.to_string(),
                    retry,
                    back_to_checkout: action(&action_tx, PaymentAction::BackToCheckout),
                });
                match self.wait_action(&mut action_rx, cancel).await {
                    None => CollectFlow::Cancelled { on_reader: false },
                    Some(PaymentAction::RetryCollection) => CollectFlow::Retry,
                    Some(_) => CollectFlow::Abandoned,
                }
            }
        }
    }

    // ── Capture ──────────────────────────────────────────────────────

    async fn capture(&self, intent: &PaymentIntent, cancel: &CancellationToken) -> CaptureFlow {
        loop {
            let capture_fut = self.port.capture_payment(intent);
            tokio::pin!(capture_fut);
            let mut cancel_attempted = false;

            let result = loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled(), if !cancel_attempted => {
                        cancel_attempted = true;
                        match self.port.cancel_payment().await {
                            Ok(()) => return CaptureFlow::Cancelled,
                            // Capture may already be on the wire; the
                            // refusal is reported and the capture result
                            // is awaited, never silently dropped.
                            Err(error) => warn!(
                                error = %error,
                                "cancel refused during capture, awaiting capture result"
                            ),
                        }
                    }
                    result = &mut capture_fut => break result,
                }
            };

            match result {
                Ok(receipt) => return CaptureFlow::Success(receipt),
                // The charge already went through; reporting an error
                // here would invite a double charge on retry.
                Err(error) if matches!(error.device_error(), DeviceError::OrderAlreadyPaid) => {
                    info!("order already paid, treating capture as success");
                    return CaptureFlow::Success(PaymentReceipt {
                        reference: intent.id,
                        amount: intent.amount,
                        currency: intent.currency.clone(),
                        captured_at: chrono::Utc::now(),
                    });
                }
                Err(error) => match self.capture_failed(error, cancel).await {
                    CaptureStep::Retry => {}
                    CaptureStep::Done(flow) => return flow,
                },
            }
        }
    }

    async fn capture_failed(&self, error: ServiceError, cancel: &CancellationToken) -> CaptureStep {
        warn!(error = %error, "payment capture failed");
        self.analytics.track(
            AnalyticsEvent::PaymentFailed,
            json!({ "error": error.to_string() }),
        );

        let (action_tx, mut action_rx) = mpsc::unbounded_channel();
        match classify(&error) {
            RetryApproach::TryAnotherPaymentMethod => {
                self.bus.alert(AlertDetail::PaymentError {
                    message: error.to_string(),
                    retry: PaymentRetryAction::TryAnotherPaymentMethod {
                        retry: action(&action_tx, PaymentAction::RetryCollection),
                    },
                    back_to_checkout: action(&action_tx, PaymentAction::BackToCheckout),
                });
                CaptureStep::Done(match self.wait_action(&mut action_rx, cancel).await {
                    None => CaptureFlow::Cancelled,
                    Some(PaymentAction::RetryCollection) => CaptureFlow::RetryCollection,
                    Some(_) => CaptureFlow::Cancelled,
                })
            }
            RetryApproach::DontRetry => {
                self.bus.alert(AlertDetail::PaymentErrorNonRetryable {
                    message: error.to_string(),
                    dismiss: action(&action_tx, PaymentAction::Dismiss),
                });
                let _ = self.wait_action(&mut action_rx, cancel).await;
                CaptureStep::Done(CaptureFlow::Failed(CoreError::PaymentCapture {
                    source: error,
                }))
            }
            // Capture-specific alert: the charge may retry without
            // restarting the whole payment.
            RetryApproach::TryAgain => {
                self.bus.alert(AlertDetail::PaymentCaptureError {
                    retry_capture: action(&action_tx, PaymentAction::RetryCapture),
                    dismiss: action(&action_tx, PaymentAction::Dismiss),
                });
                match self.wait_action(&mut action_rx, cancel).await {
                    None => CaptureStep::Done(CaptureFlow::Cancelled),
                    Some(PaymentAction::RetryCapture) => {
                        self.analytics
                            .track(AnalyticsEvent::PaymentCaptureRetried, json!({}));
                        self.bus.alert(AlertDetail::Processing);
                        CaptureStep::Retry
                    }
                    Some(_) => CaptureStep::Done(CaptureFlow::Failed(CoreError::PaymentCapture {
                        source: error,
                    })),
                }
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Wait for a merchant response; `None` means the session was
    /// cancelled first.
    async fn wait_action(
        &self,
        action_rx: &mut mpsc::UnboundedReceiver<PaymentAction>,
        cancel: &CancellationToken,
    ) -> Option<PaymentAction> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            action = action_rx.recv() => action,
        }
    }

    async fn wait_for_update_idle(&self, cancel: &CancellationToken) -> bool {
        // Let the monitor task drain update events queued during the
        // connection attempt before sampling its state.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        let mut rx = self.update_state.clone();
        loop {
            if matches!(*rx.borrow_and_update(), UpdateMonitorState::Idle) {
                return true;
            }
            debug!("queueing payment behind in-progress reader software update");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }

    fn track(&self, event: AnalyticsEvent, order: &Order) {
        self.analytics.track(
            event,
            json!({
                "order_id": order.id,
                "amount": order.total.to_string(),
                "currency": order.currency,
            }),
        );
    }
}

fn action(tx: &mpsc::UnboundedSender<PaymentAction>, action: PaymentAction) -> ActionHandle {
    let tx = tx.clone();
    ActionHandle::new(move || {
        let _ = tx.send(action);
    })
}
