// ── Payment event bus ──
//
// Single ordered stream of `PaymentEvent`s consumed by the presentation
// layer. Every component publishes here instead of calling UI code.
// Replay-latest semantics via `watch` (new subscribers immediately see
// the current event) plus a lossless `broadcast` feed for consumers
// that need every transition.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::trace;

use tapdeck_hw::{CardInputMethods, ReaderId};
use url::Url;

use crate::onboarding::OnboardingViewModel;

const FEED_CHANNEL_CAPACITY: usize = 256;

// ── Callback handles ─────────────────────────────────────────────────

/// A single action the presentation layer may take in response to an
/// alert: retry, cancel, dismiss, acknowledge. The Rust rendering of
/// the source system's closures-as-continuations — cloneable, callable
/// from any thread, routed back into the owning controller.
#[derive(Clone)]
pub struct ActionHandle(Arc<dyn Fn() + Send + Sync>);

impl ActionHandle {
    pub fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(action))
    }

    /// A handle that does nothing. Placeholder for informational alerts.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn invoke(&self) {
        (self.0)();
    }
}

impl fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActionHandle")
    }
}

/// Selection callback for the several-readers-found list.
#[derive(Clone)]
pub struct SelectReaderHandle(Arc<dyn Fn(ReaderId) + Send + Sync>);

impl SelectReaderHandle {
    pub fn new(action: impl Fn(ReaderId) + Send + Sync + 'static) -> Self {
        Self(Arc::new(action))
    }

    pub fn select(&self, reader_id: ReaderId) {
        (self.0)(reader_id);
    }
}

impl fmt::Debug for SelectReaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SelectReaderHandle")
    }
}

// ── Alert details ────────────────────────────────────────────────────

/// The retry affordance attached to a payment error alert.
#[derive(Debug, Clone)]
pub enum PaymentRetryAction {
    /// Restart the collection step with the same payment method.
    TryAgain { retry: ActionHandle },
    /// Restart collection so the customer can present another card.
    TryAnotherPaymentMethod { retry: ActionHandle },
}

/// A single addressable point in the flow requiring merchant awareness
/// or action, paired with the action(s) available at that point.
///
/// Three phases: discovery/connection, reader software update, payment.
#[derive(Debug, Clone)]
pub enum AlertDetail {
    // ── Discovery / connection ──────────────────────────────────────
    ScanningForReaders {
        cancel: ActionHandle,
    },
    ScanningFailed {
        message: String,
        close: ActionHandle,
    },
    /// Discovery cannot run because Bluetooth is off or unavailable.
    BluetoothRequired {
        message: String,
        close: ActionHandle,
    },
    /// A single eligible reader was found; connection starts
    /// immediately (single-reader environments skip selection).
    FoundReader {
        name: String,
    },
    ConnectingToReader,
    ConnectingFailed {
        message: String,
        retry: ActionHandle,
        cancel: ActionHandle,
    },
    ConnectingFailedNonRetryable {
        message: String,
        close: ActionHandle,
    },
    /// The store address must be completed in settings before any
    /// retry can succeed.
    ConnectingFailedUpdateAddress {
        admin_url: Option<Url>,
        retry: ActionHandle,
        cancel: ActionHandle,
    },
    ConnectingFailedUpdatePostalCode {
        retry: ActionHandle,
        cancel: ActionHandle,
    },
    /// The reader battery is critically low — charge it, then retry.
    ConnectingFailedChargeReader {
        retry: ActionHandle,
        cancel: ActionHandle,
    },
    ConnectionSuccess {
        done: ActionHandle,
    },

    // ── Reader software update ──────────────────────────────────────
    UpdateProgress {
        /// Mandatory updates block connection completion.
        required: bool,
        /// 0.0–1.0.
        progress: f32,
        /// Absent once the installation can no longer be cancelled.
        cancel: Option<ActionHandle>,
    },
    UpdateFailed {
        retry: Option<ActionHandle>,
        close: ActionHandle,
    },
    UpdateFailedNonRetryable {
        close: ActionHandle,
    },
    /// Update failed because the reader battery is too low; directs
    /// the merchant to charge the reader.
    UpdateFailedLowBattery {
        battery_level: Option<f32>,
        close: ActionHandle,
    },

    // ── Payment ─────────────────────────────────────────────────────
    ValidatingOrder,
    PreparingForPayment,
    TapSwipeOrInsertCard {
        input_methods: CardInputMethods,
        cancel: ActionHandle,
    },
    /// Verbatim prompt from the reader firmware.
    DisplayReaderMessage {
        message: String,
    },
    Processing,
    CancelledOnReader,
    PaymentSuccess {
        done: ActionHandle,
    },
    PaymentError {
        message: String,
        retry: PaymentRetryAction,
        back_to_checkout: ActionHandle,
    },
    PaymentErrorNonRetryable {
        message: String,
        dismiss: ActionHandle,
    },
    /// Capture-specific failure: the charge may retry without
    /// restarting the whole payment.
    PaymentCaptureError {
        retry_capture: ActionHandle,
        dismiss: ActionHandle,
    },
}

// ── Payment events ───────────────────────────────────────────────────

/// The single event type the presentation layer renders. Exactly one
/// is "current" at any time.
#[derive(Debug, Clone, Default)]
pub enum PaymentEvent {
    #[default]
    Idle,
    ShowAlert(AlertDetail),
    ShowReaderList {
        reader_ids: Vec<ReaderId>,
        select: SelectReaderHandle,
        cancel: ActionHandle,
    },
    ShowOnboarding(OnboardingViewModel),
}

impl PaymentEvent {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn alert(&self) -> Option<&AlertDetail> {
        match self {
            Self::ShowAlert(detail) => Some(detail),
            _ => None,
        }
    }
}

// ── Event bus ────────────────────────────────────────────────────────

/// Publishing side of the payment event stream.
///
/// `watch` carries the replay-latest current event; `broadcast` carries
/// the lossless feed. Only one session publishes at a time (façade
/// invariant), so consumers observe a single ordered sequence.
#[derive(Clone)]
pub(crate) struct EventBus {
    current: Arc<watch::Sender<PaymentEvent>>,
    feed: broadcast::Sender<PaymentEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (current, _) = watch::channel(PaymentEvent::Idle);
        let (feed, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        Self {
            current: Arc::new(current),
            feed,
        }
    }

    pub(crate) fn publish(&self, event: PaymentEvent) {
        trace!(?event, "payment event");
        // Ignore send errors -- just means no active subscribers.
        let _ = self.feed.send(event.clone());
        self.current.send_replace(event);
    }

    pub(crate) fn alert(&self, detail: AlertDetail) {
        self.publish(PaymentEvent::ShowAlert(detail));
    }

    pub(crate) fn idle(&self) {
        self.publish(PaymentEvent::Idle);
    }

    pub(crate) fn subscribe(&self) -> PaymentEventStream {
        PaymentEventStream::new(self.current.subscribe())
    }

    pub(crate) fn feed(&self) -> broadcast::Receiver<PaymentEvent> {
        self.feed.subscribe()
    }
}

// ── Subscription handle ──────────────────────────────────────────────

/// A subscription to the payment event stream.
///
/// Provides point-in-time access and reactive change notification via
/// `changed()` or by converting to a `Stream`. New subscribers
/// immediately observe the current event.
pub struct PaymentEventStream {
    current: PaymentEvent,
    receiver: watch::Receiver<PaymentEvent>,
}

impl PaymentEventStream {
    pub(crate) fn new(receiver: watch::Receiver<PaymentEvent>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The event captured at creation (or last `changed()`) time.
    pub fn current(&self) -> &PaymentEvent {
        &self.current
    }

    /// The latest event (may have changed since `current`).
    pub fn latest(&self) -> PaymentEvent {
        self.receiver.borrow().clone()
    }

    /// Wait for the next event. Returns `None` once the bus is gone.
    pub async fn changed(&mut self) -> Option<PaymentEvent> {
        self.receiver.changed().await.ok()?;
        let event = self.receiver.borrow_and_update().clone();
        self.current = event.clone();
        Some(event)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> PaymentEventWatchStream {
        PaymentEventWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by the underlying `watch::Receiver`.
pub struct PaymentEventWatchStream {
    inner: WatchStream<PaymentEvent>,
}

impl Stream for PaymentEventWatchStream {
    type Item = PaymentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_subscribers_see_the_current_event() {
        let bus = EventBus::new();
        bus.alert(AlertDetail::ConnectingToReader);

        let stream = bus.subscribe();
        assert!(matches!(
            stream.current(),
            PaymentEvent::ShowAlert(AlertDetail::ConnectingToReader)
        ));
    }

    #[tokio::test]
    async fn changed_delivers_the_next_event() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe();

        bus.alert(AlertDetail::ValidatingOrder);
        let event = stream.changed().await.expect("bus alive");
        assert!(matches!(
            event,
            PaymentEvent::ShowAlert(AlertDetail::ValidatingOrder)
        ));
    }

    #[tokio::test]
    async fn feed_is_lossless_in_order() {
        let bus = EventBus::new();
        let mut feed = bus.feed();

        bus.alert(AlertDetail::ValidatingOrder);
        bus.alert(AlertDetail::PreparingForPayment);
        bus.idle();

        assert!(matches!(
            feed.recv().await.unwrap(),
            PaymentEvent::ShowAlert(AlertDetail::ValidatingOrder)
        ));
        assert!(matches!(
            feed.recv().await.unwrap(),
            PaymentEvent::ShowAlert(AlertDetail::PreparingForPayment)
        ));
        assert!(feed.recv().await.unwrap().is_idle());
    }

    #[test]
    fn action_handles_invoke_their_callback() {
        let hit = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let handle = {
            let hit = Arc::clone(&hit);
            ActionHandle::new(move || hit.store(true, std::sync::atomic::Ordering::SeqCst))
        };
        handle.clone().invoke();
        assert!(hit.load(std::sync::atomic::Ordering::SeqCst));
    }
}
