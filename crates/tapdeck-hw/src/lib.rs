//! Card reader capability port.
//!
//! This crate defines the contract a vendor reader SDK must satisfy to
//! drive card-present payments, plus the shared device model and error
//! taxonomy:
//!
//! - **[`CardReaderService`]** — the asynchronous capability trait:
//!   discovery, connection, payment-method collection, capture,
//!   cancellation, and software-update progress.
//! - **Device model** ([`reader`]) — [`Reader`] snapshots,
//!   [`DiscoveryMethod`], [`CardInputMethods`], payment primitives.
//! - **Error taxonomy** ([`error`]) — [`DeviceError`] codes wrapped in
//!   phase-tagged [`ServiceError`]s, the input to retry classification.
//! - **[`sim`]** — a scriptable in-process implementation used by the
//!   demo binary and the integration tests.

pub mod error;
pub mod reader;
pub mod sim;
pub mod update;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

pub use error::{CancellationOrigin, DeviceError, ServiceError};
pub use reader::{
    CardInputMethods, DiscoveryMethod, PaymentIntent, PaymentParameters, PaymentReceipt, Reader,
    ReaderEvent, ReaderId, ReaderKind,
};
pub use update::{SoftwareUpdateEvent, UpdateKind};

/// An update from an in-progress discovery session.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// The full set of currently-visible readers. Sent repeatedly as
    /// readers appear and disappear; receivers replace, not append.
    ReadersChanged(Vec<Reader>),
    /// Discovery itself failed; the session is over.
    Failed(ServiceError),
}

/// The capability contract the vendor reader SDK must satisfy.
///
/// All operations are asynchronous and error-producing. Callbacks from
/// the SDK may arrive on arbitrary executors; implementations must
/// deliver them through the returned channels so consumers can
/// normalize them onto a single context.
#[async_trait]
pub trait CardReaderService: Send + Sync {
    /// Begin scanning for readers reachable via `method`.
    ///
    /// Returns a channel of [`DiscoveryEvent`]s that stays open until
    /// the scan is cancelled, fails, or the service is dropped. At most
    /// one discovery session runs at a time.
    async fn start_discovery(
        &self,
        method: DiscoveryMethod,
    ) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>, ServiceError>;

    /// Stop the in-progress discovery session, if any.
    async fn cancel_discovery(&self) -> Result<(), ServiceError>;

    /// Connect to a previously-discovered reader.
    ///
    /// May drive a firmware update first; progress is reported on the
    /// [`software_update_events`](Self::software_update_events) stream,
    /// and a mandatory update blocks this call until it completes.
    /// Returns the connected reader snapshot (battery level refreshed).
    async fn connect(&self, reader: &Reader) -> Result<Reader, ServiceError>;

    /// Disconnect the currently-connected reader.
    async fn disconnect(&self) -> Result<(), ServiceError>;

    /// Subscribe to software-update progress events.
    ///
    /// Subscribe *before* calling [`connect`](Self::connect) — updates
    /// can begin as soon as the connection handshake starts.
    fn software_update_events(&self) -> broadcast::Receiver<SoftwareUpdateEvent>;

    /// Collect and confirm a payment method on the connected reader.
    ///
    /// Reader prompts ([`ReaderEvent`]s) are delivered through `events`
    /// while the call is suspended. Resolves once the payment method is
    /// confirmed reader-side, yielding the intent to capture.
    async fn collect_payment_method(
        &self,
        parameters: &PaymentParameters,
        events: mpsc::UnboundedSender<ReaderEvent>,
    ) -> Result<PaymentIntent, ServiceError>;

    /// Capture a confirmed payment intent against the processor.
    async fn capture_payment(&self, intent: &PaymentIntent)
    -> Result<PaymentReceipt, ServiceError>;

    /// Cancel the in-flight payment operation.
    ///
    /// Fails with [`DeviceError::NoActivePaymentIntent`] when there is
    /// nothing to cancel or capture has already been submitted.
    async fn cancel_payment(&self) -> Result<(), ServiceError>;
}
