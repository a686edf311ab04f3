use thiserror::Error;

/// Where a cancelled command originated.
///
/// The SDK only reports "cancelled"; the call site knows whether the
/// cancel button was pressed on the reader or the request came from the
/// app, so we start from `Unknown` and let the service refine it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancellationOrigin {
    #[default]
    Unknown,
    App,
    Reader,
}

/// The specific device condition that made an SDK interaction fail.
///
/// Covers every failure mode the reader SDK can produce: Bluetooth
/// transport, card reads, software updates, the built-in (tap-to-pay)
/// reader, processor responses, and session/intent lifecycle. The
/// orchestration layer classifies these into retry policies; it never
/// shows them to users directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    // ── Connection lifecycle ────────────────────────────────────────
    /// No reader is connected — connect before trying again.
    #[error("no card reader is connected")]
    NotConnectedToReader,

    /// Already connected; disconnect before connecting again.
    #[error("another reader is already connected")]
    AlreadyConnectedToReader,

    /// Connection invalidated mid-attempt (e.g. the site changed).
    #[error("the connection attempt was invalidated")]
    ConnectionAttemptInvalidated,

    /// The reader session expired; disconnect and reconnect.
    #[error("the reader session has expired")]
    ReaderSessionExpired,

    // ── Bluetooth transport ─────────────────────────────────────────
    /// Bluetooth is turned off on the device.
    #[error("bluetooth is disabled")]
    BluetoothDisabled,

    /// Generic Bluetooth failure (including missing permission).
    #[error("bluetooth error")]
    BluetoothError,

    /// Scanning for Bluetooth devices timed out.
    #[error("bluetooth scan timed out")]
    BluetoothScanTimedOut,

    /// Connecting to the Bluetooth device timed out.
    #[error("bluetooth connect timed out")]
    BluetoothConnectTimedOut,

    /// The Bluetooth link dropped unexpectedly.
    #[error("bluetooth disconnected unexpectedly")]
    BluetoothDisconnected,

    /// Bluetooth LE is unsupported on this device.
    #[error("bluetooth low energy is unsupported on this device")]
    BluetoothLowEnergyUnsupported,

    /// Reader battery too low to establish a connection.
    #[error("reader battery is critically low")]
    BluetoothConnectionFailedBatteryCriticallyLow,

    // ── Software update ─────────────────────────────────────────────
    /// Update failed because the reader battery is too low.
    #[error("reader software update failed: battery low")]
    ReaderSoftwareUpdateFailedBatteryLow,

    /// Update was interrupted before completing.
    #[error("reader software update was interrupted")]
    ReaderSoftwareUpdateFailedInterrupted,

    /// Generic update failure.
    #[error("reader software update failed")]
    ReaderSoftwareUpdateFailed,

    /// Update failed communicating with the reader.
    #[error("reader software update failed: reader communication error")]
    ReaderSoftwareUpdateFailedReader,

    /// Update failed communicating with the update server.
    #[error("reader software update failed: update server error")]
    ReaderSoftwareUpdateFailedServer,

    // ── Card reads ──────────────────────────────────────────────────
    /// The inserted card's chip could not be read.
    #[error("inserted card could not be read")]
    CardInsertNotRead,

    /// The swipe could not be read.
    #[error("swiped card could not be read")]
    CardSwipeNotRead,

    /// Reading a card timed out.
    #[error("card read timed out")]
    CardReadTimedOut,

    /// The card was removed mid-transaction.
    #[error("card removed during the transaction")]
    CardRemoved,

    /// A card from a previous transaction is still in the reader.
    #[error("card left in reader")]
    CardLeftInReader,

    // ── Reader state ────────────────────────────────────────────────
    /// The reader is busy executing another command.
    #[error("reader is busy")]
    ReaderBusy,

    /// An incompatible reader was detected.
    #[error("reader is incompatible with this application")]
    ReaderIncompatible,

    /// Could not communicate with the reader.
    #[error("reader communication error")]
    ReaderCommunicationError,

    /// The reader is already in use by another device.
    #[error("reader is in use by another device")]
    ConnectFailedReaderIsInUse,

    // ── Versioning ──────────────────────────────────────────────────
    /// The embedded SDK is too old for the backend.
    #[error("unsupported SDK version")]
    UnsupportedSdk,

    /// The reader firmware is too old to process payments.
    #[error("unsupported reader firmware version")]
    UnsupportedReaderVersion,

    /// Requested feature is unavailable on the connected reader.
    #[error("feature not available with the connected reader")]
    FeatureNotAvailableWithConnectedReader,

    // ── Payments ────────────────────────────────────────────────────
    /// A command was cancelled, in the app or on the reader.
    #[error("command cancelled")]
    CommandCancelled(CancellationOrigin),

    /// The processor declined the payment.
    #[error("payment declined by the payment processor")]
    PaymentDeclinedByProcessor,

    /// The reader itself declined the card.
    #[error("payment declined by the card reader")]
    PaymentDeclinedByReader,

    /// The payment intent was nil or invalid at confirm time.
    #[error("invalid payment intent")]
    ConfirmInvalidPaymentIntent,

    /// No active payment intent for the requested operation.
    #[error("no active payment intent")]
    NoActivePaymentIntent,

    /// The order this payment is for has already been paid.
    #[error("order has already been paid")]
    OrderAlreadyPaid,

    /// The amount is outside what the reader supports.
    #[error("amount not supported by the reader")]
    InvalidAmount,

    /// The currency is not supported by the reader.
    #[error("currency not supported by the reader")]
    InvalidCurrency,

    // ── Network / processor ─────────────────────────────────────────
    /// The SDK has no internet connectivity.
    #[error("not connected to the internet")]
    NotConnectedToInternet,

    /// The underlying request timed out.
    #[error("request timed out")]
    RequestTimedOut,

    /// The processor API returned a server-side error.
    #[error("payment processor API error")]
    ProcessorApiError,

    // ── Store configuration ─────────────────────────────────────────
    /// The store address is incomplete; fix it in store settings.
    #[error("store address is incomplete")]
    IncompleteStoreAddress,

    /// The store postal code is invalid or missing.
    #[error("store postal code is invalid")]
    InvalidPostalCode,

    // ── Built-in (tap-to-pay) reader ────────────────────────────────
    /// A lock-screen passcode is required for the built-in reader.
    #[error("device passcode not enabled")]
    PasscodeNotEnabled,

    /// NFC is disabled on the device, usually by a management profile.
    #[error("NFC is disabled on this device")]
    NfcDisabled,

    /// Preparing the built-in reader failed; retriable.
    #[error("built-in reader failed to prepare")]
    BuiltInReaderFailedToPrepare,

    /// The merchant account is blocked or invalid for tap-to-pay.
    #[error("merchant account cannot use the built-in reader")]
    BuiltInReaderMerchantBlocked,

    /// The device does not meet tap-to-pay minimum requirements.
    #[error("device configuration unsupported for the built-in reader")]
    UnsupportedDeviceConfiguration,

    // ── Catch-all ───────────────────────────────────────────────────
    /// Unexpected internal SDK failure.
    #[error("unexpected internal service error")]
    InternalServiceError,
}

impl DeviceError {
    /// True for the software-update family of failures.
    pub fn is_software_update_error(&self) -> bool {
        matches!(
            self,
            Self::ReaderSoftwareUpdateFailed
                | Self::ReaderSoftwareUpdateFailedReader
                | Self::ReaderSoftwareUpdateFailedServer
                | Self::ReaderSoftwareUpdateFailedInterrupted
                | Self::ReaderSoftwareUpdateFailedBatteryLow
        )
    }

    /// True when the command was cancelled (either side).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::CommandCancelled(_))
    }
}

// ── Service-level wrapper ────────────────────────────────────────────

/// Failure of one capability-port operation, tagged with the phase it
/// failed in. The phase determines which alert family the orchestration
/// layer routes the failure to.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("reader discovery failed: {source}")]
    Discovery { source: DeviceError },

    #[error("reader connection failed: {source}")]
    Connection { source: DeviceError },

    #[error("reader disconnection failed: {source}")]
    Disconnection { source: DeviceError },

    /// Software update failure; carries the battery level at failure
    /// time when the hardware reported one.
    #[error("reader software update failed: {source}")]
    SoftwareUpdate {
        source: DeviceError,
        battery_level: Option<f32>,
    },

    #[error("payment method collection failed: {source}")]
    PaymentMethodCollection { source: DeviceError },

    #[error("payment capture failed: {source}")]
    PaymentCapture { source: DeviceError },

    #[error("payment cancellation failed: {source}")]
    PaymentCancellation { source: DeviceError },

    /// Refund failure; `should_retry: false` short-circuits the retry
    /// classifier regardless of the underlying code.
    #[error("refund failed: {source}")]
    Refund {
        source: DeviceError,
        should_retry: bool,
    },
}

impl ServiceError {
    /// The device condition behind this failure.
    pub fn device_error(&self) -> &DeviceError {
        match self {
            Self::Discovery { source }
            | Self::Connection { source }
            | Self::Disconnection { source }
            | Self::SoftwareUpdate { source, .. }
            | Self::PaymentMethodCollection { source }
            | Self::PaymentCapture { source }
            | Self::PaymentCancellation { source }
            | Self::Refund { source, .. } => source,
        }
    }

    /// True when the operation ended because it was cancelled.
    pub fn is_cancellation(&self) -> bool {
        self.device_error().is_cancellation()
    }
}
