// ── Retry classification ──
//
// Pure, total mapping from device failures to retry policies. Two
// composed lookup tables: the outer table handles service-level
// overrides (refund `should_retry`), the inner table maps every
// `DeviceError` code. Adding a new device code is a one-line arm here
// plus an explicit test below.

use tapdeck_hw::{DeviceError, ServiceError};

/// Whether and how a failed operation should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryApproach {
    /// Structural failure; retrying cannot help.
    DontRetry,
    /// Transient condition; the same operation may succeed.
    TryAgain,
    /// The payment was declined; switching cards is more useful than
    /// an immediate retry.
    TryAnotherPaymentMethod,
}

/// Classify a service failure into a retry approach.
///
/// Total over every error the capability port can produce; unrecognized
/// conditions default to [`RetryApproach::TryAgain`].
pub fn classify(error: &ServiceError) -> RetryApproach {
    match error {
        // The device layer already knows this refund cannot retry.
        ServiceError::Refund {
            should_retry: false,
            ..
        } => RetryApproach::DontRetry,
        _ => classify_device(error.device_error()),
    }
}

/// The inner table: one arm per device condition.
fn classify_device(error: &DeviceError) -> RetryApproach {
    use RetryApproach::{DontRetry, TryAgain, TryAnotherPaymentMethod};

    match error {
        // ── Transient connectivity / hardware ───────────────────────
        DeviceError::NotConnectedToReader => TryAgain,
        DeviceError::BluetoothDisabled => TryAgain,
        DeviceError::BluetoothError => TryAgain,
        DeviceError::BluetoothScanTimedOut => TryAgain,
        DeviceError::BluetoothConnectTimedOut => TryAgain,
        DeviceError::BluetoothDisconnected => TryAgain,
        DeviceError::BluetoothConnectionFailedBatteryCriticallyLow => TryAgain,
        DeviceError::ReaderBusy => TryAgain,
        DeviceError::ReaderCommunicationError => TryAgain,
        DeviceError::ConnectFailedReaderIsInUse => TryAgain,
        DeviceError::ConnectionAttemptInvalidated => TryAgain,

        // ── Card reads (remove, reinsert, try again) ────────────────
        DeviceError::CardInsertNotRead => TryAgain,
        DeviceError::CardSwipeNotRead => TryAgain,
        DeviceError::CardReadTimedOut => TryAgain,
        DeviceError::CardRemoved => TryAgain,
        DeviceError::CardLeftInReader => TryAgain,

        // ── Software update failures ────────────────────────────────
        DeviceError::ReaderSoftwareUpdateFailed => TryAgain,
        DeviceError::ReaderSoftwareUpdateFailedReader => TryAgain,
        DeviceError::ReaderSoftwareUpdateFailedServer => TryAgain,
        DeviceError::ReaderSoftwareUpdateFailedInterrupted => TryAgain,
        DeviceError::ReaderSoftwareUpdateFailedBatteryLow => TryAgain,

        // ── Network / processor transients ──────────────────────────
        DeviceError::NotConnectedToInternet => TryAgain,
        DeviceError::RequestTimedOut => TryAgain,
        DeviceError::ProcessorApiError => TryAgain,
        DeviceError::InternalServiceError => TryAgain,
        DeviceError::ConfirmInvalidPaymentIntent => TryAgain,
        DeviceError::InvalidAmount => TryAgain,
        DeviceError::InvalidCurrency => TryAgain,
        DeviceError::OrderAlreadyPaid => TryAgain,

        // ── Store configuration (fix settings, then retry) ──────────
        DeviceError::IncompleteStoreAddress => TryAgain,
        DeviceError::InvalidPostalCode => TryAgain,

        // ── Built-in reader preparation ─────────────────────────────
        DeviceError::PasscodeNotEnabled => TryAgain,
        DeviceError::BuiltInReaderFailedToPrepare => TryAgain,

        // ── Declines: switch payment method ─────────────────────────
        DeviceError::PaymentDeclinedByProcessor => TryAnotherPaymentMethod,
        DeviceError::PaymentDeclinedByReader => TryAnotherPaymentMethod,

        // ── Structural / non-recoverable ────────────────────────────
        DeviceError::AlreadyConnectedToReader => DontRetry,
        DeviceError::ReaderSessionExpired => DontRetry,
        DeviceError::UnsupportedSdk => DontRetry,
        DeviceError::UnsupportedReaderVersion => DontRetry,
        DeviceError::FeatureNotAvailableWithConnectedReader => DontRetry,
        DeviceError::CommandCancelled(_) => DontRetry,
        DeviceError::NoActivePaymentIntent => DontRetry,
        DeviceError::BluetoothLowEnergyUnsupported => DontRetry,
        DeviceError::ReaderIncompatible => DontRetry,
        DeviceError::NfcDisabled => DontRetry,
        DeviceError::BuiltInReaderMerchantBlocked => DontRetry,
        DeviceError::UnsupportedDeviceConfiguration => DontRetry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapdeck_hw::CancellationOrigin;

    fn connection(source: DeviceError) -> ServiceError {
        ServiceError::Connection { source }
    }

    #[test]
    fn transient_conditions_try_again() {
        for source in [
            DeviceError::NotConnectedToReader,
            DeviceError::BluetoothDisabled,
            DeviceError::BluetoothError,
            DeviceError::BluetoothScanTimedOut,
            DeviceError::BluetoothConnectTimedOut,
            DeviceError::BluetoothDisconnected,
            DeviceError::BluetoothConnectionFailedBatteryCriticallyLow,
            DeviceError::ReaderBusy,
            DeviceError::ReaderCommunicationError,
            DeviceError::ConnectFailedReaderIsInUse,
            DeviceError::ConnectionAttemptInvalidated,
            DeviceError::CardInsertNotRead,
            DeviceError::CardSwipeNotRead,
            DeviceError::CardReadTimedOut,
            DeviceError::CardRemoved,
            DeviceError::CardLeftInReader,
            DeviceError::ReaderSoftwareUpdateFailed,
            DeviceError::ReaderSoftwareUpdateFailedReader,
            DeviceError::ReaderSoftwareUpdateFailedServer,
            DeviceError::ReaderSoftwareUpdateFailedInterrupted,
            DeviceError::ReaderSoftwareUpdateFailedBatteryLow,
            DeviceError::NotConnectedToInternet,
            DeviceError::RequestTimedOut,
            DeviceError::ProcessorApiError,
            DeviceError::InternalServiceError,
            DeviceError::ConfirmInvalidPaymentIntent,
            DeviceError::InvalidAmount,
            DeviceError::InvalidCurrency,
            DeviceError::IncompleteStoreAddress,
            DeviceError::InvalidPostalCode,
            DeviceError::PasscodeNotEnabled,
            DeviceError::BuiltInReaderFailedToPrepare,
        ] {
            assert_eq!(
                classify(&connection(source.clone())),
                RetryApproach::TryAgain,
                "{source:?}"
            );
        }
    }

    #[test]
    fn declines_switch_payment_method() {
        for source in [
            DeviceError::PaymentDeclinedByProcessor,
            DeviceError::PaymentDeclinedByReader,
        ] {
            assert_eq!(
                classify(&ServiceError::PaymentMethodCollection {
                    source: source.clone()
                }),
                RetryApproach::TryAnotherPaymentMethod,
                "{source:?}"
            );
        }
    }

    #[test]
    fn structural_conditions_dont_retry() {
        for source in [
            DeviceError::AlreadyConnectedToReader,
            DeviceError::ReaderSessionExpired,
            DeviceError::UnsupportedSdk,
            DeviceError::UnsupportedReaderVersion,
            DeviceError::FeatureNotAvailableWithConnectedReader,
            DeviceError::CommandCancelled(CancellationOrigin::App),
            DeviceError::CommandCancelled(CancellationOrigin::Reader),
            DeviceError::NoActivePaymentIntent,
            DeviceError::BluetoothLowEnergyUnsupported,
            DeviceError::ReaderIncompatible,
            DeviceError::NfcDisabled,
            DeviceError::BuiltInReaderMerchantBlocked,
            DeviceError::UnsupportedDeviceConfiguration,
        ] {
            assert_eq!(
                classify(&connection(source.clone())),
                RetryApproach::DontRetry,
                "{source:?}"
            );
        }
    }

    #[test]
    fn refund_should_retry_false_short_circuits() {
        let err = ServiceError::Refund {
            source: DeviceError::ReaderCommunicationError,
            should_retry: false,
        };
        assert_eq!(classify(&err), RetryApproach::DontRetry);
    }

    #[test]
    fn refund_should_retry_true_defers_to_the_underlying_code() {
        let transient = ServiceError::Refund {
            source: DeviceError::ReaderCommunicationError,
            should_retry: true,
        };
        assert_eq!(classify(&transient), RetryApproach::TryAgain);

        let structural = ServiceError::Refund {
            source: DeviceError::ReaderSessionExpired,
            should_retry: true,
        };
        assert_eq!(classify(&structural), RetryApproach::DontRetry);
    }

    #[test]
    fn classification_is_stable_across_repeated_calls() {
        let err = connection(DeviceError::PaymentDeclinedByReader);
        let first = classify(&err);
        for _ in 0..8 {
            assert_eq!(classify(&err), first);
        }
    }

    #[test]
    fn wrapper_phase_does_not_change_the_approach() {
        let source = DeviceError::RequestTimedOut;
        for err in [
            ServiceError::Discovery {
                source: source.clone(),
            },
            ServiceError::Connection {
                source: source.clone(),
            },
            ServiceError::PaymentMethodCollection {
                source: source.clone(),
            },
            ServiceError::PaymentCapture {
                source: source.clone(),
            },
        ] {
            assert_eq!(classify(&err), RetryApproach::TryAgain);
        }
    }
}
