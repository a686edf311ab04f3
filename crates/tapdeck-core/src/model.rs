// ── Core domain types ──
//
// Types shared across the façade, controllers, and orchestrator.
// Reader hardware types live in `tapdeck-hw`; these are the
// orchestration-level results and statuses built on top of them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tapdeck_hw::{PaymentReceipt, Reader, ReaderKind};

/// The order a payment is collected for.
///
/// A minimal projection of the commerce backend's order — the engine
/// only needs identity, the total, and the currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    /// Human-facing order number ("1067"). Not necessarily numeric.
    pub number: String,
    pub total: Decimal,
    /// Lowercase ISO 4217 code.
    pub currency: String,
}

/// The one authoritative connection state per process.
///
/// Held in a `watch` channel owned by the façade; mutated only through
/// the façade's status handle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected(Reader),
    Disconnecting,
}

impl ConnectionStatus {
    pub fn connected_reader(&self) -> Option<&Reader> {
        match self {
            Self::Connected(reader) => Some(reader),
            Self::Disconnected | Self::Disconnecting => None,
        }
    }

    /// True when a reader of the given kind is connected.
    pub fn has_reader_of_kind(&self, kind: ReaderKind) -> bool {
        self.connected_reader().is_some_and(|r| r.kind == kind)
    }
}

/// Which stage a cancellation came from. Carried on results and
/// analytics events; remediation and reporting differ by stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CancellationSource {
    SearchingForReader,
    FoundReader,
    FoundSeveralReaders,
    ConnectionError,
    ReaderSoftwareUpdate,
    PaymentValidatingOrder,
    PaymentPreparingReader,
    PaymentWaitingForInput,
    Onboarding,
    Session,
}

/// Result of a connection attempt. Cancellation is a result, not an
/// error — callers must be able to tell "user stopped" from "failed".
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionResult {
    Connected(Reader),
    Canceled(CancellationSource),
}

/// Result of a payment collection. Same cancellation contract.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Success(PaymentReceipt),
    Cancellation,
}

/// What kind of session currently holds the single in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Connection,
    Payment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapdeck_hw::Reader;

    #[test]
    fn connection_status_kind_check() {
        let status =
            ConnectionStatus::Connected(Reader::new("CHB1", ReaderKind::BluetoothExternal));
        assert!(status.has_reader_of_kind(ReaderKind::BluetoothExternal));
        assert!(!status.has_reader_of_kind(ReaderKind::BuiltIn));
        assert!(!ConnectionStatus::Disconnected.has_reader_of_kind(ReaderKind::BuiltIn));
    }

    #[test]
    fn cancellation_source_names_are_snake_case() {
        assert_eq!(
            CancellationSource::FoundSeveralReaders.to_string(),
            "found_several_readers"
        );
        assert_eq!(
            CancellationSource::PaymentWaitingForInput.to_string(),
            "payment_waiting_for_input"
        );
    }
}
