// ── Reader device model ──
//
// Immutable snapshots of reader hardware as reported by the vendor SDK.
// Identity is the serial-derived `id`; everything else is advisory and
// may change between discovery callbacks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Stable identifier for a card reader (vendor serial string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReaderId(String);

impl ReaderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReaderId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The class of reader hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderKind {
    /// External reader paired over Bluetooth LE.
    BluetoothExternal,
    /// The device's own NFC hardware (tap-to-pay).
    BuiltIn,
}

/// Which transport/class of reader a discovery session searches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryMethod {
    BluetoothScan,
    BuiltIn,
}

impl DiscoveryMethod {
    /// The reader kind this method can yield.
    pub fn reader_kind(self) -> ReaderKind {
        match self {
            Self::BluetoothScan => ReaderKind::BluetoothExternal,
            Self::BuiltIn => ReaderKind::BuiltIn,
        }
    }
}

/// A snapshot of a discovered or connected card reader.
///
/// Equality and deduplication are by `id` only — battery level and
/// display name drift across discovery callbacks for the same device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reader {
    pub id: ReaderId,
    pub display_name: String,
    /// 0.0–1.0 when the hardware reports it.
    pub battery_level: Option<f32>,
    pub kind: ReaderKind,
}

impl Reader {
    pub fn new(id: impl Into<String>, kind: ReaderKind) -> Self {
        let id = ReaderId::new(id);
        Self {
            display_name: id.as_str().to_owned(),
            id,
            battery_level: None,
            kind,
        }
    }

    pub fn with_battery(mut self, level: f32) -> Self {
        self.battery_level = Some(level);
        self
    }
}

impl PartialEq for Reader {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Reader {}

// ── Card input methods ───────────────────────────────────────────────

/// Bitmask of input methods the connected reader accepts for the
/// current payment. Multiple bits may be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CardInputMethods(u8);

impl CardInputMethods {
    pub const SWIPE: Self = Self(0b001);
    pub const INSERT: Self = Self(0b010);
    pub const TAP: Self = Self(0b100);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self(0b111)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for CardInputMethods {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ── Reader events during payment collection ──────────────────────────

/// Messages the reader emits while a payment method is being collected.
/// Surfaced verbatim to the presentation layer; the orchestration layer
/// never inspects message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// The reader is ready for the card, accepting these input methods.
    WaitingForInput(CardInputMethods),
    /// Free-text prompt from the reader firmware ("Try another card").
    DisplayMessage(String),
    /// The card was removed after a successful client-side capture;
    /// server-side processing continues.
    CardRemovedAfterCapture,
}

// ── Payment primitives ───────────────────────────────────────────────

/// Parameters for a single payment collection, assembled by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentParameters {
    /// Amount in the currency's minor-unit-aware decimal form.
    pub amount: Decimal,
    /// Lowercase ISO 4217 code, e.g. `"usd"`.
    pub currency: String,
    /// Free-text line for the processor statement, if configured.
    pub statement_description: Option<String>,
}

/// A payment intent returned by the device layer after the payment
/// method has been collected and confirmed on the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: uuid::Uuid,
    pub amount: Decimal,
    pub currency: String,
}

/// Proof of a captured payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    /// Reference the caller can use to look the charge up later.
    pub reference: uuid::Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reader_equality_is_by_id_only() {
        let a = Reader::new("CHB204909005931", ReaderKind::BluetoothExternal).with_battery(0.5);
        let mut b = Reader::new("CHB204909005931", ReaderKind::BluetoothExternal);
        b.display_name = "Front counter".to_owned();

        assert_eq!(a, b);
    }

    #[test]
    fn different_ids_are_not_equal() {
        let a = Reader::new("CHB1", ReaderKind::BluetoothExternal);
        let b = Reader::new("CHB2", ReaderKind::BluetoothExternal);
        assert_ne!(a, b);
    }

    #[test]
    fn discovery_method_maps_to_reader_kind() {
        assert_eq!(
            DiscoveryMethod::BluetoothScan.reader_kind(),
            ReaderKind::BluetoothExternal
        );
        assert_eq!(DiscoveryMethod::BuiltIn.reader_kind(), ReaderKind::BuiltIn);
    }

    #[test]
    fn input_methods_bitmask() {
        let methods = CardInputMethods::TAP | CardInputMethods::INSERT;
        assert!(methods.contains(CardInputMethods::TAP));
        assert!(methods.contains(CardInputMethods::INSERT));
        assert!(!methods.contains(CardInputMethods::SWIPE));
        assert!(CardInputMethods::empty().is_empty());
        assert!(CardInputMethods::all().contains(methods));
    }
}
