// ── Runtime payments configuration ──
//
// Describes the merchant site the engine operates for. Built by the
// embedding application and handed to `CardPaymentService` -- core
// never reads config files.

use rust_decimal::Decimal;
use url::Url;

/// Currency formatting and validation rules for the merchant's store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencySettings {
    /// Lowercase ISO 4217 code, e.g. `"usd"`.
    pub code: String,
    /// Symbol prefix used when formatting ("$", "€").
    pub symbol: String,
    /// Number of minor-unit digits (2 for usd, 0 for jpy).
    pub decimal_places: u32,
    /// Smallest charge the processor accepts in this currency.
    pub minimum_charge: Decimal,
}

impl CurrencySettings {
    /// US dollar defaults (50¢ processor minimum).
    pub fn usd() -> Self {
        Self {
            code: "usd".into(),
            symbol: "$".into(),
            decimal_places: 2,
            minimum_charge: Decimal::new(50, 2),
        }
    }
}

/// Configuration for a single merchant site.
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// Site identifier, included on analytics events.
    pub site_id: u64,
    pub currency: CurrencySettings,
    /// Admin settings page for store-address remediation alerts.
    pub store_admin_url: Option<Url>,
    /// Free-text line for the processor statement.
    pub statement_description: Option<String>,
}

impl PaymentsConfig {
    pub fn new(site_id: u64, currency: CurrencySettings) -> Self {
        Self {
            site_id,
            currency,
            store_admin_url: None,
            statement_description: None,
        }
    }

    pub fn with_store_admin_url(mut self, url: Url) -> Self {
        self.store_admin_url = Some(url);
        self
    }

    pub fn with_statement_description(mut self, description: impl Into<String>) -> Self {
        self.statement_description = Some(description.into());
        self
    }
}
