// ── Amount validation and formatting ──
//
// Order totals are validated before any hardware is touched; a total
// that cannot be charged is a setup error, terminal and never retried
// through the device layer.

use rust_decimal::Decimal;

use crate::config::CurrencySettings;
use crate::error::CoreError;

/// Validate an order total against the store currency.
///
/// Returns the total normalized to the currency's minor-unit scale.
pub fn validate_total(
    total: Decimal,
    currency: &str,
    settings: &CurrencySettings,
) -> Result<Decimal, CoreError> {
    if !currency.eq_ignore_ascii_case(&settings.code) {
        return Err(CoreError::UnsupportedCurrency {
            code: currency.to_owned(),
        });
    }
    if total <= Decimal::ZERO {
        return Err(CoreError::InvalidAmount {
            reason: format!("total must be positive, got {total}"),
        });
    }
    if total < settings.minimum_charge {
        return Err(CoreError::InvalidAmount {
            reason: format!(
                "total {total} is below the {} minimum of {}",
                settings.code, settings.minimum_charge
            ),
        });
    }
    let normalized = total.round_dp(settings.decimal_places);
    if normalized != total {
        return Err(CoreError::InvalidAmount {
            reason: format!(
                "total {total} has more than {} decimal places",
                settings.decimal_places
            ),
        });
    }
    Ok(normalized)
}

/// Format an amount for display ("$12.50").
pub fn format_amount(amount: Decimal, settings: &CurrencySettings) -> String {
    let mut scaled = amount.round_dp(settings.decimal_places);
    scaled.rescale(settings.decimal_places);
    format!("{}{scaled}", settings.symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn usd() -> CurrencySettings {
        CurrencySettings::usd()
    }

    #[test]
    fn accepts_a_normal_total() {
        let total = validate_total(dec!(12.50), "usd", &usd()).unwrap();
        assert_eq!(total, dec!(12.50));
    }

    #[test]
    fn currency_code_comparison_is_case_insensitive() {
        assert!(validate_total(dec!(10), "USD", &usd()).is_ok());
    }

    #[test]
    fn rejects_wrong_currency() {
        let err = validate_total(dec!(10), "eur", &usd()).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedCurrency { code } if code == "eur"));
    }

    #[test]
    fn rejects_zero_and_negative_totals() {
        assert!(matches!(
            validate_total(dec!(0), "usd", &usd()),
            Err(CoreError::InvalidAmount { .. })
        ));
        assert!(matches!(
            validate_total(dec!(-5), "usd", &usd()),
            Err(CoreError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn rejects_totals_below_processor_minimum() {
        assert!(matches!(
            validate_total(dec!(0.25), "usd", &usd()),
            Err(CoreError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn rejects_sub_minor_unit_precision() {
        assert!(matches!(
            validate_total(dec!(1.005), "usd", &usd()),
            Err(CoreError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn formats_with_symbol_and_scale() {
        assert_eq!(format_amount(dec!(12.5), &usd()), "$12.50");
    }
}
