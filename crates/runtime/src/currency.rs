use std::collections::HashMap;

use anyhow::{anyhow, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Static rate table. Rates are expressed as units of the currency per one
/// unit of the base currency, so the base itself carries rate 1.
#[derive(Debug, Clone)]
pub struct CurrencyConfig {
    pub default_currency: String,
    pub rates: HashMap<String, Decimal>,
}

impl CurrencyConfig {
    pub fn new(default_currency: &str, rates: HashMap<String, Decimal>) -> Self {
        let mut rates = rates;
        rates
            .entry(default_currency.to_uppercase())
            .or_insert(Decimal::ONE);
        Self {
            default_currency: default_currency.to_uppercase(),
            rates,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CurrencyConverter {
    config: CurrencyConfig,
}

impl CurrencyConverter {
    pub fn new(config: CurrencyConfig) -> Self {
        Self { config }
    }

    pub fn default_currency(&self) -> &str {
        &self.config.default_currency
    }

    /// Uppercases and trims a currency code, rejecting codes missing from
    /// the rate table.
    pub fn normalize(&self, code: &str) -> Result<String> {
        let code = code.trim().to_uppercase();
        if self.config.rates.contains_key(&code) {
            Ok(code)
        } else {
            Err(anyhow!("unsupported currency: {}", code))
        }
    }

    fn rate(&self, code: &str) -> Result<Decimal> {
        self.config
            .rates
            .get(code)
            .copied()
            .ok_or_else(|| anyhow!("unsupported currency: {}", code))
    }

    /// Converts an amount in minor units between two currencies, rounding
    /// half-away-from-zero to a whole cent.
    pub fn convert_cents(&self, amount_cents: i64, from: &str, to: &str) -> Result<i64> {
        let from = self.normalize(from)?;
        let to = self.normalize(to)?;
        if from == to {
            return Ok(amount_cents);
        }

        let converted = Decimal::from(amount_cents) * self.rate(&to)? / self.rate(&from)?;
        let rounded = converted.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        rounded
            .to_i64()
            .ok_or_else(|| anyhow!("converted amount out of range: {}", rounded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn converter() -> CurrencyConverter {
        let mut rates = HashMap::new();
        rates.insert("SGD".to_string(), dec!(1.35));
        rates.insert("EUR".to_string(), dec!(0.92));
        CurrencyConverter::new(CurrencyConfig::new("USD", rates))
    }

    #[test]
    fn normalize_uppercases_and_validates() {
        let c = converter();
        assert_eq!(c.normalize(" usd ").unwrap(), "USD");
        assert!(c.normalize("JPY").is_err());
    }

    #[test]
    fn base_currency_is_identity() {
        let c = converter();
        assert_eq!(c.convert_cents(5000, "USD", "USD").unwrap(), 5000);
    }

    #[test]
    fn converts_through_base() {
        let c = converter();
        // 50.00 USD -> SGD at 1.35
        assert_eq!(c.convert_cents(5000, "USD", "SGD").unwrap(), 6750);
        // and back
        assert_eq!(c.convert_cents(6750, "SGD", "USD").unwrap(), 5000);
        // cross rate SGD -> EUR: 1350 * 0.92 / 1.35 = 920
        assert_eq!(c.convert_cents(1350, "SGD", "EUR").unwrap(), 920);
    }

    #[test]
    fn rounds_half_away_from_zero() {
        let mut rates = HashMap::new();
        rates.insert("ABC".to_string(), dec!(0.005));
        let c = CurrencyConverter::new(CurrencyConfig::new("USD", rates));
        // 100 * 0.005 = 0.5 -> rounds to 1
        assert_eq!(c.convert_cents(100, "USD", "ABC").unwrap(), 1);
    }
}
