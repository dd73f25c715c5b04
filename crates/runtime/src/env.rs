use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use coursehub_common::EnvVars;
use rust_decimal::Decimal;

use crate::currency::CurrencyConfig;
use crate::fraud::FraudConfig;

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| panic!("{} is not a number", key)),
        Err(_) => default,
    }
}

pub struct RuntimeEnv {
    pub fraud_window_minutes: i64,
    pub fraud_max_attempts: i64,
    pub fraud_max_failures: i64,
    pub fraud_max_amount_cents: i64,
    pub fraud_block_enabled: bool,
    pub default_currency: String,
    /// Comma-separated `CODE:rate` pairs, e.g. `USD:1.0,SGD:1.35`.
    pub currency_rates: String,
    pub payment_intent_ttl_minutes: i64,
}

impl EnvVars for RuntimeEnv {
    fn load() -> Self {
        Self {
            fraud_window_minutes: parse_i64("FRAUD_WINDOW_MINUTES", 10),
            fraud_max_attempts: parse_i64("FRAUD_MAX_ATTEMPTS", 5),
            fraud_max_failures: parse_i64("FRAUD_MAX_FAILURES", 3),
            fraud_max_amount_cents: parse_i64("FRAUD_MAX_AMOUNT_CENTS", 0),
            fraud_block_enabled: var_or("FRAUD_BLOCK_ENABLED", "true") == "true",
            default_currency: var_or("DEFAULT_CURRENCY", "USD"),
            currency_rates: var_or("CURRENCY_RATES", "USD:1.0"),
            payment_intent_ttl_minutes: parse_i64("PAYMENT_INTENT_TTL_MINUTES", 30),
        }
    }

    fn get_env_var(&self, key: &str) -> String {
        match key {
            "FRAUD_WINDOW_MINUTES" => self.fraud_window_minutes.to_string(),
            "FRAUD_MAX_ATTEMPTS" => self.fraud_max_attempts.to_string(),
            "FRAUD_MAX_FAILURES" => self.fraud_max_failures.to_string(),
            "FRAUD_MAX_AMOUNT_CENTS" => self.fraud_max_amount_cents.to_string(),
            "FRAUD_BLOCK_ENABLED" => self.fraud_block_enabled.to_string(),
            "DEFAULT_CURRENCY" => self.default_currency.clone(),
            "CURRENCY_RATES" => self.currency_rates.clone(),
            "PAYMENT_INTENT_TTL_MINUTES" => self.payment_intent_ttl_minutes.to_string(),
            _ => panic!("{} is not set", key),
        }
    }
}

impl RuntimeEnv {
    pub fn fraud_config(&self) -> FraudConfig {
        FraudConfig {
            window_minutes: self.fraud_window_minutes,
            max_attempts: self.fraud_max_attempts,
            max_failures: self.fraud_max_failures,
            max_amount_cents: self.fraud_max_amount_cents,
            block_enabled: self.fraud_block_enabled,
        }
    }

    pub fn currency_config(&self) -> CurrencyConfig {
        let mut rates = HashMap::new();
        for pair in self.currency_rates.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (code, rate) = pair
                .split_once(':')
                .unwrap_or_else(|| panic!("malformed CURRENCY_RATES entry: {}", pair));
            let rate = Decimal::from_str(rate.trim())
                .unwrap_or_else(|_| panic!("malformed CURRENCY_RATES rate: {}", pair));
            rates.insert(code.trim().to_uppercase(), rate);
        }
        CurrencyConfig::new(&self.default_currency, rates)
    }

    pub fn intent_ttl_secs(&self) -> i64 {
        self.payment_intent_ttl_minutes * 60
    }
}
