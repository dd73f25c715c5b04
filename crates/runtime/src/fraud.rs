use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use coursehub_common::get_current_timestamp;

use crate::error::{decode_text_enum, InvalidEnumValue};
use crate::payment::{AttemptStatus, PaymentAttempt, PaymentMethod};

const SCORE_VELOCITY: i32 = 70;
const SCORE_RAPID_FAILURES: i32 = 50;
const SCORE_HIGH_AMOUNT: i32 = 40;
const BLOCK_THRESHOLD: i32 = 70;
const REVIEW_THRESHOLD: i32 = 40;

/// Thresholds for the velocity rules. Explicitly constructed and passed in;
/// business logic never reads the process environment.
#[derive(Debug, Clone)]
pub struct FraudConfig {
    pub window_minutes: i64,
    pub max_attempts: i64,
    pub max_failures: i64,
    /// 0 disables the high-amount rule.
    pub max_amount_cents: i64,
    pub block_enabled: bool,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            window_minutes: 10,
            max_attempts: 5,
            max_failures: 3,
            max_amount_cents: 0,
            block_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    Allow,
    Review,
    Block,
}

impl RiskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskAction::Allow => "allow",
            RiskAction::Review => "review",
            RiskAction::Block => "block",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl FromStr for Severity {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(InvalidEnumValue(other.to_string())),
        }
    }
}

/// Write-once audit row, one per assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub rule_code: String,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub created_at: i64,
}

impl<'r> FromRow<'r, PgRow> for FraudEvent {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            rule_code: row.try_get("rule_code")?,
            severity: decode_text_enum(row, "severity")?,
            details: row.try_get::<sqlx::types::Json<serde_json::Value>, _>("details")?.0,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// What the caller is about to attempt. `method` is `None` for pre-checks
/// that should not open a ledger row.
#[derive(Debug, Clone)]
pub struct AssessmentContext {
    pub amount_cents: i64,
    pub currency: String,
    pub method: Option<PaymentMethod>,
}

#[derive(Debug, Clone)]
pub struct Assessment {
    pub action: RiskAction,
    pub risk_score: i32,
    pub flags: Vec<&'static str>,
    /// The payment attempt opened alongside the assessment, when a method
    /// was supplied.
    pub attempt: Option<PaymentAttempt>,
}

impl Assessment {
    pub fn is_blocked(&self) -> bool {
        self.action == RiskAction::Block
    }
}

/// Additive rule scoring over the trailing window. Pure so the arithmetic is
/// testable without a database.
pub(crate) fn score_rules(
    attempts_in_window: i64,
    failures_in_window: i64,
    amount_cents: i64,
    config: &FraudConfig,
) -> (i32, Vec<&'static str>) {
    let mut score = 0;
    let mut flags = Vec::new();

    if attempts_in_window >= config.max_attempts {
        score += SCORE_VELOCITY;
        flags.push("velocity");
    }
    if failures_in_window >= config.max_failures {
        score += SCORE_RAPID_FAILURES;
        flags.push("rapid_failures");
    }
    if config.max_amount_cents > 0 && amount_cents >= config.max_amount_cents {
        score += SCORE_HIGH_AMOUNT;
        flags.push("high_amount");
    }

    (score, flags)
}

pub(crate) fn action_for_score(score: i32, block_enabled: bool) -> RiskAction {
    if score >= BLOCK_THRESHOLD && block_enabled {
        RiskAction::Block
    } else if score >= REVIEW_THRESHOLD {
        RiskAction::Review
    } else {
        RiskAction::Allow
    }
}

fn severity_for_action(action: RiskAction) -> Severity {
    match action {
        RiskAction::Block => Severity::High,
        RiskAction::Review => Severity::Medium,
        RiskAction::Allow => Severity::Low,
    }
}

#[derive(Debug, Clone)]
pub struct FraudAssessor {
    config: FraudConfig,
}

impl FraudAssessor {
    pub fn new(config: FraudConfig) -> Self {
        Self { config }
    }

    /// Scores one payment attempt and persists the audit trail. This runs
    /// outside any money-moving transaction and must complete before the
    /// caller contacts a provider; a `Block` result short-circuits that call.
    pub async fn assess(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        ip_address: &str,
        ctx: &AssessmentContext,
    ) -> Result<Assessment> {
        let now = get_current_timestamp();
        let window_start = now - self.config.window_minutes * 60;

        let attempts_in_window: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM "payment_attempts"
               WHERE ("user_id" = $1 OR "ip_address" = $2) AND "created_at" >= $3"#,
        )
        .bind(user_id)
        .bind(ip_address)
        .bind(window_start)
        .fetch_one(pool)
        .await?;

        let failures_in_window: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM "payment_attempts"
               WHERE ("user_id" = $1 OR "ip_address" = $2)
                 AND "created_at" >= $3 AND "status" = 'failed'"#,
        )
        .bind(user_id)
        .bind(ip_address)
        .bind(window_start)
        .fetch_one(pool)
        .await?;

        let (risk_score, flags) =
            score_rules(attempts_in_window, failures_in_window, ctx.amount_cents, &self.config);
        let action = action_for_score(risk_score, self.config.block_enabled);
        let rule_code = flags.first().copied().unwrap_or("ok");

        let mut conn = pool.acquire().await?;

        sqlx::query(
            r#"INSERT INTO "fraud_events" ("user_id", "rule_code", "severity", "details")
               VALUES ($1, $2, $3, $4)"#,
        )
        .bind(user_id)
        .bind(rule_code)
        .bind(severity_for_action(action).as_str())
        .bind(sqlx::types::Json(json!({
            "action": action.as_str(),
            "risk_score": risk_score,
            "flags": flags,
            "attempts_in_window": attempts_in_window,
            "failures_in_window": failures_in_window,
            "amount_cents": ctx.amount_cents,
            "currency": ctx.currency,
            "ip_address": ip_address,
        })))
        .execute(&mut *conn)
        .await?;

        let attempt = match ctx.method {
            Some(method) => {
                let (status, reason) = if action == RiskAction::Block {
                    (AttemptStatus::Failed, Some("blocked_by_risk_rules"))
                } else {
                    (AttemptStatus::Initiated, None)
                };
                let attempt = PaymentAttempt::insert(
                    &mut conn,
                    user_id,
                    method,
                    status,
                    ctx.amount_cents,
                    &ctx.currency,
                    ip_address,
                    reason,
                )
                .await?;
                Some(attempt)
            }
            None => None,
        };

        if action != RiskAction::Allow {
            tracing::warn!(
                "[FraudAssessor::assess] user {} ip {} scored {} -> {} ({:?})",
                user_id,
                ip_address,
                risk_score,
                action.as_str(),
                flags
            );
        }

        Ok(Assessment {
            action,
            risk_score,
            flags,
            attempt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FraudConfig {
        FraudConfig {
            window_minutes: 10,
            max_attempts: 5,
            max_failures: 3,
            max_amount_cents: 100_00,
            block_enabled: true,
        }
    }

    #[test]
    fn quiet_history_allows() {
        let (score, flags) = score_rules(0, 0, 50_00, &config());
        assert_eq!(score, 0);
        assert!(flags.is_empty());
        assert_eq!(action_for_score(score, true), RiskAction::Allow);
    }

    #[test]
    fn velocity_alone_blocks() {
        let (score, flags) = score_rules(5, 0, 50_00, &config());
        assert_eq!(score, 70);
        assert_eq!(flags, vec!["velocity"]);
        assert_eq!(action_for_score(score, true), RiskAction::Block);
    }

    #[test]
    fn failures_alone_only_reviews() {
        let (score, flags) = score_rules(2, 3, 50_00, &config());
        assert_eq!(score, 50);
        assert_eq!(flags, vec!["rapid_failures"]);
        assert_eq!(action_for_score(score, true), RiskAction::Review);
    }

    #[test]
    fn high_amount_alone_reviews() {
        let (score, flags) = score_rules(0, 0, 150_00, &config());
        assert_eq!(score, 40);
        assert_eq!(flags, vec!["high_amount"]);
        assert_eq!(action_for_score(score, true), RiskAction::Review);
    }

    #[test]
    fn zero_ceiling_disables_amount_rule() {
        let mut cfg = config();
        cfg.max_amount_cents = 0;
        let (score, flags) = score_rules(0, 0, i64::MAX, &cfg);
        assert_eq!(score, 0);
        assert!(flags.is_empty());
    }

    #[test]
    fn flags_stack_and_first_flag_wins_rule_code() {
        let (score, flags) = score_rules(6, 4, 150_00, &config());
        assert_eq!(score, 160);
        assert_eq!(flags, vec!["velocity", "rapid_failures", "high_amount"]);
        assert_eq!(flags.first().copied().unwrap_or("ok"), "velocity");
    }

    #[test]
    fn disabled_blocking_downgrades_to_review() {
        assert_eq!(action_for_score(70, false), RiskAction::Review);
        assert_eq!(action_for_score(70, true), RiskAction::Block);
    }
}
