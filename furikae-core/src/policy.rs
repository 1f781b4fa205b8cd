//! Expiry and eligibility policy.
//!
//! The deadline of a ticket is decided once, at issuance, by an
//! [`ExpiryPolicy`]. Term lengths differ between contracts, so the issuer
//! resolves a policy per contract through a [`PolicyTable`] instead of
//! applying one fixed rule.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Facts available to a policy when a ticket is being issued.
#[derive(Debug, Clone)]
pub struct PolicyContext<'a> {
    pub contract_id: &'a str,
    pub brand_id: &'a str,
    pub absence_date: NaiveDate,
    pub issued_at: DateTime<Utc>,
}

pub trait ExpiryPolicy: Send + Sync {
    /// Deadline for a ticket issued under `ctx`. Tickets are redeemable strictly before it.
    fn expires_at(&self, ctx: &PolicyContext<'_>) -> DateTime<Utc>;

    fn name(&self) -> String {
        "custom".to_string()
    }
}

/// Built-in rules, loadable from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpiryRule {
    /// `days` after issuance.
    FixedWindow { days: i64 },
    /// End of the calendar-month billing cycle `cycles_ahead` cycles after
    /// the one containing the issuance date. `cycles_ahead = 1` means
    /// "last day of the following billing cycle".
    BillingCycleEnd { cycles_ahead: u32 },
}

impl ExpiryPolicy for ExpiryRule {
    fn expires_at(&self, ctx: &PolicyContext<'_>) -> DateTime<Utc> {
        match self {
            ExpiryRule::FixedWindow { days } => Duration::try_days(*days)
                .and_then(|window| ctx.issued_at.checked_add_signed(window))
                .unwrap_or(ctx.issued_at),
            ExpiryRule::BillingCycleEnd { cycles_ahead } => {
                let issued = ctx.issued_at.date_naive();
                NaiveDate::from_ymd_opt(issued.year(), issued.month(), 1)
                    .and_then(|first| first.checked_add_months(Months::new(cycles_ahead.saturating_add(1))))
                    .map(|boundary| boundary.and_time(NaiveTime::MIN).and_utc())
                    .unwrap_or(ctx.issued_at)
            }
        }
    }

    fn name(&self) -> String {
        match self {
            ExpiryRule::FixedWindow { days } => format!("fixed_window({} days)", days),
            ExpiryRule::BillingCycleEnd { cycles_ahead } => {
                format!("billing_cycle_end({} ahead)", cycles_ahead)
            }
        }
    }
}

/// Adapts a plain function into a policy.
pub struct FnPolicy<F>(pub F);

impl<F> ExpiryPolicy for FnPolicy<F>
where
    F: Fn(&PolicyContext<'_>) -> DateTime<Utc> + Send + Sync,
{
    fn expires_at(&self, ctx: &PolicyContext<'_>) -> DateTime<Utc> {
        (self.0)(ctx)
    }
}

/// Default policy plus per-contract overrides.
#[derive(Clone)]
pub struct PolicyTable {
    default: Arc<dyn ExpiryPolicy>,
    by_contract: HashMap<String, Arc<dyn ExpiryPolicy>>,
}

impl PolicyTable {
    pub fn new(default: Arc<dyn ExpiryPolicy>) -> Self {
        Self { default, by_contract: HashMap::new() }
    }

    pub fn from_rules(default: ExpiryRule, overrides: &HashMap<String, ExpiryRule>) -> Self {
        let mut table = Self::new(Arc::new(default));
        for (contract_id, rule) in overrides {
            table = table.with_contract(contract_id.clone(), Arc::new(rule.clone()));
        }
        table
    }

    pub fn with_contract(mut self, contract_id: impl Into<String>, policy: Arc<dyn ExpiryPolicy>) -> Self {
        self.by_contract.insert(contract_id.into(), policy);
        self
    }

    pub fn policy_for(&self, contract_id: &str) -> &dyn ExpiryPolicy {
        self.by_contract
            .get(contract_id)
            .map(|p| p.as_ref())
            .unwrap_or(self.default.as_ref())
    }
}

impl ExpiryPolicy for PolicyTable {
    fn expires_at(&self, ctx: &PolicyContext<'_>) -> DateTime<Utc> {
        self.policy_for(ctx.contract_id).expires_at(ctx)
    }

    fn name(&self) -> String {
        self.default.name()
    }
}

/// Which slot brands a ticket of a given brand may redeem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EligibilityRules {
    #[serde(default)]
    cross: HashMap<String, Vec<String>>,
}

impl EligibilityRules {
    pub fn new(cross: HashMap<String, Vec<String>>) -> Self {
        Self { cross }
    }

    /// The ticket's own brand first, then any explicitly cross-eligible brands.
    pub fn scope_for(&self, brand_id: &str) -> Vec<String> {
        let mut scope = vec![brand_id.to_string()];
        if let Some(extra) = self.cross.get(brand_id) {
            for brand in extra {
                if !scope.contains(brand) {
                    scope.push(brand.clone());
                }
            }
        }
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx(contract_id: &str, issued_at: DateTime<Utc>) -> PolicyContext<'_> {
        PolicyContext {
            contract_id,
            brand_id: "math",
            absence_date: issued_at.date_naive(),
            issued_at,
        }
    }

    #[test]
    fn fixed_window_counts_from_issuance() {
        let issued = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap();
        let rule = ExpiryRule::FixedWindow { days: 30 };
        assert_eq!(rule.expires_at(&ctx("c", issued)), issued + Duration::days(30));

        let broken = ExpiryRule::FixedWindow { days: 0 };
        assert_eq!(broken.expires_at(&ctx("c", issued)), issued);
    }

    #[test]
    fn billing_cycle_end_is_exclusive_month_boundary() {
        let issued = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let rule = ExpiryRule::BillingCycleEnd { cycles_ahead: 1 };
        // Redeemable through the last day of February.
        assert_eq!(
            rule.expires_at(&ctx("c", issued)),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
        );

        let year_end = Utc.with_ymd_and_hms(2026, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(
            rule.expires_at(&ctx("c", year_end)),
            Utc.with_ymd_and_hms(2027, 2, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn table_resolves_contract_override() {
        let issued = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
        let mut overrides = HashMap::new();
        overrides.insert("short".to_string(), ExpiryRule::FixedWindow { days: 7 });
        let table = PolicyTable::from_rules(ExpiryRule::FixedWindow { days: 60 }, &overrides);

        assert_eq!(table.expires_at(&ctx("short", issued)), issued + Duration::days(7));
        assert_eq!(table.expires_at(&ctx("other", issued)), issued + Duration::days(60));

        let custom = table.with_contract(
            "fn",
            Arc::new(FnPolicy(|c: &PolicyContext<'_>| c.issued_at + Duration::hours(1))),
        );
        assert_eq!(custom.expires_at(&ctx("fn", issued)), issued + Duration::hours(1));
    }

    #[test]
    fn eligibility_scope_includes_cross_brands_once() {
        let mut cross = HashMap::new();
        cross.insert("math".to_string(), vec!["math-online".to_string(), "math".to_string()]);
        let rules = EligibilityRules::new(cross);

        assert_eq!(rules.scope_for("math"), vec!["math".to_string(), "math-online".to_string()]);
        assert_eq!(rules.scope_for("english"), vec!["english".to_string()]);
    }

    #[test]
    fn rules_deserialize_from_tagged_config() {
        let rule: ExpiryRule =
            serde_json::from_value(serde_json::json!({"kind": "billing_cycle_end", "cycles_ahead": 2})).unwrap();
        assert_eq!(rule, ExpiryRule::BillingCycleEnd { cycles_ahead: 2 });
    }
}
