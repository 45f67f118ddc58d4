//! Tracked items and notification rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder name assigned when an item is added before its first fetch
pub const NAME_PLACEHOLDER: &str = "(pending)";

/// When a price-drop notification should fire.
///
/// `Percent` and `Threshold` gate on the drop size; `Any` fires on every
/// decrease.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum NotifyRule {
    Any,
    Percent(f64),
    Threshold(i64),
}

impl NotifyRule {
    /// Reconstruct a rule from its stored (mode, value) columns
    pub fn from_parts(mode: &str, value: f64) -> Self {
        match mode {
            "percent" => NotifyRule::Percent(value),
            "threshold" => NotifyRule::Threshold(value as i64),
            _ => NotifyRule::Any,
        }
    }

    /// Decompose into (mode, value) columns for storage
    pub fn as_parts(&self) -> (&'static str, f64) {
        match self {
            NotifyRule::Any => ("any", 0.0),
            NotifyRule::Percent(p) => ("percent", *p),
            NotifyRule::Threshold(t) => ("threshold", *t as f64),
        }
    }
}

/// Subscription tier of an item's owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Basic,
    Pro,
}

impl PlanTier {
    /// Stock-in/stock-out notifications are reserved for paid tiers
    pub fn stock_alerts(&self) -> bool {
        !matches!(self, PlanTier::Free)
    }

    /// Only Pro owners see the remaining quantity in stock-in messages
    pub fn shows_quantity(&self) -> bool {
        matches!(self, PlanTier::Pro)
    }
}

impl std::str::FromStr for PlanTier {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        Ok(match s {
            "basic" => PlanTier::Basic,
            "pro" => PlanTier::Pro,
            _ => PlanTier::Free,
        })
    }
}

/// Owner-level settings consulted while processing that owner's items
#[derive(Debug, Clone, Copy)]
pub struct OwnerPrefs {
    /// Marketplace destination (region) code used in detail requests
    pub region: i32,
    pub tier: PlanTier,
}

/// One (owner, external item, optional variant) tuple under observation.
///
/// The price/stock fields are the baseline the next cycle diffs against and
/// are written only by the monitoring pipeline; `variant` and `rule` belong
/// to the subscription collaborator.
#[derive(Debug, Clone)]
pub struct TrackedItem {
    pub id: i64,
    pub owner_id: i64,
    /// Marketplace article number
    pub external_id: i64,
    pub name: String,
    /// Variant (size) selector; None for single-variant items
    pub variant: Option<String>,
    pub last_basic_price: Option<i64>,
    pub last_sale_price: Option<i64>,
    pub last_qty: Option<i64>,
    pub out_of_stock: bool,
    pub rule: NotifyRule,
    pub updated_at: DateTime<Utc>,
}

impl TrackedItem {
    /// Display name, falling back to the article number while the real name
    /// is still pending
    pub fn display_name(&self) -> String {
        if self.name.is_empty() || self.name == NAME_PLACEHOLDER {
            format!("item {}", self.external_id)
        } else {
            self.name.clone()
        }
    }
}

/// One immutable price observation, append-only per item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub item_id: i64,
    pub basic: i64,
    pub sale: i64,
    pub qty: i64,
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_roundtrip() {
        let rule = NotifyRule::from_parts("percent", 12.5);
        assert_eq!(rule, NotifyRule::Percent(12.5));
        assert_eq!(rule.as_parts(), ("percent", 12.5));

        let rule = NotifyRule::from_parts("threshold", 4999.0);
        assert_eq!(rule, NotifyRule::Threshold(4999));

        let rule = NotifyRule::from_parts("anything-else", 7.0);
        assert_eq!(rule, NotifyRule::Any);
        assert_eq!(rule.as_parts(), ("any", 0.0));
    }

    #[test]
    fn test_tier_gates() {
        assert!(!PlanTier::Free.stock_alerts());
        assert!(PlanTier::Basic.stock_alerts());
        assert!(PlanTier::Pro.stock_alerts());
        assert!(!PlanTier::Basic.shows_quantity());
        assert!(PlanTier::Pro.shows_quantity());
    }
}
