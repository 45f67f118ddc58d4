//! Diff and notification policy
//!
//! Pure functions deciding, per observation, which notifications fire,
//! what baseline gets written back and whether a history row is appended.

use crate::domain::{NotifyRule, TrackedItem, VariantBlock};

/// What one cycle observed for an item's selected variant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub basic: i64,
    pub sale: i64,
    pub qty: i64,
}

impl From<&VariantBlock> for Observation {
    fn from(variant: &VariantBlock) -> Self {
        Self {
            basic: variant.price.basic,
            sale: variant.price.sale,
            qty: variant.qty,
        }
    }
}

/// Which notifications fire for one observation; all applicable rules may
/// fire together
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NotifySet {
    pub price_drop: bool,
    pub stock_out: bool,
    pub stock_in: bool,
}

impl NotifySet {
    pub fn any(&self) -> bool {
        self.price_drop || self.stock_out || self.stock_in
    }
}

/// Evaluate the notification policy against the stored baseline.
///
/// Price drops require a known prior price and are gated by the item's
/// rule; stock transitions require a known prior quantity and are gated by
/// the owner's tier (`stock_alerts`).
pub fn evaluate(item: &TrackedItem, obs: Observation, stock_alerts: bool) -> NotifySet {
    let mut set = NotifySet::default();

    if let Some(old) = item.last_sale_price {
        if obs.sale < old {
            set.price_drop = match item.rule {
                NotifyRule::Any => true,
                NotifyRule::Percent(p) => {
                    (old - obs.sale) as f64 / old as f64 * 100.0 >= p
                }
                NotifyRule::Threshold(t) => obs.sale <= t,
            };
        }
    }

    if stock_alerts {
        if let Some(old_qty) = item.last_qty {
            set.stock_out = old_qty > 0 && obs.qty == 0;
            set.stock_in = old_qty == 0 && obs.qty > 0;
        }
    }

    set
}

/// Baseline written back to the store after an observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineUpdate {
    pub basic: i64,
    pub sale: i64,
    pub qty: i64,
    pub out_of_stock: bool,
}

/// The observation overwrites the baseline, except that a sold-out
/// observation keeps the prior prices and only flips the stock flag.
pub fn baseline_update(item: &TrackedItem, obs: Observation) -> BaselineUpdate {
    if obs.qty == 0 {
        BaselineUpdate {
            basic: item.last_basic_price.unwrap_or(obs.basic),
            sale: item.last_sale_price.unwrap_or(obs.sale),
            qty: 0,
            out_of_stock: true,
        }
    } else {
        BaselineUpdate {
            basic: obs.basic,
            sale: obs.sale,
            qty: obs.qty,
            out_of_stock: false,
        }
    }
}

/// A history row is appended only for in-stock observations whose sale
/// price differs from the stored baseline — unchanged prices produce no
/// duplicate rows.
pub fn should_append_history(item: &TrackedItem, obs: Observation) -> bool {
    obs.qty > 0 && item.last_sale_price != Some(obs.sale)
}
