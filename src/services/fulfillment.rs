//! Matching order lines against available stock when a delivery is created.
//!
//! Stock is counted per product at the order's location. When something is
//! short the caller either gets the shortage list back or, with `force_refund`,
//! a plan that ships what exists: lines shrink or disappear and the order total
//! drops accordingly.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::pricing::line_total;

#[derive(Debug, Clone)]
pub struct OrderLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortage {
    pub product_id: Uuid,
    pub product_name: String,
    pub requested: i64,
    pub available: i64,
    pub missing: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Full,
    Reduced,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub requested: i32,
    pub fulfilled: i32,
    pub unit_price: Decimal,
}

impl PlannedLine {
    pub fn outcome(&self) -> LineOutcome {
        if self.fulfilled == self.requested {
            LineOutcome::Full
        } else if self.fulfilled == 0 {
            LineOutcome::Removed
        } else {
            LineOutcome::Reduced
        }
    }

    pub fn line_total(&self) -> Result<Decimal, AppError> {
        line_total(self.fulfilled, self.unit_price)
    }
}

#[derive(Debug)]
pub struct DeliveryPlan {
    pub lines: Vec<PlannedLine>,
    /// Empty unless the plan was forced through a shortage.
    pub shortages: Vec<Shortage>,
}

impl DeliveryPlan {
    /// Units to pull from stock per product, in order-line order.
    pub fn units_by_product(&self) -> Vec<(Uuid, i64)> {
        let mut units: Vec<(Uuid, i64)> = Vec::new();
        for line in self.lines.iter().filter(|l| l.fulfilled > 0) {
            match units.iter_mut().find(|(id, _)| *id == line.product_id) {
                Some((_, n)) => *n += i64::from(line.fulfilled),
                None => units.push((line.product_id, i64::from(line.fulfilled))),
            }
        }
        units
    }

    /// `(quantity, unit_price)` of the lines that survive, for re-totalling.
    pub fn kept_lines(&self) -> impl Iterator<Item = (i32, Decimal)> + '_ {
        self.lines
            .iter()
            .filter(|l| l.fulfilled > 0)
            .map(|l| (l.fulfilled, l.unit_price))
    }

    pub fn is_partial(&self) -> bool {
        self.lines.iter().any(|l| l.outcome() != LineOutcome::Full)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PlanError {
    EmptyOrder,
    Short(Vec<Shortage>),
    NothingToDeliver(Vec<Shortage>),
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::EmptyOrder => AppError::validation("order has no items to deliver"),
            PlanError::Short(shortages) => AppError::InsufficientStock(shortages),
            PlanError::NothingToDeliver(_) => {
                AppError::validation("none of the ordered products are in stock")
            }
        }
    }
}

/// Products whose total requested quantity exceeds what is available,
/// in the order they first appear.
pub fn find_shortages(lines: &[OrderLine], available: &HashMap<Uuid, i64>) -> Vec<Shortage> {
    let mut requested: Vec<(Uuid, &str, i64)> = Vec::new();
    for line in lines {
        match requested.iter_mut().find(|(id, _, _)| *id == line.product_id) {
            Some((_, _, qty)) => *qty += i64::from(line.quantity),
            None => requested.push((line.product_id, line.product_name.as_str(), i64::from(line.quantity))),
        }
    }

    requested
        .into_iter()
        .filter_map(|(product_id, name, requested)| {
            let available = available.get(&product_id).copied().unwrap_or(0).max(0);
            (requested > available).then(|| Shortage {
                product_id,
                product_name: name.to_string(),
                requested,
                available,
                missing: requested - available,
            })
        })
        .collect()
}

pub fn plan_delivery(
    lines: &[OrderLine],
    available: &HashMap<Uuid, i64>,
    force_refund: bool,
) -> Result<DeliveryPlan, PlanError> {
    if lines.is_empty() {
        return Err(PlanError::EmptyOrder);
    }

    let shortages = find_shortages(lines, available);
    if !shortages.is_empty() && !force_refund {
        return Err(PlanError::Short(shortages));
    }

    // Lines for the same product draw from one pool, first line first.
    let mut remaining: HashMap<Uuid, i64> = HashMap::new();
    let planned: Vec<PlannedLine> = lines
        .iter()
        .map(|line| {
            let pool = remaining
                .entry(line.product_id)
                .or_insert_with(|| available.get(&line.product_id).copied().unwrap_or(0).max(0));
            let take = i64::from(line.quantity).min(*pool);
            *pool -= take;
            PlannedLine {
                item_id: line.item_id,
                product_id: line.product_id,
                requested: line.quantity,
                fulfilled: i32::try_from(take).unwrap_or(line.quantity),
                unit_price: line.unit_price,
            }
        })
        .collect();

    if planned.iter().all(|l| l.fulfilled == 0) {
        return Err(PlanError::NothingToDeliver(shortages));
    }

    Ok(DeliveryPlan {
        lines: planned,
        shortages,
    })
}

/// Money owed back to the customer when a forced plan lowers the order total.
pub fn refund_amount(old_total: Decimal, new_total: Decimal) -> Decimal {
    (old_total - new_total).max(Decimal::ZERO).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pricing::OrderTotals;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn line(product_id: Uuid, name: &str, quantity: i32, price: &str) -> OrderLine {
        OrderLine {
            item_id: Uuid::new_v4(),
            product_id,
            product_name: name.to_string(),
            quantity,
            unit_price: dec(price),
        }
    }

    fn stock(entries: &[(Uuid, i64)]) -> HashMap<Uuid, i64> {
        entries.iter().copied().collect()
    }

    #[test]
    fn full_stock_plans_every_line_unchanged() {
        let beans = Uuid::new_v4();
        let lines = vec![line(beans, "Beans", 3, "10.00")];

        let plan = plan_delivery(&lines, &stock(&[(beans, 5)]), false).unwrap();

        assert!(!plan.is_partial());
        assert!(plan.shortages.is_empty());
        assert_eq!(plan.units_by_product(), vec![(beans, 3)]);
    }

    #[test]
    fn shortage_without_force_lists_missing_units() {
        let beans = Uuid::new_v4();
        let cups = Uuid::new_v4();
        let lines = vec![line(beans, "Beans", 4, "10.00"), line(cups, "Cups", 2, "1.00")];

        let err = plan_delivery(&lines, &stock(&[(beans, 1), (cups, 5)]), false).unwrap_err();

        assert_eq!(
            err,
            PlanError::Short(vec![Shortage {
                product_id: beans,
                product_name: "Beans".into(),
                requested: 4,
                available: 1,
                missing: 3,
            }])
        );
    }

    #[test]
    fn forced_plan_shrinks_and_removes_lines() {
        let beans = Uuid::new_v4();
        let cups = Uuid::new_v4();
        let syrup = Uuid::new_v4();
        let lines = vec![
            line(beans, "Beans", 4, "10.00"),
            line(cups, "Cups", 2, "1.00"),
            line(syrup, "Syrup", 1, "7.00"),
        ];

        let plan = plan_delivery(&lines, &stock(&[(beans, 1), (cups, 5)]), true).unwrap();

        let outcomes: Vec<_> = plan.lines.iter().map(PlannedLine::outcome).collect();
        assert_eq!(
            outcomes,
            vec![LineOutcome::Reduced, LineOutcome::Full, LineOutcome::Removed]
        );
        assert_eq!(plan.shortages.len(), 2);
        assert_eq!(plan.units_by_product(), vec![(beans, 1), (cups, 2)]);

        let before = OrderTotals::compute(
            lines.iter().map(|l| (l.quantity, l.unit_price)),
            Decimal::ZERO,
            dec("5.00"),
        )
        .unwrap();
        let after = OrderTotals::compute(plan.kept_lines(), Decimal::ZERO, dec("5.00")).unwrap();
        assert_eq!(after.total, dec("17.00"));
        assert_eq!(refund_amount(before.total, after.total), dec("37.00"));
    }

    #[test]
    fn lines_of_the_same_product_share_stock() {
        let beans = Uuid::new_v4();
        let lines = vec![line(beans, "Beans", 2, "10.00"), line(beans, "Beans", 2, "9.00")];

        let err = plan_delivery(&lines, &stock(&[(beans, 3)]), false).unwrap_err();
        match err {
            PlanError::Short(shortages) => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].requested, 4);
                assert_eq!(shortages[0].missing, 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        let plan = plan_delivery(&lines, &stock(&[(beans, 3)]), true).unwrap();
        assert_eq!(plan.lines[0].fulfilled, 2);
        assert_eq!(plan.lines[1].fulfilled, 1);
        assert_eq!(plan.units_by_product(), vec![(beans, 3)]);
    }

    #[test]
    fn forcing_with_no_stock_at_all_is_an_error() {
        let beans = Uuid::new_v4();
        let lines = vec![line(beans, "Beans", 2, "10.00")];

        let err = plan_delivery(&lines, &HashMap::new(), true).unwrap_err();
        assert!(matches!(err, PlanError::NothingToDeliver(ref s) if s.len() == 1));
    }

    #[test]
    fn empty_order_cannot_be_planned() {
        assert_eq!(
            plan_delivery(&[], &HashMap::new(), true).unwrap_err(),
            PlanError::EmptyOrder
        );
    }

    #[test]
    fn refund_never_goes_negative() {
        assert_eq!(refund_amount(dec("10.00"), dec("12.00")), Decimal::ZERO);
    }
}
