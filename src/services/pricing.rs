use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_fee: Decimal,
    pub total: Decimal,
}

/// Largest value a `NUMERIC(12,2)` money column holds: 9 999 999 999.99.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2);

fn bounded(amount: Option<Decimal>) -> Result<Decimal, AppError> {
    amount
        .map(|a| a.round_dp(2))
        .filter(|a| a.abs() <= MAX_AMOUNT)
        .ok_or_else(|| AppError::validation("order amount is too large"))
}

impl OrderTotals {
    /// Totals for `(quantity, unit_price)` lines. The discount never exceeds the
    /// subtotal, so a shrunken order can't go negative.
    pub fn compute<I>(lines: I, discount: Decimal, shipping_fee: Decimal) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (i32, Decimal)>,
    {
        let subtotal = lines
            .into_iter()
            .try_fold(Decimal::ZERO, |acc, (quantity, unit_price)| {
                bounded(acc.checked_add(line_total(quantity, unit_price)?))
            })?;
        let discount = discount.max(Decimal::ZERO).min(subtotal);
        let shipping_fee = bounded(Some(shipping_fee.max(Decimal::ZERO)))?;
        let total = bounded((subtotal - discount).checked_add(shipping_fee))?;

        Ok(Self {
            subtotal,
            discount,
            shipping_fee,
            total,
        })
    }
}

pub fn line_total(quantity: i32, unit_price: Decimal) -> Result<Decimal, AppError> {
    bounded(Decimal::from(quantity).checked_mul(unit_price))
}

/// `PREFIX-YYYYMMDD-XXXXXX`, the suffix taken from a fresh v4 uuid.
pub fn generate_number(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect();
    format!(
        "{}-{}-{}",
        prefix,
        now.format("%Y%m%d"),
        suffix.to_uppercase()
    )
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Option<Decimal>,
}

/// Validates requested lines and folds repeated products into one line.
/// The first explicit price for a product wins.
pub fn merge_lines(lines: Vec<LineRequest>) -> Result<Vec<LineRequest>, AppError> {
    if lines.is_empty() {
        return Err(AppError::validation("an order needs at least one item"));
    }

    let mut merged: Vec<LineRequest> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity <= 0 {
            return Err(AppError::validation("item quantities must be positive"));
        }
        if line.unit_price.is_some_and(|p| p < Decimal::ZERO) {
            return Err(AppError::validation("unit prices cannot be negative"));
        }
        if line.unit_price.is_some_and(|p| p > MAX_AMOUNT) {
            return Err(AppError::validation("unit price is too large"));
        }

        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(line.quantity)
                    .ok_or_else(|| AppError::validation("item quantity is too large"))?;
                if existing.unit_price.is_none() {
                    existing.unit_price = line.unit_price;
                }
            }
            None => merged.push(line),
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn totals_include_discount_and_shipping() {
        let totals = OrderTotals::compute(
            vec![(2, dec("12.50")), (1, dec("30.00"))],
            dec("5.00"),
            dec("8.00"),
        )
        .unwrap();
        assert_eq!(totals.subtotal, dec("55.00"));
        assert_eq!(totals.total, dec("58.00"));
    }

    #[test]
    fn discount_is_clamped_to_subtotal() {
        let totals = OrderTotals::compute(vec![(1, dec("10.00"))], dec("25.00"), dec("3.00")).unwrap();
        assert_eq!(totals.discount, dec("10.00"));
        assert_eq!(totals.total, dec("3.00"));
    }

    #[test]
    fn empty_order_totals_to_shipping_only() {
        let totals = OrderTotals::compute(Vec::new(), dec("2.00"), Decimal::ZERO).unwrap();
        assert_eq!(totals.subtotal, Decimal::ZERO);
        assert_eq!(totals.discount, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn numbers_carry_prefix_and_date() {
        let now = DateTime::parse_from_rfc3339("2026-10-19T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let number = generate_number("WHS", now);
        assert!(number.starts_with("WHS-20261019-"));
        assert_eq!(number.len(), "WHS-20261019-".len() + 6);
        assert_ne!(number, generate_number("WHS", now));
    }

    #[test]
    fn repeated_products_are_merged() {
        let beans = Uuid::new_v4();
        let cups = Uuid::new_v4();
        let merged = merge_lines(vec![
            LineRequest { product_id: beans, quantity: 2, unit_price: None },
            LineRequest { product_id: cups, quantity: 10, unit_price: None },
            LineRequest { product_id: beans, quantity: 3, unit_price: Some(dec("99.00")) },
        ])
        .unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].quantity, 5);
        assert_eq!(merged[0].unit_price, Some(dec("99.00")));
    }

    #[test]
    fn invalid_lines_are_rejected() {
        let id = Uuid::new_v4();
        assert!(merge_lines(Vec::new()).is_err());
        assert!(merge_lines(vec![LineRequest { product_id: id, quantity: 0, unit_price: None }]).is_err());
        assert!(merge_lines(vec![LineRequest {
            product_id: id,
            quantity: 1,
            unit_price: Some(dec("-1")),
        }])
        .is_err());
    }

    #[test]
    fn max_amount_matches_the_money_column() {
        assert_eq!(MAX_AMOUNT, dec("9999999999.99"));
    }

    #[test]
    fn oversized_prices_are_rejected_before_arithmetic() {
        let id = Uuid::new_v4();
        assert!(matches!(
            merge_lines(vec![LineRequest {
                product_id: id,
                quantity: 2,
                unit_price: Some(Decimal::MAX),
            }]),
            Err(AppError::Validation(_))
        ));
        assert!(merge_lines(vec![LineRequest {
            product_id: id,
            quantity: 1,
            unit_price: Some(MAX_AMOUNT),
        }])
        .is_ok());
    }

    #[rstest]
    #[case::line_overflows_decimal(vec![(2, Decimal::MAX)], Decimal::ZERO)]
    #[case::line_exceeds_column(vec![(2, MAX_AMOUNT)], Decimal::ZERO)]
    #[case::subtotal_exceeds_column(vec![(1, MAX_AMOUNT), (1, dec("0.01"))], Decimal::ZERO)]
    #[case::shipping_overflows(vec![(1, dec("1.00"))], Decimal::MAX)]
    fn runaway_totals_are_validation_errors(#[case] lines: Vec<(i32, Decimal)>, #[case] shipping: Decimal) {
        assert!(matches!(
            OrderTotals::compute(lines, Decimal::ZERO, shipping),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn line_total_rounds_to_cents() {
        assert_eq!(line_total(3, dec("0.333")).unwrap(), dec("1.00"));
        assert!(line_total(i32::MAX, MAX_AMOUNT).is_err());
    }
}
