use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

use crate::models::FinancePeriod;

/// Order-side sums over a date range (cancelled orders excluded).
#[derive(Debug, Clone, Default, FromRow)]
pub struct SalesAggregates {
    pub order_count: i64,
    pub gross_sales: Decimal,
    pub discounts: Decimal,
    pub shipping_income: Decimal,
    pub billed: Decimal,
    pub returns: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct CostAggregates {
    pub cogs: Decimal,
    pub shipping_costs: Decimal,
    pub shortage_refunds: Decimal,
    pub operating_expenses: Decimal,
    pub payroll_cost: Decimal,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChannelBreakdown {
    pub channel: String,
    pub order_count: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinanceActuals {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub order_count: i64,
    pub gross_sales: Decimal,
    pub discounts: Decimal,
    pub shipping_income: Decimal,
    pub returns: Decimal,
    pub net_revenue: Decimal,
    pub cogs: Decimal,
    pub gross_profit: Decimal,
    pub gross_margin_pct: Option<Decimal>,
    pub shipping_costs: Decimal,
    pub shortage_refunds: Decimal,
    pub operating_expenses: Decimal,
    pub payroll_cost: Decimal,
    pub total_expenses: Decimal,
    pub net_profit: Decimal,
    pub average_order_value: Option<Decimal>,
    pub by_channel: Vec<ChannelBreakdown>,
}

impl FinanceActuals {
    pub fn derive(
        date_from: NaiveDate,
        date_to: NaiveDate,
        sales: SalesAggregates,
        costs: CostAggregates,
        by_channel: Vec<ChannelBreakdown>,
    ) -> Self {
        let net_revenue = (sales.billed - sales.returns).round_dp(2);
        let gross_profit = net_revenue - costs.cogs;
        let total_expenses =
            costs.cogs + costs.shipping_costs + costs.operating_expenses + costs.payroll_cost;

        Self {
            date_from,
            date_to,
            order_count: sales.order_count,
            gross_sales: sales.gross_sales,
            discounts: sales.discounts,
            shipping_income: sales.shipping_income,
            returns: sales.returns,
            net_revenue,
            cogs: costs.cogs,
            gross_profit,
            gross_margin_pct: percentage(gross_profit, net_revenue),
            shipping_costs: costs.shipping_costs,
            shortage_refunds: costs.shortage_refunds,
            operating_expenses: costs.operating_expenses,
            payroll_cost: costs.payroll_cost,
            total_expenses,
            net_profit: net_revenue - total_expenses,
            average_order_value: (sales.order_count > 0)
                .then(|| (net_revenue / Decimal::from(sales.order_count)).round_dp(2)),
            by_channel,
        }
    }
}

/// `part / whole` as a percentage with two decimals; `None` when `whole` is zero.
pub fn percentage(part: Decimal, whole: Decimal) -> Option<Decimal> {
    if whole.is_zero() {
        None
    } else {
        Some((part / whole * Decimal::ONE_HUNDRED).round_dp(2))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variance {
    pub planned: Decimal,
    pub actual: Decimal,
    pub difference: Decimal,
    pub achievement_pct: Option<Decimal>,
}

impl Variance {
    pub fn new(planned: Decimal, actual: Decimal) -> Self {
        Self {
            planned,
            actual,
            difference: actual - planned,
            achievement_pct: if planned > Decimal::ZERO {
                percentage(actual, planned)
            } else {
                None
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub period: FinancePeriod,
    pub revenue: Variance,
    pub expenses: Variance,
    pub orders: Variance,
    pub actuals: FinanceActuals,
}

pub fn compare(period: FinancePeriod, actuals: FinanceActuals) -> PlanReport {
    PlanReport {
        revenue: Variance::new(period.planned_revenue, actuals.net_revenue),
        expenses: Variance::new(period.planned_expenses, actuals.total_expenses),
        orders: Variance::new(
            Decimal::from(period.planned_orders),
            Decimal::from(actuals.order_count),
        ),
        period,
        actuals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn sample_actuals() -> FinanceActuals {
        FinanceActuals::derive(
            day(19),
            day(25),
            SalesAggregates {
                order_count: 4,
                gross_sales: dec("1000.00"),
                discounts: dec("50.00"),
                shipping_income: dec("30.00"),
                billed: dec("980.00"),
                returns: dec("80.00"),
            },
            CostAggregates {
                cogs: dec("540.00"),
                shipping_costs: dec("40.00"),
                shortage_refunds: dec("25.00"),
                operating_expenses: dec("100.00"),
                payroll_cost: dec("120.00"),
            },
            Vec::new(),
        )
    }

    #[test]
    fn actuals_are_derived_from_aggregates() {
        let actuals = sample_actuals();
        assert_eq!(actuals.net_revenue, dec("900.00"));
        assert_eq!(actuals.gross_profit, dec("360.00"));
        assert_eq!(actuals.gross_margin_pct, Some(dec("40.00")));
        assert_eq!(actuals.total_expenses, dec("800.00"));
        assert_eq!(actuals.net_profit, dec("100.00"));
        assert_eq!(actuals.average_order_value, Some(dec("225.00")));
    }

    #[test]
    fn empty_range_has_no_ratios() {
        let actuals = FinanceActuals::derive(
            day(1),
            day(31),
            SalesAggregates::default(),
            CostAggregates::default(),
            Vec::new(),
        );
        assert_eq!(actuals.gross_margin_pct, None);
        assert_eq!(actuals.average_order_value, None);
        assert_eq!(actuals.net_profit, Decimal::ZERO);
    }

    #[test]
    fn plan_is_compared_against_actuals() {
        let period = FinancePeriod {
            id: Uuid::new_v4(),
            period_type: "weekly".into(),
            start_date: day(19),
            end_date: day(25),
            planned_revenue: dec("1200.00"),
            planned_expenses: dec("800.00"),
            planned_orders: 0,
            notes: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let report = compare(period, sample_actuals());

        assert_eq!(report.revenue.difference, dec("-300.00"));
        assert_eq!(report.revenue.achievement_pct, Some(dec("75.00")));
        assert_eq!(report.expenses.achievement_pct, Some(dec("100.00")));
        assert_eq!(report.orders.achievement_pct, None);
        assert_eq!(report.orders.difference, Decimal::from(4));
    }
}
