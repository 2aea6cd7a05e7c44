use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{Attendance, AttendanceStatus, PayType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    /// Present and late days together.
    pub days_present: i32,
    pub days_late: i32,
    pub hours_worked: Decimal,
}

impl AttendanceSummary {
    pub fn from_records(records: &[Attendance]) -> Self {
        records.iter().fold(Self::default(), |mut acc, record| {
            match record.status.parse::<AttendanceStatus>() {
                Ok(status) if status.counts_as_worked() => {
                    acc.days_present += 1;
                    if status == AttendanceStatus::Late {
                        acc.days_late += 1;
                    }
                    acc.hours_worked += record.hours_worked;
                }
                _ => {}
            }
            acc
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PayBreakdown {
    pub base_pay: Decimal,
    pub bonus: Decimal,
    pub deductions: Decimal,
    pub late_penalty: Decimal,
    pub net_pay: Decimal,
}

pub fn compute_pay(
    summary: &AttendanceSummary,
    pay_type: PayType,
    pay_rate: Decimal,
    bonus: Decimal,
    deductions: Decimal,
    late_penalty_per_day: Decimal,
) -> PayBreakdown {
    let base_pay = match pay_type {
        PayType::Hourly => summary.hours_worked * pay_rate,
        PayType::Daily => Decimal::from(summary.days_present) * pay_rate,
        PayType::Monthly => pay_rate,
    }
    .round_dp(2);
    let late_penalty = (Decimal::from(summary.days_late) * late_penalty_per_day).round_dp(2);

    PayBreakdown {
        base_pay,
        bonus,
        deductions,
        late_penalty,
        net_pay: net_pay(base_pay, bonus, deductions, late_penalty),
    }
}

/// Never negative, rounded to cents.
pub fn net_pay(base_pay: Decimal, bonus: Decimal, deductions: Decimal, late_penalty: Decimal) -> Decimal {
    (base_pay + bonus - deductions - late_penalty)
        .max(Decimal::ZERO)
        .round_dp(2)
}
