use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

text_enum! {
    PayType {
        Hourly => "hourly",
        Daily => "daily",
        Monthly => "monthly",
    }
}

text_enum! {
    AttendanceStatus {
        Present => "present",
        Late => "late",
        Absent => "absent",
        Leave => "leave",
    }
}

impl AttendanceStatus {
    pub fn counts_as_worked(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

text_enum! {
    PayrollStatus {
        Draft => "draft",
        Paid => "paid",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Employee {
    pub id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub pay_type: String,
    pub pay_rate: Decimal,
    pub hired_at: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attendance {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub work_date: NaiveDate,
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
    pub status: String,
    pub hours_worked: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payslip {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub days_present: i32,
    pub days_late: i32,
    pub hours_worked: Decimal,
    pub base_pay: Decimal,
    pub bonus: Decimal,
    pub deductions: Decimal,
    pub late_penalty: Decimal,
    pub net_pay: Decimal,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
