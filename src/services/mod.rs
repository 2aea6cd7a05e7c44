//! Business rules that do not need a database connection.
//!
//! Handlers load rows, hand them to these functions, and persist the result,
//! which keeps the arithmetic and branching testable on its own.

pub mod attendance;
pub mod finance;
pub mod fulfillment;
pub mod payroll;
pub mod pricing;
