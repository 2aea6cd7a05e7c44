use std::{
    path::{Component, PathBuf},
    str::FromStr,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use axum_extra::extract::Multipart;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use tokio::fs;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::AppState,
    error::{AppError, AppResult},
    filters::{non_empty, parse_optional_date, Pagination},
    middleware::authorize,
    models::Expense,
    services::pricing::MAX_AMOUNT,
};

const RECEIPT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Deserialize)]
pub struct ExpenseFilters {
    category: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
}

#[derive(Debug, Default)]
pub struct ExpenseFormData {
    category: Option<String>,
    amount: Option<Decimal>,
    description: Option<String>,
    expense_date: Option<NaiveDate>,
}

pub struct ReceiptData {
    filename: String,
    data: Bytes,
}

/// A complete expense built from the form fields.
#[derive(Debug, PartialEq)]
pub struct ExpenseInput {
    pub category: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub expense_date: NaiveDate,
}

impl ExpenseFormData {
    fn set_field(&mut self, name: &str, value: String) -> Result<(), AppError> {
        let value = value.trim().to_string();
        if value.is_empty() {
            return Ok(());
        }
        match name {
            "category" => self.category = Some(value),
            "amount" => {
                self.amount = Some(
                    Decimal::from_str(&value)
                        .map_err(|_| AppError::bad_request("amount must be a number"))?,
                )
            }
            "description" => self.description = Some(value),
            "expense_date" => {
                self.expense_date = parse_optional_date(Some(&value), "expense_date")?
            }
            _ => (),
        }
        Ok(())
    }

    pub fn into_input(self) -> Result<ExpenseInput, AppError> {
        let (category, amount, expense_date) = match (self.category, self.amount, self.expense_date) {
            (Some(c), Some(a), Some(d)) => (c, a, d),
            _ => {
                return Err(AppError::validation(
                    "category, amount and expense_date are required",
                ))
            }
        };
        if amount <= Decimal::ZERO {
            return Err(AppError::validation("amount must be greater than zero"));
        }
        if amount > MAX_AMOUNT {
            return Err(AppError::validation("amount is too large"));
        }
        Ok(ExpenseInput {
            category,
            amount: amount.round_dp(2),
            description: self.description,
            expense_date,
        })
    }
}

/// Lowercased extension when the upload is an accepted receipt image.
pub fn receipt_extension(filename: &str) -> Option<String> {
    let extension = PathBuf::from(filename)
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)?;
    RECEIPT_EXTENSIONS.contains(&extension.as_str()).then_some(extension)
}

async fn parse_expense_multipart(
    mut multipart: Multipart,
) -> Result<(ExpenseFormData, Option<ReceiptData>), AppError> {
    let mut form_data = ExpenseFormData::default();
    let mut receipt_data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed form: {}", e)))?
    {
        let name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };

        if name == "receipt" {
            let filename = field.file_name().map(|s| s.to_string());
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::bad_request(format!("unreadable receipt: {}", e)))?;
            if let Some(filename) = filename.filter(|_| !data.is_empty()) {
                receipt_data = Some(ReceiptData { filename, data });
            }
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| AppError::bad_request(format!("unreadable field {}: {}", name, e)))?;
            form_data.set_field(&name, text)?;
        }
    }
    Ok((form_data, receipt_data))
}

/// Writes the receipt under `<static_dir>/receipts` and returns its public URL.
async fn save_receipt(static_dir: &str, receipt: Option<ReceiptData>) -> Result<Option<String>, AppError> {
    let Some(receipt) = receipt else {
        return Ok(None);
    };
    let extension = receipt_extension(&receipt.filename).ok_or_else(|| {
        AppError::validation("receipts must be png, jpg or jpeg images")
    })?;

    let receipts_dir = PathBuf::from(static_dir).join("receipts");
    fs::create_dir_all(&receipts_dir)
        .await
        .map_err(|e| AppError::Internal(format!("cannot create receipts dir: {}", e)))?;

    let new_file_name = format!("{}.{}", Uuid::new_v4(), extension);
    fs::write(receipts_dir.join(&new_file_name), &receipt.data)
        .await
        .map_err(|e| AppError::Internal(format!("cannot store receipt: {}", e)))?;

    Ok(Some(format!("/receipts/{}", new_file_name)))
}

/// Where a stored receipt URL lives on disk. Only bare file names under
/// `/receipts/` resolve.
pub fn receipt_path(static_dir: &str, receipt_url: &str) -> Option<PathBuf> {
    let name = receipt_url.strip_prefix("/receipts/")?;
    let mut components = std::path::Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(file)), None) => {
            Some(PathBuf::from(static_dir).join("receipts").join(file))
        }
        _ => None,
    }
}

/// Best effort; a receipt that cannot be removed is logged and left behind.
async fn remove_receipt(static_dir: &str, receipt_url: Option<&str>) {
    let Some(path) = receipt_url.and_then(|url| receipt_path(static_dir, url)) else {
        return;
    };
    if let Err(e) = fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("cannot remove receipt {}: {}", path.display(), e);
        }
    }
}

pub async fn list_expenses(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<ExpenseFilters>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<Expense>>> {
    authorize(&cookies, &state, "expenses:read").await?;

    let date_from = parse_optional_date(filters.date_from.as_deref(), "date_from")?;
    let date_to = parse_optional_date(filters.date_to.as_deref(), "date_to")?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM expenses WHERE TRUE");
    if let Some(category) = non_empty(filters.category.as_deref()) {
        query.push(" AND category = ").push_bind(category);
    }
    if let Some(date) = date_from {
        query.push(" AND expense_date >= ").push_bind(date);
    }
    if let Some(date) = date_to {
        query.push(" AND expense_date <= ").push_bind(date);
    }
    query
        .push(" ORDER BY expense_date DESC, created_at DESC LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

    let expenses = query.build_query_as::<Expense>().fetch_all(&state.db).await?;
    Ok(Json(expenses))
}

pub async fn create_expense(
    State(state): State<AppState>,
    cookies: Cookies,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Expense>)> {
    let user = authorize(&cookies, &state, "expenses:write").await?;
    let (form_data, receipt_data) = parse_expense_multipart(multipart).await?;
    let input = form_data.into_input()?;

    let receipt_url = save_receipt(&state.config.static_dir, receipt_data).await?;

    let inserted = sqlx::query_as::<_, Expense>(
        r#"
        INSERT INTO expenses (category, amount, description, receipt_url, expense_date, created_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&input.category)
    .bind(input.amount)
    .bind(&input.description)
    .bind(&receipt_url)
    .bind(input.expense_date)
    .bind(user.id)
    .fetch_one(&state.db)
    .await;

    let expense = match inserted {
        Ok(expense) => expense,
        Err(e) => {
            remove_receipt(&state.config.static_dir, receipt_url.as_deref()).await;
            return Err(e.into());
        }
    };

    Ok((StatusCode::CREATED, Json(expense)))
}

/// Replaces the expense fields; the stored receipt is kept unless a new one is uploaded.
pub async fn update_expense(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(expense_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Json<Expense>> {
    authorize(&cookies, &state, "expenses:write").await?;
    let (form_data, receipt_data) = parse_expense_multipart(multipart).await?;
    let input = form_data.into_input()?;
    let static_dir = &state.config.static_dir;

    let mut tx = state.db.begin().await?;

    let current = sqlx::query_as::<_, Expense>("SELECT * FROM expenses WHERE id = $1 FOR UPDATE")
        .bind(expense_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("expense"))?;

    let receipt_url = save_receipt(static_dir, receipt_data).await?;

    let updated = async {
        let expense = sqlx::query_as::<_, Expense>(
            r#"
            UPDATE expenses
            SET category = $2, amount = $3, description = $4, expense_date = $5,
                receipt_url = COALESCE($6, receipt_url), updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(expense_id)
        .bind(&input.category)
        .bind(input.amount)
        .bind(&input.description)
        .bind(input.expense_date)
        .bind(&receipt_url)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok::<_, AppError>(expense)
    }
    .await;

    let expense = match updated {
        Ok(expense) => expense,
        Err(e) => {
            remove_receipt(static_dir, receipt_url.as_deref()).await;
            return Err(e);
        }
    };

    if receipt_url.is_some() {
        remove_receipt(static_dir, current.receipt_url.as_deref()).await;
    }

    Ok(Json(expense))
}

pub async fn delete_expense(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(expense_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&cookies, &state, "expenses:write").await?;

    let receipt_url = sqlx::query_scalar::<_, Option<String>>(
        "DELETE FROM expenses WHERE id = $1 RETURNING receipt_url",
    )
    .bind(expense_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("expense"))?;

    remove_receipt(&state.config.static_dir, receipt_url.as_deref()).await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn filled(amount: &str) -> ExpenseFormData {
        let mut form = ExpenseFormData::default();
        form.set_field("category", "rent".into()).unwrap();
        form.set_field("amount", amount.into()).unwrap();
        form.set_field("expense_date", "2026-10-01".into()).unwrap();
        form.set_field("ignored", "whatever".into()).unwrap();
        form
    }

    #[test]
    fn complete_form_becomes_an_expense() {
        let input = filled("1500000.005").into_input().unwrap();
        assert_eq!(input.category, "rent");
        assert_eq!(input.amount, Decimal::from_str("1500000.00").unwrap());
        assert_eq!(input.expense_date, NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
        assert_eq!(input.description, None);
    }

    #[test]
    fn missing_or_non_positive_amounts_are_rejected() {
        assert!(matches!(filled("0").into_input(), Err(AppError::Validation(_))));
        assert!(matches!(
            filled("10000000000").into_input(),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ExpenseFormData::default().into_input(),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ExpenseFormData::default().set_field("amount", "ten".into()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[rstest]
    #[case("receipt.PNG", Some("png"))]
    #[case("scan.jpeg", Some("jpeg"))]
    #[case("invoice.pdf", None)]
    #[case("noext", None)]
    fn only_images_are_accepted(#[case] filename: &str, #[case] expected: Option<&str>) {
        assert_eq!(receipt_extension(filename).as_deref(), expected);
    }

    #[test]
    fn stored_receipts_map_into_the_receipts_dir() {
        assert_eq!(
            receipt_path("static", "/receipts/abc.png"),
            Some(PathBuf::from("static").join("receipts").join("abc.png"))
        );
    }

    #[rstest]
    #[case("/receipts/../config.env")]
    #[case("/receipts/nested/abc.png")]
    #[case("/receipts/")]
    #[case("/uploads/abc.png")]
    #[case("https://example.com/receipts/abc.png")]
    fn foreign_urls_never_resolve_to_files(#[case] url: &str) {
        assert_eq!(receipt_path("static", url), None);
    }

    #[tokio::test]
    async fn removing_a_receipt_deletes_only_that_file() {
        let dir = std::env::temp_dir().join(format!("receipts-{}", Uuid::new_v4()));
        let static_dir = dir.to_str().unwrap();
        fs::create_dir_all(dir.join("receipts")).await.unwrap();
        fs::write(dir.join("receipts").join("old.png"), b"old").await.unwrap();
        fs::write(dir.join("receipts").join("new.png"), b"new").await.unwrap();

        remove_receipt(static_dir, Some("/receipts/old.png")).await;
        remove_receipt(static_dir, Some("/receipts/missing.png")).await;
        remove_receipt(static_dir, None).await;

        assert!(!dir.join("receipts").join("old.png").exists());
        assert!(dir.join("receipts").join("new.png").exists());

        fs::remove_dir_all(&dir).await.unwrap();
    }
}
