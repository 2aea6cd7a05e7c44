mod config;
mod database;
mod error;
mod filters;
mod handlers;
mod middleware;
mod models;
mod services;
mod utils;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use dotenvy::dotenv;
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use config::Config;
use database::{create_database_pool, AppState};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let db = match create_database_pool(&config).await {
        Ok(db) => db,
        Err(e) => {
            log::error!("failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let app = create_router(AppState {
        db,
        config: Arc::new(config),
    });

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("cannot bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    log::info!("Back office listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        log::error!("server error: {}", e);
    }
}

fn create_router(state: AppState) -> Router {
    let body_limit = state.config.body_limit_mb * 1024 * 1024;
    let static_dir = state.config.static_dir.clone();

    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/db", get(handlers::health_db))
        // Auth
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/me", get(handlers::auth::me))
        .route("/api/dashboard", get(handlers::dashboard))
        // Team management
        .route("/api/team/permissions", get(handlers::team::list_permissions))
        .route(
            "/api/team/users",
            get(handlers::team::list_users).post(handlers::team::create_user),
        )
        .route("/api/team/users/:id", put(handlers::team::update_user))
        .route("/api/team/users/:id/lock", post(handlers::team::lock_user))
        .route("/api/team/users/:id/unlock", post(handlers::team::unlock_user))
        .route(
            "/api/team/roles",
            get(handlers::team::list_roles).post(handlers::team::create_role),
        )
        .route(
            "/api/team/roles/:id",
            put(handlers::team::update_role).delete(handlers::team::delete_role),
        )
        // Catalogue
        .route(
            "/api/products",
            get(handlers::products::list_products).post(handlers::products::create_product),
        )
        .route(
            "/api/products/:id",
            get(handlers::products::get_product)
                .put(handlers::products::update_product)
                .delete(handlers::products::delete_product),
        )
        // Inventory
        .route("/api/inventory", get(handlers::inventory::list_inventory))
        .route("/api/inventory/receive", post(handlers::inventory::receive_stock))
        .route("/api/inventory/transfer", post(handlers::inventory::transfer_stock))
        .route("/api/inventory/summary", get(handlers::inventory::inventory_summary))
        .route(
            "/api/inventory/barcode/:barcode",
            get(handlers::inventory::lookup_barcode),
        )
        .route(
            "/api/inventory/barcode/:barcode/status",
            post(handlers::inventory::change_status),
        )
        // Customers
        .route(
            "/api/customers",
            get(handlers::customers::list_customers).post(handlers::customers::create_customer),
        )
        .route(
            "/api/customers/:id",
            get(handlers::customers::get_customer)
                .put(handlers::customers::update_customer)
                .delete(handlers::customers::delete_customer),
        )
        // Orders and deliveries
        .route(
            "/api/orders",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route("/api/orders/:id", get(handlers::orders::get_order))
        .route("/api/orders/:id/items", put(handlers::orders::replace_items))
        .route("/api/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route("/api/orders/:id/delivery", post(handlers::deliveries::create_delivery))
        .route("/api/deliveries", get(handlers::deliveries::list_deliveries))
        .route("/api/deliveries/:id", get(handlers::deliveries::get_delivery))
        .route(
            "/api/deliveries/:id/status",
            post(handlers::deliveries::update_delivery_status),
        )
        // Point of sale
        .route(
            "/api/sales",
            get(handlers::sales::list_sales).post(handlers::sales::create_sale),
        )
        .route("/api/sales/:id/returns", post(handlers::sales::create_return))
        // Expenses and finance
        .route(
            "/api/expenses",
            get(handlers::expenses::list_expenses).post(handlers::expenses::create_expense),
        )
        .route(
            "/api/expenses/:id",
            put(handlers::expenses::update_expense).delete(handlers::expenses::delete_expense),
        )
        .route(
            "/api/finance/periods",
            get(handlers::finance::list_periods).post(handlers::finance::create_period),
        )
        .route(
            "/api/finance/periods/:id",
            get(handlers::finance::get_period)
                .put(handlers::finance::update_period)
                .delete(handlers::finance::delete_period),
        )
        .route(
            "/api/finance/periods/:id/report",
            get(handlers::finance::period_report),
        )
        .route("/api/finance/actuals", get(handlers::finance::actuals))
        // Staff
        .route(
            "/api/employees",
            get(handlers::employees::list_employees).post(handlers::employees::create_employee),
        )
        .route(
            "/api/employees/:id",
            get(handlers::employees::get_employee)
                .put(handlers::employees::update_employee)
                .delete(handlers::employees::delete_employee),
        )
        .route(
            "/api/attendance",
            get(handlers::attendance::list_attendance)
                .post(handlers::attendance::record_attendance),
        )
        .route("/api/attendance/check-in", post(handlers::attendance::check_in))
        .route("/api/attendance/check-out", post(handlers::attendance::check_out))
        .route("/api/payroll", get(handlers::payroll::list_payroll))
        .route("/api/payroll/generate", post(handlers::payroll::generate_payroll))
        .route(
            "/api/payroll/:id",
            put(handlers::payroll::update_payslip).delete(handlers::payroll::delete_payslip),
        )
        .route("/api/payroll/:id/pay", post(handlers::payroll::pay_payslip))
        // Reports
        .route("/api/reports/sales", get(handlers::reports::sales_report))
        // React build and uploaded receipts
        .fallback_service(ServeDir::new(static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CookieManagerLayer::new())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "postgres://localhost/backoffice_test"),
            ("JWT_SECRET", "test-secret"),
        ]);
        let config = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        let db = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        AppState {
            db,
            config: Arc::new(config),
        }
    }

    #[tokio::test]
    async fn health_does_not_need_the_database() {
        let response = create_router(test_state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn api_requires_a_session() {
        for uri in ["/api/orders", "/api/inventory/summary", "/api/dashboard"] {
            let response = create_router(test_state())
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn forged_session_is_rejected() {
        let response = create_router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/products")
                    .header(header::COOKIE, "auth_token=not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_clears_the_cookie() {
        let response = create_router(test_state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/logout")
                    .header(header::COOKIE, "auth_token=expired")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("auth_token="));
    }
}
