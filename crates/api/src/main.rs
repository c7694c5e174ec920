use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finboard_core::domain::company::Company;
use finboard_core::domain::statement::{EtlRun, StatementRow};
use finboard_core::metrics::{derive_metrics, DerivedMetricRow};
use finboard_core::storage::statements;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = finboard_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();
    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match finboard_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let state = AppState { pool };

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/companies", get(get_companies))
        .route("/api/statements", get(get_statements))
        .route("/api/statements/:symbol", get(get_statements_for_symbol))
        .route("/api/metrics", get(get_metrics))
        .route("/api/metrics/:symbol", get(get_metrics_for_symbol))
        .route("/api/etl-runs/latest", get(get_latest_etl_run))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
}

impl AppState {
    fn pool(&self) -> Result<&PgPool, StatusCode> {
        self.pool.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Dashboard view of a metric row: percentages and ratios rounded to 2 decimals.
#[derive(Debug, Serialize, PartialEq)]
struct ApiMetricRow {
    symbol: String,
    fiscal_year: i32,
    net_margin: Option<f64>,
    current_ratio: Option<f64>,
    revenue_yoy: Option<f64>,
    net_income_yoy: Option<f64>,
}

impl From<DerivedMetricRow> for ApiMetricRow {
    fn from(m: DerivedMetricRow) -> Self {
        Self {
            symbol: m.symbol,
            fiscal_year: m.fiscal_year,
            net_margin: m.net_margin.map(round2),
            current_ratio: m.current_ratio.map(round2),
            revenue_yoy: m.revenue_yoy.map(round2),
            net_income_yoy: m.net_income_yoy.map(round2),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

async fn get_companies(State(state): State<AppState>) -> Result<Json<Vec<Company>>, StatusCode> {
    let pool = state.pool()?;
    let companies = statements::list_companies(pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(companies))
}

async fn get_statements(
    State(state): State<AppState>,
) -> Result<Json<Vec<StatementRow>>, StatusCode> {
    let pool = state.pool()?;
    let rows = statements::load_statement_rows(pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

async fn get_statements_for_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Vec<StatementRow>>, StatusCode> {
    let pool = state.pool()?;
    let rows = company_rows(pool, &normalize_symbol(&symbol)).await?;
    Ok(Json(rows))
}

async fn get_metrics(
    State(state): State<AppState>,
) -> Result<Json<Vec<ApiMetricRow>>, StatusCode> {
    let pool = state.pool()?;
    let rows = statements::load_statement_rows(pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(metric_view(&rows)))
}

async fn get_metrics_for_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Vec<ApiMetricRow>>, StatusCode> {
    let pool = state.pool()?;
    let rows = company_rows(pool, &normalize_symbol(&symbol)).await?;
    Ok(Json(metric_view(&rows)))
}

async fn get_latest_etl_run(State(state): State<AppState>) -> Result<Json<EtlRun>, StatusCode> {
    let pool = state.pool()?;
    let run = statements::latest_etl_run(pool)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(run))
}

async fn company_rows(pool: &PgPool, symbol: &str) -> Result<Vec<StatementRow>, StatusCode> {
    statements::find_company(pool, symbol)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    statements::load_statement_rows_for(pool, symbol)
        .await
        .map_err(internal_error)
}

fn metric_view(rows: &[StatementRow]) -> Vec<ApiMetricRow> {
    derive_metrics(rows)
        .into_iter()
        .map(ApiMetricRow::from)
        .collect()
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &finboard_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
