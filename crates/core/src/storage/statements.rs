use crate::domain::company::{Company, CompanyId};
use crate::domain::statement::{EtlRun, ReconciledYear, StatementRow};
use crate::storage::{classify_sqlx_error, StatementStore};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgStatementStore {
    pool: PgPool,
}

impl PgStatementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl StatementStore for PgStatementStore {
    async fn upsert_company(&self, symbol: &str, name: &str) -> anyhow::Result<CompanyId> {
        let id: CompanyId = sqlx::query_scalar(
            "INSERT INTO companies (symbol, name) VALUES ($1, $2) \
             ON CONFLICT (symbol) DO UPDATE SET name = EXCLUDED.name \
             RETURNING id",
        )
        .persistent(false)
        .bind(symbol)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify_sqlx_error(e, "upsert companies"))?;

        Ok(id)
    }

    async fn upsert_yearly_statement(
        &self,
        company_id: CompanyId,
        row: &ReconciledYear,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO yearly_statements \
               (company_id, fiscal_year, revenue, net_income, total_assets, total_liabilities, revenue_source, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now()) \
             ON CONFLICT (company_id, fiscal_year) DO UPDATE \
               SET revenue = EXCLUDED.revenue, net_income = EXCLUDED.net_income, \
                   total_assets = EXCLUDED.total_assets, total_liabilities = EXCLUDED.total_liabilities, \
                   revenue_source = EXCLUDED.revenue_source, updated_at = EXCLUDED.updated_at",
        )
        .persistent(false)
        .bind(company_id)
        .bind(row.fiscal_year)
        .bind(row.revenue)
        .bind(row.net_income)
        .bind(row.total_assets)
        .bind(row.total_liabilities)
        .bind(row.revenue_source.map(|s| s.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| classify_sqlx_error(e, "upsert yearly_statements"))?;

        Ok(())
    }

    async fn record_etl_run(&self, run: &EtlRun) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO etl_runs (id, ran_at, companies_total, companies_skipped, rows_written, rows_failed) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .persistent(false)
        .bind(run.id)
        .bind(run.ran_at)
        .bind(run.companies_total)
        .bind(run.companies_skipped)
        .bind(run.rows_written)
        .bind(run.rows_failed)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_sqlx_error(e, "insert etl_runs"))?;

        Ok(())
    }
}

type StatementTuple = (
    String,
    i32,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
);

fn into_row(
    (symbol, fiscal_year, revenue, net_income, total_assets, total_liabilities): StatementTuple,
) -> StatementRow {
    StatementRow {
        symbol,
        fiscal_year,
        revenue,
        net_income,
        total_assets,
        total_liabilities,
    }
}

/// Every persisted statement, ordered by (symbol, fiscal_year) ascending.
pub async fn load_statement_rows(pool: &PgPool) -> anyhow::Result<Vec<StatementRow>> {
    let rows = sqlx::query_as::<_, StatementTuple>(
        "SELECT c.symbol, s.fiscal_year, s.revenue, s.net_income, s.total_assets, s.total_liabilities \
         FROM yearly_statements s \
         JOIN companies c ON c.id = s.company_id \
         ORDER BY c.symbol ASC, s.fiscal_year ASC",
    )
    .persistent(false)
    .fetch_all(pool)
    .await
    .map_err(|e| classify_sqlx_error(e, "select yearly_statements"))?;

    Ok(rows.into_iter().map(into_row).collect())
}

pub async fn load_statement_rows_for(
    pool: &PgPool,
    symbol: &str,
) -> anyhow::Result<Vec<StatementRow>> {
    let rows = sqlx::query_as::<_, StatementTuple>(
        "SELECT c.symbol, s.fiscal_year, s.revenue, s.net_income, s.total_assets, s.total_liabilities \
         FROM yearly_statements s \
         JOIN companies c ON c.id = s.company_id \
         WHERE c.symbol = $1 \
         ORDER BY s.fiscal_year ASC",
    )
    .persistent(false)
    .bind(symbol)
    .fetch_all(pool)
    .await
    .map_err(|e| classify_sqlx_error(e, "select yearly_statements by symbol"))?;

    Ok(rows.into_iter().map(into_row).collect())
}

pub async fn list_companies(pool: &PgPool) -> anyhow::Result<Vec<Company>> {
    let rows = sqlx::query_as::<_, (CompanyId, String, String)>(
        "SELECT id, symbol, name FROM companies ORDER BY symbol ASC",
    )
    .persistent(false)
    .fetch_all(pool)
    .await
    .map_err(|e| classify_sqlx_error(e, "select companies"))?;

    Ok(rows
        .into_iter()
        .map(|(id, symbol, name)| Company { id, symbol, name })
        .collect())
}

pub async fn find_company(pool: &PgPool, symbol: &str) -> anyhow::Result<Option<Company>> {
    let row = sqlx::query_as::<_, (CompanyId, String, String)>(
        "SELECT id, symbol, name FROM companies WHERE symbol = $1",
    )
    .persistent(false)
    .bind(symbol)
    .fetch_optional(pool)
    .await
    .map_err(|e| classify_sqlx_error(e, "select company"))?;

    Ok(row.map(|(id, symbol, name)| Company { id, symbol, name }))
}

pub async fn latest_etl_run(pool: &PgPool) -> anyhow::Result<Option<EtlRun>> {
    let row = sqlx::query_as::<_, (Uuid, DateTime<Utc>, i32, i32, i32, i32)>(
        "SELECT id, ran_at, companies_total, companies_skipped, rows_written, rows_failed \
         FROM etl_runs \
         ORDER BY ran_at DESC \
         LIMIT 1",
    )
    .persistent(false)
    .fetch_optional(pool)
    .await
    .map_err(|e| classify_sqlx_error(e, "select etl_runs"))?;

    Ok(row.map(
        |(id, ran_at, companies_total, companies_skipped, rows_written, rows_failed)| EtlRun {
            id,
            ran_at,
            companies_total,
            companies_skipped,
            rows_written,
            rows_failed,
        },
    ))
}
