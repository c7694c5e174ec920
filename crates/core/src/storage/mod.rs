pub mod lock;
pub mod memory;
pub mod statements;

use crate::domain::company::CompanyId;
use crate::domain::statement::{EtlRun, ReconciledYear};
use anyhow::Context;
use std::fmt;

pub use statements::PgStatementStore;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Write side of the relational store, as the pipeline sees it.
#[async_trait::async_trait]
pub trait StatementStore: Send + Sync {
    /// Insert-or-refresh keyed by symbol. The id is stable across calls; only the
    /// display name changes.
    async fn upsert_company(&self, symbol: &str, name: &str) -> anyhow::Result<CompanyId>;

    /// Insert-or-replace keyed by (company, fiscal year). Every numeric field is
    /// overwritten, including with nulls.
    async fn upsert_yearly_statement(
        &self,
        company_id: CompanyId,
        row: &ReconciledYear,
    ) -> anyhow::Result<()>;

    async fn record_etl_run(&self, run: &EtlRun) -> anyhow::Result<()>;
}

/// The store as a whole cannot be reached (pool closed or timed out, socket/TLS failure).
/// Distinct from a single statement failing, which callers tolerate.
#[derive(Debug, Clone)]
pub struct StoreUnavailable {
    pub operation: &'static str,
    pub detail: String,
}

impl fmt::Display for StoreUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "store unavailable (operation={}): {}",
            self.operation, self.detail
        )
    }
}

impl std::error::Error for StoreUnavailable {}

pub fn is_store_unavailable(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.is::<StoreUnavailable>())
}

pub(crate) fn classify_sqlx_error(err: sqlx::Error, operation: &'static str) -> anyhow::Error {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => anyhow::Error::new(StoreUnavailable {
            operation,
            detail: err.to_string(),
        }),
        other => anyhow::Error::new(other).context(format!("{operation} failed")),
    }
}
