use crate::ingest::normalize::RevenueSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Income and balance figures merged for one company and fiscal year, ready to upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledYear {
    pub fiscal_year: i32,
    pub revenue: Option<f64>,
    pub revenue_source: Option<RevenueSource>,
    pub net_income: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
}

impl ReconciledYear {
    /// All four financial fields are null. Legal to persist.
    pub fn is_empty(&self) -> bool {
        self.revenue.is_none()
            && self.net_income.is_none()
            && self.total_assets.is_none()
            && self.total_liabilities.is_none()
    }
}

/// Persisted yearly statement joined with its company symbol (read side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRow {
    pub symbol: String,
    pub fiscal_year: i32,
    pub revenue: Option<f64>,
    pub net_income: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
}

/// Append-only log entry written once per completed pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlRun {
    pub id: Uuid,
    pub ran_at: DateTime<Utc>,
    pub companies_total: i32,
    pub companies_skipped: i32,
    pub rows_written: i32,
    pub rows_failed: i32,
}
