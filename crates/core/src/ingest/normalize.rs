use crate::ingest::numeric::amount_from_value;
use crate::ingest::types::RawReport;
use serde::{Deserialize, Serialize};

const FISCAL_DATE_FIELD: &str = "fiscalDateEnding";
const NET_INCOME_FIELD: &str = "netIncome";
const TOTAL_ASSETS_FIELD: &str = "totalAssets";
const TOTAL_LIABILITIES_FIELD: &str = "totalLiabilities";

const DEFAULT_REVENUE_PRIMARY: &str = "totalRevenue";
const DEFAULT_REVENUE_FALLBACK: &str = "grossProfit";

/// Which income-statement field feeds `revenue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevenueSelection {
    pub primary: String,
    pub fallback: Option<String>,
}

impl Default for RevenueSelection {
    fn default() -> Self {
        Self {
            primary: DEFAULT_REVENUE_PRIMARY.to_string(),
            fallback: Some(DEFAULT_REVENUE_FALLBACK.to_string()),
        }
    }
}

impl RevenueSelection {
    /// `REVENUE_PRIMARY_FIELD` / `REVENUE_FALLBACK_FIELD`; an empty fallback disables it.
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("REVENUE_PRIMARY_FIELD") {
            if !s.trim().is_empty() {
                out.primary = s.trim().to_string();
            }
        }

        if let Ok(s) = std::env::var("REVENUE_FALLBACK_FIELD") {
            let s = s.trim();
            out.fallback = (!s.is_empty()).then(|| s.to_string());
        }

        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueSource {
    Primary,
    Fallback,
}

impl RevenueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RevenueSource::Primary => "primary",
            RevenueSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncomeRecord {
    pub fiscal_year: i32,
    pub revenue: Option<f64>,
    pub revenue_source: Option<RevenueSource>,
    pub net_income: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRecord {
    pub fiscal_year: i32,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
}

/// First four characters of an ISO-like date, e.g. `"2023-12-31"` -> 2023.
pub fn fiscal_year_of(date: &str) -> Option<i32> {
    let head = date.trim().get(..4)?;
    if !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    head.parse().ok()
}

fn report_fiscal_year(report: &RawReport) -> Option<i32> {
    report
        .get(FISCAL_DATE_FIELD)
        .and_then(|v| v.as_str())
        .and_then(fiscal_year_of)
}

pub fn normalize_income(report: &RawReport, selection: &RevenueSelection) -> Option<IncomeRecord> {
    let fiscal_year = report_fiscal_year(report)?;

    let primary = amount_from_value(report.get(&selection.primary));
    let (revenue, revenue_source) = match primary {
        Some(v) => (Some(v), Some(RevenueSource::Primary)),
        None => match selection
            .fallback
            .as_deref()
            .and_then(|f| amount_from_value(report.get(f)))
        {
            Some(v) => (Some(v), Some(RevenueSource::Fallback)),
            None => (None, None),
        },
    };

    Some(IncomeRecord {
        fiscal_year,
        revenue,
        revenue_source,
        net_income: amount_from_value(report.get(NET_INCOME_FIELD)),
    })
}

pub fn normalize_balance(report: &RawReport) -> Option<BalanceRecord> {
    Some(BalanceRecord {
        fiscal_year: report_fiscal_year(report)?,
        total_assets: amount_from_value(report.get(TOTAL_ASSETS_FIELD)),
        total_liabilities: amount_from_value(report.get(TOTAL_LIABILITIES_FIELD)),
    })
}

/// Normalizes a whole income series, dropping (and logging) reports without a usable date.
pub fn normalize_income_series(
    symbol: &str,
    reports: &[RawReport],
    selection: &RevenueSelection,
) -> Vec<IncomeRecord> {
    let mut out = Vec::with_capacity(reports.len());
    for report in reports {
        match normalize_income(report, selection) {
            Some(rec) => {
                if rec.revenue_source == Some(RevenueSource::Fallback) {
                    tracing::debug!(
                        %symbol,
                        fiscal_year = rec.fiscal_year,
                        field = selection.fallback.as_deref().unwrap_or_default(),
                        "revenue taken from fallback field"
                    );
                }
                out.push(rec);
            }
            None => tracing::warn!(%symbol, kind = "income", "report without parsable fiscal date; dropped"),
        }
    }
    out
}

pub fn normalize_balance_series(symbol: &str, reports: &[RawReport]) -> Vec<BalanceRecord> {
    let mut out = Vec::with_capacity(reports.len());
    for report in reports {
        match normalize_balance(report) {
            Some(rec) => out.push(rec),
            None => tracing::warn!(%symbol, kind = "balance", "report without parsable fiscal date; dropped"),
        }
    }
    out
}
