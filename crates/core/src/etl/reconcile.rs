use crate::domain::statement::ReconciledYear;
use crate::ingest::normalize::{BalanceRecord, IncomeRecord};
use chrono::{Datelike, Utc};
use std::collections::BTreeMap;

pub const DEFAULT_TRAILING_YEARS: i32 = 3;

/// Oldest fiscal year kept by reconciliation (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingWindow {
    pub min_fiscal_year: i32,
}

impl TrailingWindow {
    pub fn trailing(current_year: i32, years: i32) -> Self {
        Self {
            min_fiscal_year: current_year - years,
        }
    }

    pub fn from_min_year(min_fiscal_year: i32) -> Self {
        Self { min_fiscal_year }
    }

    /// Window relative to today's UTC calendar year.
    pub fn trailing_from_now(years: i32) -> Self {
        Self::trailing(Utc::now().year(), years)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// One row per qualifying income year that has a balance counterpart, ascending.
    pub rows: Vec<ReconciledYear>,
    /// Qualifying income years skipped for lack of a balance record.
    pub missing_balance: Vec<i32>,
    /// Qualifying balance years with no income record. Informational only.
    pub missing_income: Vec<i32>,
}

/// Joins one company's income and balance series on fiscal year.
///
/// Duplicate years inside a series resolve to the last record seen. Only income years
/// drive output; a balance year alone never produces a row.
pub fn reconcile(
    income: &[IncomeRecord],
    balance: &[BalanceRecord],
    window: TrailingWindow,
) -> Reconciliation {
    let income_by_year: BTreeMap<i32, &IncomeRecord> =
        income.iter().map(|r| (r.fiscal_year, r)).collect();
    let balance_by_year: BTreeMap<i32, &BalanceRecord> =
        balance.iter().map(|r| (r.fiscal_year, r)).collect();

    let mut out = Reconciliation::default();

    for (&year, inc) in income_by_year.range(window.min_fiscal_year..) {
        let Some(bal) = balance_by_year.get(&year) else {
            out.missing_balance.push(year);
            continue;
        };

        out.rows.push(ReconciledYear {
            fiscal_year: year,
            revenue: inc.revenue,
            revenue_source: inc.revenue_source,
            net_income: inc.net_income,
            total_assets: bal.total_assets,
            total_liabilities: bal.total_liabilities,
        });
    }

    out.missing_income = balance_by_year
        .range(window.min_fiscal_year..)
        .map(|(&year, _)| year)
        .filter(|year| !income_by_year.contains_key(year))
        .collect();

    out
}
