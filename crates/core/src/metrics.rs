use crate::domain::statement::StatementRow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricRow {
    pub symbol: String,
    pub fiscal_year: i32,
    pub net_margin: Option<f64>,
    pub current_ratio: Option<f64>,
    pub revenue_yoy: Option<f64>,
    pub net_income_yoy: Option<f64>,
}

/// Derives ratio and year-over-year metrics for every row, in input order.
///
/// The prior year is looked up by `(symbol, fiscal_year - 1)`, not by position, so
/// gaps in a company's series give `None` growth. Each metric is `None` on its own
/// when an input is missing or a divisor is zero. Full precision is kept.
pub fn derive_metrics(rows: &[StatementRow]) -> Vec<DerivedMetricRow> {
    let index: HashMap<(&str, i32), &StatementRow> = rows
        .iter()
        .map(|r| ((r.symbol.as_str(), r.fiscal_year), r))
        .collect();

    rows.iter()
        .map(|row| {
            let prev = row
                .fiscal_year
                .checked_sub(1)
                .and_then(|y| index.get(&(row.symbol.as_str(), y)).copied());

            DerivedMetricRow {
                symbol: row.symbol.clone(),
                fiscal_year: row.fiscal_year,
                net_margin: ratio(row.net_income.map(|n| n * 100.0), row.revenue),
                current_ratio: ratio(row.total_assets, row.total_liabilities),
                revenue_yoy: prev.and_then(|p| growth_pct(row.revenue, p.revenue)),
                net_income_yoy: prev.and_then(|p| growth_pct(row.net_income, p.net_income)),
            }
        })
        .collect()
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let d = denominator.filter(|d| *d != 0.0)?;
    finite(numerator? / d)
}

fn growth_pct(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let p = previous.filter(|p| *p != 0.0)?;
    finite((current? - p) * 100.0 / p)
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}
