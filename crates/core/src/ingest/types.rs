use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Income,
    Balance,
    CashFlow,
}

impl StatementKind {
    /// Upstream `function=` query value.
    pub fn function_name(self) -> &'static str {
        match self {
            StatementKind::Income => "INCOME_STATEMENT",
            StatementKind::Balance => "BALANCE_SHEET",
            StatementKind::CashFlow => "CASH_FLOW",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementKind::Income => "income",
            StatementKind::Balance => "balance",
            StatementKind::CashFlow => "cash_flow",
        };
        f.write_str(s)
    }
}

/// One yearly report as the provider sent it: field name to raw (mostly string) value.
pub type RawReport = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedReason {
    RateLimited(String),
    Informational(String),
    InvalidSymbol(String),
    Empty,
    Timeout,
    Transport(String),
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedReason::RateLimited(msg) => write!(f, "rate limited: {msg}"),
            DegradedReason::Informational(msg) => write!(f, "informational response: {msg}"),
            DegradedReason::InvalidSymbol(msg) => write!(f, "invalid symbol: {msg}"),
            DegradedReason::Empty => f.write_str("empty payload"),
            DegradedReason::Timeout => f.write_str("fetch timed out"),
            DegradedReason::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

/// Result of one (symbol, kind) fetch. Every degraded reason means "zero records this cycle".
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Reports(Vec<RawReport>),
    Degraded(DegradedReason),
}

impl FetchOutcome {
    pub fn reports(&self) -> Option<&[RawReport]> {
        match self {
            FetchOutcome::Reports(r) => Some(r),
            FetchOutcome::Degraded(_) => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, FetchOutcome::Degraded(_))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnnualReportsResponse {
    #[serde(default, rename = "annualReports")]
    pub annual_reports: Vec<RawReport>,
}
