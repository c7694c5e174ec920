use anyhow::ensure;
use serde::{Deserialize, Serialize};

pub type CompanyId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub symbol: String,
    pub name: String,
}

/// A configured member of the tracked universe, before it exists in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanySpec {
    pub symbol: String,
    pub name: String,
}

impl CompanySpec {
    /// Parses `SYMBOL` or `SYMBOL=Display Name`. Symbols are upper-cased; a missing
    /// name defaults to the symbol.
    pub fn parse(entry: &str) -> anyhow::Result<Self> {
        let (symbol, name) = match entry.split_once('=') {
            Some((s, n)) => (s.trim(), n.trim()),
            None => (entry.trim(), ""),
        };

        ensure!(!symbol.is_empty(), "symbol must be non-empty (entry {entry:?})");
        ensure!(
            symbol
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-')),
            "invalid symbol {symbol:?}"
        );

        let symbol = symbol.to_ascii_uppercase();
        let name = if name.is_empty() {
            symbol.clone()
        } else {
            name.to_string()
        };
        Ok(Self { symbol, name })
    }
}

/// Parses a comma-separated universe, dropping duplicate symbols (first one wins).
pub fn parse_universe(spec: &str) -> anyhow::Result<Vec<CompanySpec>> {
    let mut out: Vec<CompanySpec> = Vec::new();
    for entry in spec.split(',').filter(|e| !e.trim().is_empty()) {
        let company = CompanySpec::parse(entry)?;
        if out.iter().any(|c| c.symbol == company.symbol) {
            tracing::warn!(symbol = %company.symbol, "duplicate symbol in universe; ignored");
            continue;
        }
        out.push(company);
    }
    ensure!(!out.is_empty(), "company universe must be non-empty");
    Ok(out)
}
