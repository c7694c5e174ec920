use crate::domain::company::{Company, CompanyId};
use crate::domain::statement::{EtlRun, ReconciledYear, StatementRow};
use crate::storage::StatementStore;
use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Process-local store with the same keying as the Postgres tables. Backs dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    companies: BTreeMap<String, Company>,
    next_id: CompanyId,
    statements: BTreeMap<(CompanyId, i32), ReconciledYear>,
    runs: Vec<EtlRun>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store mutex poisoned"))
    }

    pub fn companies(&self) -> anyhow::Result<Vec<Company>> {
        Ok(self.lock()?.companies.values().cloned().collect())
    }

    pub fn etl_runs(&self) -> anyhow::Result<Vec<EtlRun>> {
        Ok(self.lock()?.runs.clone())
    }

    /// Same shape and order as `statements::load_statement_rows`.
    pub fn statement_rows(&self) -> anyhow::Result<Vec<StatementRow>> {
        let inner = self.lock()?;
        let mut out = Vec::with_capacity(inner.statements.len());
        for company in inner.companies.values() {
            for ((_, _), row) in inner
                .statements
                .range((company.id, i32::MIN)..=(company.id, i32::MAX))
            {
                out.push(StatementRow {
                    symbol: company.symbol.clone(),
                    fiscal_year: row.fiscal_year,
                    revenue: row.revenue,
                    net_income: row.net_income,
                    total_assets: row.total_assets,
                    total_liabilities: row.total_liabilities,
                });
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl StatementStore for MemoryStore {
    async fn upsert_company(&self, symbol: &str, name: &str) -> anyhow::Result<CompanyId> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.companies.get_mut(symbol) {
            existing.name = name.to_string();
            return Ok(existing.id);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.companies.insert(
            symbol.to_string(),
            Company {
                id,
                symbol: symbol.to_string(),
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    async fn upsert_yearly_statement(
        &self,
        company_id: CompanyId,
        row: &ReconciledYear,
    ) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        inner
            .companies
            .values()
            .find(|c| c.id == company_id)
            .with_context(|| format!("unknown company_id {company_id}"))?;

        inner
            .statements
            .insert((company_id, row.fiscal_year), row.clone());
        Ok(())
    }

    async fn record_etl_run(&self, run: &EtlRun) -> anyhow::Result<()> {
        self.lock()?.runs.push(run.clone());
        Ok(())
    }
}
