use crate::domain::company::{CompanyId, CompanySpec};
use crate::domain::statement::{EtlRun, ReconciledYear};
use crate::etl::reconcile::{reconcile, TrailingWindow, DEFAULT_TRAILING_YEARS};
use crate::ingest::normalize::{normalize_balance_series, normalize_income_series, RevenueSelection};
use crate::ingest::provider::StatementFetcher;
use crate::ingest::types::{DegradedReason, FetchOutcome, StatementKind};
use crate::storage::{is_store_unavailable, StatementStore};
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_COMPANY_DELAY_SECS: u64 = 15;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct EtlOptions {
    /// Pause between companies to stay under the upstream per-minute quota.
    pub company_delay: Duration,

    /// Upper bound on a single (symbol, kind) fetch.
    pub fetch_timeout: Duration,

    pub trailing_years: i32,

    pub revenue: RevenueSelection,
}

impl Default for EtlOptions {
    fn default() -> Self {
        Self {
            company_delay: Duration::from_secs(DEFAULT_COMPANY_DELAY_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            trailing_years: DEFAULT_TRAILING_YEARS,
            revenue: RevenueSelection::default(),
        }
    }
}

impl EtlOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("ETL_COMPANY_DELAY_SECS") {
            if let Ok(n) = s.parse::<u64>() {
                out.company_delay = Duration::from_secs(n);
            }
        }

        if let Ok(s) = std::env::var("ETL_FETCH_TIMEOUT_SECS") {
            if let Ok(n) = s.parse::<u64>() {
                out.fetch_timeout = Duration::from_secs(n);
            }
        }

        if let Ok(s) = std::env::var("ETL_TRAILING_YEARS") {
            if let Ok(n) = s.parse::<i32>() {
                out.trailing_years = n;
            }
        }

        out.revenue = RevenueSelection::from_env();
        out
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (0..=50).contains(&self.trailing_years),
            "ETL_TRAILING_YEARS must be 0..=50 (got {})",
            self.trailing_years
        );
        anyhow::ensure!(
            !self.fetch_timeout.is_zero(),
            "ETL_FETCH_TIMEOUT_SECS must be > 0"
        );
        anyhow::ensure!(
            !self.revenue.primary.trim().is_empty(),
            "REVENUE_PRIMARY_FIELD must be non-empty"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub companies_total: usize,
    pub companies_skipped: usize,
    pub rows_written: usize,
    pub rows_failed: usize,
    pub years_missing_counterpart: usize,
    /// False when the EtlRun log entry could not be written.
    pub run_recorded: bool,
}

impl RunSummary {
    fn to_etl_run(&self) -> EtlRun {
        EtlRun {
            id: Uuid::new_v4(),
            ran_at: Utc::now(),
            companies_total: clamp_i32(self.companies_total),
            companies_skipped: clamp_i32(self.companies_skipped),
            rows_written: clamp_i32(self.rows_written),
            rows_failed: clamp_i32(self.rows_failed),
        }
    }
}

fn clamp_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// One sequential pass over the universe: fetch, normalize, reconcile and upsert each
/// company in turn, then append the run log entry.
///
/// Only total store unavailability returns `Err`; per-company and per-row failures are
/// logged and counted in the summary.
pub async fn run_pipeline(
    fetcher: &dyn StatementFetcher,
    store: &dyn StatementStore,
    companies: &[CompanySpec],
    opts: &EtlOptions,
) -> anyhow::Result<RunSummary> {
    let window = TrailingWindow::trailing_from_now(opts.trailing_years);
    run_pipeline_with_window(fetcher, store, companies, opts, window).await
}

pub async fn run_pipeline_with_window(
    fetcher: &dyn StatementFetcher,
    store: &dyn StatementStore,
    companies: &[CompanySpec],
    opts: &EtlOptions,
    window: TrailingWindow,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary {
        companies_total: companies.len(),
        ..Default::default()
    };

    tracing::info!(
        provider = fetcher.provider_name(),
        companies = companies.len(),
        min_fiscal_year = window.min_fiscal_year,
        "etl run started"
    );

    for (idx, company) in companies.iter().enumerate() {
        if idx != 0 && !opts.company_delay.is_zero() {
            tokio::time::sleep(opts.company_delay).await;
        }

        process_company(fetcher, store, company, opts, window, &mut summary)
            .await
            .with_context(|| format!("etl aborted while processing {}", company.symbol))?;
    }

    match store.record_etl_run(&summary.to_etl_run()).await {
        Ok(()) => summary.run_recorded = true,
        Err(err) => {
            if is_store_unavailable(&err) {
                return Err(err.context("etl aborted while recording run"));
            }
            tracing::error!(error = %err, "failed to record etl run; statement rows are kept");
        }
    }

    tracing::info!(
        companies_total = summary.companies_total,
        companies_skipped = summary.companies_skipped,
        rows_written = summary.rows_written,
        rows_failed = summary.rows_failed,
        years_missing_counterpart = summary.years_missing_counterpart,
        run_recorded = summary.run_recorded,
        "etl run finished"
    );

    Ok(summary)
}

async fn process_company(
    fetcher: &dyn StatementFetcher,
    store: &dyn StatementStore,
    company: &CompanySpec,
    opts: &EtlOptions,
    window: TrailingWindow,
    summary: &mut RunSummary,
) -> anyhow::Result<()> {
    let symbol = company.symbol.as_str();

    let income = fetch_kind(fetcher, symbol, StatementKind::Income, opts.fetch_timeout).await;
    let balance = fetch_kind(fetcher, symbol, StatementKind::Balance, opts.fetch_timeout).await;

    if income.is_degraded() && balance.is_degraded() {
        tracing::warn!(%symbol, "no statements available this cycle; company skipped");
        summary.companies_skipped += 1;
        return Ok(());
    }

    let company_id = match store.upsert_company(symbol, &company.name).await {
        Ok(id) => id,
        Err(err) if is_store_unavailable(&err) => return Err(err),
        Err(err) => {
            tracing::warn!(%symbol, error = %err, "company upsert failed; company skipped");
            summary.companies_skipped += 1;
            return Ok(());
        }
    };

    let (FetchOutcome::Reports(income_reports), FetchOutcome::Reports(balance_reports)) =
        (&income, &balance)
    else {
        tracing::warn!(%symbol, "one statement kind degraded; no statements written this cycle");
        summary.companies_skipped += 1;
        return Ok(());
    };

    let income_series = normalize_income_series(symbol, income_reports, &opts.revenue);
    let balance_series = normalize_balance_series(symbol, balance_reports);
    let reconciled = reconcile(&income_series, &balance_series, window);

    for year in &reconciled.missing_balance {
        tracing::debug!(%symbol, fiscal_year = year, "income year without balance sheet; skipped");
    }
    for year in &reconciled.missing_income {
        tracing::debug!(%symbol, fiscal_year = year, "balance sheet year without income statement");
    }
    summary.years_missing_counterpart += reconciled.missing_balance.len();

    for row in &reconciled.rows {
        write_row(store, company_id, symbol, row, summary).await?;
    }

    tracing::info!(
        %symbol,
        rows = reconciled.rows.len(),
        missing_balance = reconciled.missing_balance.len(),
        "company reconciled"
    );
    Ok(())
}

async fn write_row(
    store: &dyn StatementStore,
    company_id: CompanyId,
    symbol: &str,
    row: &ReconciledYear,
    summary: &mut RunSummary,
) -> anyhow::Result<()> {
    if row.is_empty() {
        tracing::debug!(%symbol, fiscal_year = row.fiscal_year, "writing all-null statement row");
    }

    match store.upsert_yearly_statement(company_id, row).await {
        Ok(()) => summary.rows_written += 1,
        Err(err) if is_store_unavailable(&err) => return Err(err),
        Err(err) => {
            summary.rows_failed += 1;
            tracing::warn!(
                %symbol,
                fiscal_year = row.fiscal_year,
                error = %err,
                "statement upsert failed; continuing"
            );
        }
    }
    Ok(())
}

/// Bounded fetch of one kind; timeouts and transport errors degrade like an empty payload.
async fn fetch_kind(
    fetcher: &dyn StatementFetcher,
    symbol: &str,
    kind: StatementKind,
    timeout: Duration,
) -> FetchOutcome {
    let outcome = match tokio::time::timeout(timeout, fetcher.fetch_statements(symbol, kind)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => FetchOutcome::Degraded(DegradedReason::Transport(format!("{err:#}"))),
        Err(_) => FetchOutcome::Degraded(DegradedReason::Timeout),
    };

    match &outcome {
        FetchOutcome::Reports(reports) => {
            tracing::debug!(%symbol, %kind, reports = reports.len(), "statements fetched")
        }
        FetchOutcome::Degraded(reason) => {
            tracing::warn!(%symbol, %kind, %reason, "degraded fetch; treating as zero records")
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::RawReport;
    use crate::metrics::derive_metrics;
    use crate::storage::memory::MemoryStore;
    use crate::storage::StoreUnavailable;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Scripted {
        Reports(Value),
        Degraded(DegradedReason),
        Error,
        Hang,
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        responses: HashMap<(String, StatementKind), Scripted>,
        calls: Mutex<Vec<(String, StatementKind)>>,
    }

    impl ScriptedFetcher {
        fn with(mut self, symbol: &str, kind: StatementKind, response: Scripted) -> Self {
            self.responses.insert((symbol.to_string(), kind), response);
            self
        }
    }

    #[async_trait::async_trait]
    impl StatementFetcher for ScriptedFetcher {
        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_statements(
            &self,
            symbol: &str,
            kind: StatementKind,
        ) -> anyhow::Result<FetchOutcome> {
            self.calls.lock().unwrap().push((symbol.to_string(), kind));
            match self.responses.get(&(symbol.to_string(), kind)).cloned() {
                Some(Scripted::Reports(Value::Array(items))) => Ok(FetchOutcome::Reports(
                    items
                        .into_iter()
                        .map(|v| match v {
                            Value::Object(m) => m,
                            _ => RawReport::new(),
                        })
                        .collect(),
                )),
                Some(Scripted::Reports(_)) => unreachable!("fixture must be an array"),
                Some(Scripted::Degraded(reason)) => Ok(FetchOutcome::Degraded(reason)),
                Some(Scripted::Error) => anyhow::bail!("connection reset"),
                Some(Scripted::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                None => Ok(FetchOutcome::Degraded(DegradedReason::Empty)),
            }
        }
    }

    /// Delegates to a `MemoryStore` but fails chosen writes.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_years: Vec<i32>,
        fail_run_log: bool,
        unavailable: bool,
    }

    #[async_trait::async_trait]
    impl StatementStore for FlakyStore {
        async fn upsert_company(&self, symbol: &str, name: &str) -> anyhow::Result<CompanyId> {
            if self.unavailable {
                return Err(anyhow::Error::new(StoreUnavailable {
                    operation: "upsert companies",
                    detail: "pool timed out".to_string(),
                }));
            }
            self.inner.upsert_company(symbol, name).await
        }

        async fn upsert_yearly_statement(
            &self,
            company_id: CompanyId,
            row: &ReconciledYear,
        ) -> anyhow::Result<()> {
            if self.fail_years.contains(&row.fiscal_year) {
                anyhow::bail!("value out of range for fiscal_year {}", row.fiscal_year);
            }
            self.inner.upsert_yearly_statement(company_id, row).await
        }

        async fn record_etl_run(&self, run: &EtlRun) -> anyhow::Result<()> {
            if self.fail_run_log {
                anyhow::bail!("insert etl_runs failed");
            }
            self.inner.record_etl_run(run).await
        }
    }

    fn opts() -> EtlOptions {
        EtlOptions {
            company_delay: Duration::ZERO,
            fetch_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn window() -> TrailingWindow {
        TrailingWindow::trailing(2024, 3)
    }

    fn companies(symbols: &[&str]) -> Vec<CompanySpec> {
        symbols
            .iter()
            .map(|s| CompanySpec {
                symbol: s.to_string(),
                name: format!("{s} Corp"),
            })
            .collect()
    }

    fn income(rows: &[(&str, &str, &str)]) -> Scripted {
        Scripted::Reports(Value::Array(
            rows.iter()
                .map(|(date, revenue, net)| {
                    json!({"fiscalDateEnding": date, "totalRevenue": revenue, "netIncome": net})
                })
                .collect(),
        ))
    }

    fn balance(rows: &[(&str, &str, &str)]) -> Scripted {
        Scripted::Reports(Value::Array(
            rows.iter()
                .map(|(date, assets, liabilities)| {
                    json!({"fiscalDateEnding": date, "totalAssets": assets, "totalLiabilities": liabilities})
                })
                .collect(),
        ))
    }

    #[tokio::test]
    async fn end_to_end_margin_and_current_ratio() {
        let fetcher = ScriptedFetcher::default()
            .with("AAPL", StatementKind::Income, income(&[("2023-09-30", "10,000", "1,000")]))
            .with("AAPL", StatementKind::Balance, balance(&[("2023-09-30", "50,000", "25,000")]));
        let store = MemoryStore::new();

        let summary = run_pipeline_with_window(&fetcher, &store, &companies(&["AAPL"]), &opts(), window())
            .await
            .unwrap();
        assert_eq!(summary.rows_written, 1);
        assert!(summary.run_recorded);

        let metrics = derive_metrics(&store.statement_rows().unwrap());
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].fiscal_year, 2023);
        assert_eq!(metrics[0].net_margin, Some(10.0));
        assert_eq!(metrics[0].current_ratio, Some(2.0));
    }

    #[tokio::test]
    async fn income_only_year_writes_nothing() {
        let fetcher = ScriptedFetcher::default()
            .with("AAPL", StatementKind::Income, income(&[("2023-09-30", "10,000", "1,000")]))
            .with("AAPL", StatementKind::Balance, balance(&[("2022-09-30", "50,000", "25,000")]));
        let store = MemoryStore::new();

        let summary = run_pipeline_with_window(&fetcher, &store, &companies(&["AAPL"]), &opts(), window())
            .await
            .unwrap();
        assert_eq!(summary.rows_written, 0);
        assert_eq!(summary.years_missing_counterpart, 1);
        assert!(store.statement_rows().unwrap().is_empty());
        assert_eq!(store.companies().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn consecutive_years_give_revenue_growth() {
        let fetcher = ScriptedFetcher::default()
            .with(
                "MSFT",
                StatementKind::Income,
                income(&[("2023-06-30", "120", "12"), ("2022-06-30", "100", "10")]),
            )
            .with(
                "MSFT",
                StatementKind::Balance,
                balance(&[("2023-06-30", "10", "5"), ("2022-06-30", "10", "5")]),
            );
        let store = MemoryStore::new();

        run_pipeline_with_window(&fetcher, &store, &companies(&["MSFT"]), &opts(), window())
            .await
            .unwrap();

        let metrics = derive_metrics(&store.statement_rows().unwrap());
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].fiscal_year, 2022);
        assert_eq!(metrics[0].revenue_yoy, None);
        assert_eq!(metrics[1].fiscal_year, 2023);
        assert_eq!(metrics[1].revenue_yoy, Some(20.0));
    }

    #[tokio::test]
    async fn degraded_kind_skips_company_but_keeps_going() {
        let fetcher = ScriptedFetcher::default()
            .with("AAPL", StatementKind::Income, income(&[("2023-09-30", "1", "1")]))
            .with(
                "AAPL",
                StatementKind::Balance,
                Scripted::Degraded(DegradedReason::RateLimited("5 calls per minute".to_string())),
            )
            .with("MSFT", StatementKind::Income, income(&[("2023-06-30", "1", "1")]))
            .with("MSFT", StatementKind::Balance, balance(&[("2023-06-30", "1", "1")]));
        let store = MemoryStore::new();

        let summary = run_pipeline_with_window(
            &fetcher,
            &store,
            &companies(&["AAPL", "MSFT"]),
            &opts(),
            window(),
        )
        .await
        .unwrap();

        assert_eq!(summary.companies_skipped, 1);
        assert_eq!(summary.rows_written, 1);
        let rows = store.statement_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "MSFT");
        // AAPL still gets a company row: its income fetch succeeded
        assert_eq!(store.companies().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fully_degraded_company_is_not_created() {
        let fetcher = ScriptedFetcher::default()
            .with("XYZ", StatementKind::Income, Scripted::Degraded(DegradedReason::InvalidSymbol("bad".to_string())))
            .with("XYZ", StatementKind::Balance, Scripted::Error);
        let store = MemoryStore::new();

        let summary = run_pipeline_with_window(&fetcher, &store, &companies(&["XYZ"]), &opts(), window())
            .await
            .unwrap();
        assert_eq!(summary.companies_skipped, 1);
        assert!(store.companies().unwrap().is_empty());
        assert_eq!(store.etl_runs().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetch_timeout_is_a_per_company_failure() {
        let fetcher = ScriptedFetcher::default()
            .with("SLOW", StatementKind::Income, Scripted::Hang)
            .with("SLOW", StatementKind::Balance, balance(&[("2023-12-31", "1", "1")]))
            .with("FAST", StatementKind::Income, income(&[("2023-12-31", "1", "1")]))
            .with("FAST", StatementKind::Balance, balance(&[("2023-12-31", "1", "1")]));
        let store = MemoryStore::new();

        let summary = run_pipeline_with_window(
            &fetcher,
            &store,
            &companies(&["SLOW", "FAST"]),
            &opts(),
            window(),
        )
        .await
        .unwrap();
        assert_eq!(summary.companies_skipped, 1);
        assert_eq!(summary.rows_written, 1);
    }

    #[tokio::test]
    async fn fetches_are_sequential_income_then_balance() {
        let fetcher = ScriptedFetcher::default();
        let store = MemoryStore::new();

        run_pipeline_with_window(&fetcher, &store, &companies(&["A", "B"]), &opts(), window())
            .await
            .unwrap();

        let calls = fetcher.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("A".to_string(), StatementKind::Income),
                ("A".to_string(), StatementKind::Balance),
                ("B".to_string(), StatementKind::Income),
                ("B".to_string(), StatementKind::Balance),
            ]
        );
    }

    #[tokio::test]
    async fn row_failure_does_not_stop_other_rows() {
        let fetcher = ScriptedFetcher::default()
            .with(
                "AAPL",
                StatementKind::Income,
                income(&[("2022-09-30", "1", "1"), ("2023-09-30", "2", "2"), ("2024-09-30", "3", "3")]),
            )
            .with(
                "AAPL",
                StatementKind::Balance,
                balance(&[("2022-09-30", "1", "1"), ("2023-09-30", "2", "2"), ("2024-09-30", "3", "3")]),
            );
        let store = FlakyStore {
            fail_years: vec![2023],
            ..Default::default()
        };

        let summary = run_pipeline_with_window(&fetcher, &store, &companies(&["AAPL"]), &opts(), window())
            .await
            .unwrap();
        assert_eq!(summary.rows_written, 2);
        assert_eq!(summary.rows_failed, 1);

        let years: Vec<i32> = store
            .inner
            .statement_rows()
            .unwrap()
            .iter()
            .map(|r| r.fiscal_year)
            .collect();
        assert_eq!(years, vec![2022, 2024]);
    }

    #[tokio::test]
    async fn run_log_failure_keeps_rows() {
        let fetcher = ScriptedFetcher::default()
            .with("AAPL", StatementKind::Income, income(&[("2023-09-30", "1", "1")]))
            .with("AAPL", StatementKind::Balance, balance(&[("2023-09-30", "1", "1")]));
        let store = FlakyStore {
            fail_run_log: true,
            ..Default::default()
        };

        let summary = run_pipeline_with_window(&fetcher, &store, &companies(&["AAPL"]), &opts(), window())
            .await
            .unwrap();
        assert!(!summary.run_recorded);
        assert_eq!(store.inner.statement_rows().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_unavailable_aborts_the_run() {
        let fetcher = ScriptedFetcher::default()
            .with("AAPL", StatementKind::Income, income(&[("2023-09-30", "1", "1")]))
            .with("AAPL", StatementKind::Balance, balance(&[("2023-09-30", "1", "1")]));
        let store = FlakyStore {
            unavailable: true,
            ..Default::default()
        };

        let err = run_pipeline_with_window(&fetcher, &store, &companies(&["AAPL", "MSFT"]), &opts(), window())
            .await
            .unwrap_err();
        assert!(is_store_unavailable(&err));
        assert_eq!(fetcher.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rerun_overwrites_rows_in_place() {
        let store = MemoryStore::new();
        let first = ScriptedFetcher::default()
            .with("AAPL", StatementKind::Income, income(&[("2023-09-30", "100", "10")]))
            .with("AAPL", StatementKind::Balance, balance(&[("2023-09-30", "1", "1")]));
        let second = ScriptedFetcher::default()
            .with("AAPL", StatementKind::Income, income(&[("2023-09-30", "200", "None")]))
            .with("AAPL", StatementKind::Balance, balance(&[("2023-09-30", "1", "1")]));

        run_pipeline_with_window(&first, &store, &companies(&["AAPL"]), &opts(), window())
            .await
            .unwrap();
        run_pipeline_with_window(&second, &store, &companies(&["AAPL"]), &opts(), window())
            .await
            .unwrap();

        let rows = store.statement_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].revenue, Some(200.0));
        assert_eq!(rows[0].net_income, None);
        assert_eq!(store.etl_runs().unwrap().len(), 2);
    }

    #[test]
    fn rejects_bad_options() {
        let mut o = opts();
        assert!(o.validate().is_ok());
        o.trailing_years = -1;
        assert!(o.validate().is_err());
    }
}
