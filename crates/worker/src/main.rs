use anyhow::Context;
use clap::Parser;
use finboard_core::domain::company::parse_universe;
use finboard_core::etl::pipeline::{run_pipeline, EtlOptions, RunSummary};
use finboard_core::ingest::provider::AlphaVantageFetcher;
use finboard_core::storage::memory::MemoryStore;
use finboard_core::storage::PgStatementStore;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "finboard_worker")]
struct Args {
    /// Companies to process, `SYMBOL` or `SYMBOL=Name`, comma separated. Overrides ETL_SYMBOLS.
    #[arg(long)]
    symbols: Option<String>,

    /// Seconds to wait between companies. Overrides ETL_COMPANY_DELAY_SECS.
    #[arg(long)]
    delay_secs: Option<u64>,

    /// Keep fiscal years >= current year minus this. Overrides ETL_TRAILING_YEARS.
    #[arg(long)]
    trailing_years: Option<i32>,

    /// Fetch, normalize and reconcile, but write nothing to the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = finboard_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let companies = parse_universe(args.symbols.as_deref().unwrap_or(settings.symbols_spec()))?;

    let mut opts = EtlOptions::from_env();
    if let Some(secs) = args.delay_secs {
        opts.company_delay = Duration::from_secs(secs);
    }
    if let Some(years) = args.trailing_years {
        opts.trailing_years = years;
    }
    opts.validate()?;

    let fetcher = AlphaVantageFetcher::from_settings(&settings)?;

    if args.dry_run {
        let store = MemoryStore::new();
        let summary = run_pipeline(&fetcher, &store, &companies, &opts).await?;

        let rows = store.statement_rows()?;
        for m in finboard_core::metrics::derive_metrics(&rows) {
            tracing::info!(
                symbol = %m.symbol,
                fiscal_year = m.fiscal_year,
                net_margin = ?m.net_margin,
                current_ratio = ?m.current_ratio,
                revenue_yoy = ?m.revenue_yoy,
                net_income_yoy = ?m.net_income_yoy,
                "dry-run: derived metrics"
            );
        }
        log_summary(&summary, true);
        return Ok(());
    }

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    finboard_core::storage::migrate(&pool).await?;

    let Some(lock) = finboard_core::storage::lock::try_acquire_etl_lock(&pool).await? else {
        tracing::warn!("etl lock not acquired; another run in progress");
        return Ok(());
    };

    let store = PgStatementStore::new(pool.clone());
    let result = run_pipeline(&fetcher, &store, &companies, &opts).await;

    if let Err(err) = lock.release().await {
        tracing::warn!(error = %err, "failed to release etl lock");
    }

    match result {
        Ok(summary) => {
            log_summary(&summary, false);
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "etl run failed");
            Err(err)
        }
    }
}

fn log_summary(summary: &RunSummary, dry_run: bool) {
    let json = serde_json::to_string(summary).unwrap_or_default();
    tracing::info!(dry_run, summary = %json, "etl run summary");
}

fn init_sentry(settings: &finboard_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
