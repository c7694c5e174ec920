pub mod domain;
pub mod etl;
pub mod ingest;
pub mod metrics;
pub mod storage;

pub mod config {
    use anyhow::Context;

    const DEFAULT_ALPHA_VANTAGE_BASE_URL: &str = "https://www.alphavantage.co";
    const DEFAULT_SYMBOLS: &str =
        "AAPL=Apple Inc.,MSFT=Microsoft Corporation,GOOGL=Alphabet Inc.";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub alpha_vantage_api_key: Option<String>,
        pub alpha_vantage_base_url: String,
        pub symbols: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                alpha_vantage_api_key: std::env::var("ALPHA_VANTAGE_API_KEY").ok(),
                alpha_vantage_base_url: std::env::var("ALPHA_VANTAGE_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_ALPHA_VANTAGE_BASE_URL.to_string()),
                symbols: std::env::var("ETL_SYMBOLS")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_alpha_vantage_api_key(&self) -> anyhow::Result<&str> {
            self.alpha_vantage_api_key
                .as_deref()
                .context("ALPHA_VANTAGE_API_KEY is required")
        }

        /// Raw company universe spec, `SYMBOL` or `SYMBOL=Display Name`, comma separated.
        pub fn symbols_spec(&self) -> &str {
            self.symbols.as_deref().unwrap_or(DEFAULT_SYMBOLS)
        }
    }
}
