pub mod classify;
pub mod domain;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod reconcile;
pub mod recommend;
pub mod storage;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub openai_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub ads_data_base_url: Option<String>,
        pub ads_data_api_key: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                ads_data_base_url: std::env::var("ADS_DATA_BASE_URL").ok(),
                ads_data_api_key: std::env::var("ADS_DATA_API_KEY").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_openai_api_key(&self) -> anyhow::Result<&str> {
            self.openai_api_key
                .as_deref()
                .context("OPENAI_API_KEY is required")
        }

        pub fn require_ads_data_base_url(&self) -> anyhow::Result<&str> {
            self.ads_data_base_url
                .as_deref()
                .context("ADS_DATA_BASE_URL is required")
        }
    }
}
