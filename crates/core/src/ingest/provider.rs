use crate::config::Settings;
use crate::domain::MetricRow;
use crate::ingest::types::{
    AccountRef, AccountsResponse, CampaignProduct, CampaignProductsResponse, MetricScope,
    MetricsResponse,
};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

#[async_trait::async_trait]
pub trait AccountsProvider: Send + Sync {
    async fn list_accessible_accounts(&self, client_code: &str) -> Result<Vec<AccountRef>>;

    /// Campaign id -> product link. A failure here degrades gracefully at
    /// the call site (prompts lose product grounding, nothing else).
    async fn campaign_product_map(
        &self,
        client_code: &str,
    ) -> Result<BTreeMap<String, CampaignProduct>>;
}

#[async_trait::async_trait]
pub trait MetricsProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_metrics(&self, scope: &MetricScope) -> Result<Vec<MetricRow>>;
}

#[derive(Debug, Clone)]
pub struct HttpAdsDataProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
}

impl HttpAdsDataProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_ads_data_base_url()?.to_string();
        let api_key = settings.ads_data_api_key.clone();

        let timeout_secs = std::env::var("ADS_DATA_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("ADS_DATA_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build ads data http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn get_once<Q: Serialize, Res: DeserializeOwned>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<Res> {
        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .context("ads data request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read ads data response")?;
        if !status.is_success() {
            anyhow::bail!("ads data HTTP {status}: {text}");
        }

        serde_json::from_str::<Res>(&text)
            .with_context(|| format!("ads data response did not parse: {text}"))
    }

    /// GET with bounded retries and exponential backoff, the same policy for
    /// every endpoint.
    async fn get_with_retries<Q: Serialize + Sync, Res: DeserializeOwned>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<Res> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_once(path, query).await {
                Ok(res) => return Ok(res),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, path, error = %err, "ads data fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl AccountsProvider for HttpAdsDataProvider {
    async fn list_accessible_accounts(&self, client_code: &str) -> Result<Vec<AccountRef>> {
        let res: AccountsResponse = self
            .get_with_retries("/v1/accounts", &[("client_code", client_code)])
            .await?;
        for account in &res.accounts {
            validate_account(account)?;
        }
        Ok(res.accounts)
    }

    async fn campaign_product_map(
        &self,
        client_code: &str,
    ) -> Result<BTreeMap<String, CampaignProduct>> {
        let res: CampaignProductsResponse = self
            .get_with_retries("/v1/campaign_products", &[("client_code", client_code)])
            .await?;
        Ok(res
            .items
            .into_iter()
            .map(|p| (p.campaign_id.clone(), p))
            .collect())
    }
}

#[async_trait::async_trait]
impl MetricsProvider for HttpAdsDataProvider {
    fn provider_name(&self) -> &'static str {
        "ads_data_http_json"
    }

    async fn fetch_metrics(&self, scope: &MetricScope) -> Result<Vec<MetricRow>> {
        let query = [
            ("client_code", scope.client_code.as_str()),
            ("parent_account_id", scope.parent_account_id.as_str()),
            ("account_id", scope.account_id.as_str()),
            ("dimension", scope.dimension.slug()),
        ];
        let res: MetricsResponse = self.get_with_retries("/v1/metrics", &query).await?;

        for row in &res.rows {
            validate_row(row)?;
        }
        Ok(res.rows.into_iter().map(MetricRow::new).collect())
    }
}

fn validate_account(account: &AccountRef) -> Result<()> {
    anyhow::ensure!(
        !account.account_id.trim().is_empty(),
        "account_id must be non-empty"
    );
    anyhow::ensure!(
        !account.parent_account_id.trim().is_empty(),
        "parent_account_id must be non-empty"
    );
    Ok(())
}

fn validate_row(row: &crate::domain::RawMetricRow) -> Result<()> {
    anyhow::ensure!(!row.entity_id.trim().is_empty(), "entity_id must be non-empty");
    anyhow::ensure!(!row.group_id.trim().is_empty(), "group_id must be non-empty");
    anyhow::ensure!(
        !row.campaign_id.trim().is_empty(),
        "campaign_id must be non-empty"
    );
    anyhow::ensure!(row.cost >= 0.0, "cost must be non-negative");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_metrics_response_and_derives_ratios() {
        let v = json!({
            "rows": [
                {
                    "entity_id": "criterion/123",
                    "entity_key": "emergency plumber",
                    "group_id": "ag1",
                    "group_name": "Plumbing",
                    "campaign_id": "c1",
                    "campaign_name": "Services",
                    "impressions": 1000,
                    "clicks": 50,
                    "conversions": 5.0,
                    "cost": 250.0,
                    "is_currently_active": true
                }
            ]
        });
        let parsed: MetricsResponse = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].campaign_type, "SEARCH");

        let rows: Vec<MetricRow> = parsed.rows.into_iter().map(MetricRow::new).collect();
        assert!((rows[0].ctr - 0.05).abs() < 1e-9);
    }

    #[test]
    fn validate_row_rejects_blank_ids() {
        let v = json!({
            "entity_id": " ",
            "entity_key": "x",
            "group_id": "g",
            "campaign_id": "c",
            "impressions": 0,
            "clicks": 0,
            "conversions": 0.0,
            "cost": 0.0,
            "is_currently_active": true
        });
        let row: crate::domain::RawMetricRow = serde_json::from_value(v).unwrap();
        assert!(validate_row(&row).is_err());
    }

    #[test]
    fn validate_account_requires_parent() {
        let account = AccountRef {
            parent_account_id: String::new(),
            account_id: "123".to_string(),
            name: String::new(),
        };
        assert!(validate_account(&account).is_err());
    }
}
