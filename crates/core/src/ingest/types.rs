use crate::domain::Dimension;
use serde::{Deserialize, Serialize};

/// One advertising account reachable for a client, as listed by the ads data
/// service. `parent_account_id` is the manager account it hangs off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRef {
    pub parent_account_id: String,
    pub account_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsResponse {
    pub accounts: Vec<AccountRef>,
}

/// Campaign-to-product link plus the product summary used to ground
/// generation prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignProduct {
    pub campaign_id: String,
    pub product_id: String,
    #[serde(default)]
    pub product_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignProductsResponse {
    pub items: Vec<CampaignProduct>,
}

/// What to fetch: one client, one account, one dimension.
#[derive(Debug, Clone)]
pub struct MetricScope {
    pub client_code: String,
    pub parent_account_id: String,
    pub account_id: String,
    pub dimension: Dimension,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub rows: Vec<crate::domain::RawMetricRow>,
}
