pub mod provider;
pub mod types;

pub use provider::{AccountsProvider, HttpAdsDataProvider, MetricsProvider};
pub use types::{AccountRef, CampaignProduct, MetricScope};
