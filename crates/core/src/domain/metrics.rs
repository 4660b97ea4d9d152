use serde::{Deserialize, Serialize};

/// One measured entity as returned by the metrics adapter, before derived
/// ratios are computed. This is also the wire shape of the adapter response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMetricRow {
    pub entity_id: String,
    pub entity_key: String,
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    pub campaign_id: String,
    #[serde(default)]
    pub campaign_name: String,
    #[serde(default = "default_campaign_type")]
    pub campaign_type: String,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: f64,
    pub cost: f64,
    #[serde(default)]
    pub quality_score: Option<u8>,
    /// Platform-reported performance label for asset rows
    /// (LOW/GOOD/BEST/LEARNING/PENDING). Absent for non-asset dimensions.
    #[serde(default)]
    pub performance_label: Option<String>,
    pub is_currently_active: bool,
    #[serde(default)]
    pub resource_reference: Option<String>,
}

fn default_campaign_type() -> String {
    "SEARCH".to_string()
}

/// A metric row with its derived ratios. Derived values are computed exactly
/// once, at construction, and are never recomputed downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRow {
    pub entity_id: String,
    pub entity_key: String,
    pub group_id: String,
    pub group_name: String,
    pub campaign_id: String,
    pub campaign_name: String,
    pub campaign_type: String,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: f64,
    pub cost: f64,
    pub quality_score: Option<u8>,
    pub performance_label: Option<String>,
    pub is_currently_active: bool,
    pub resource_reference: Option<String>,
    pub product_id: Option<String>,
    pub product_summary: Option<String>,

    /// clicks / impressions, 0 when impressions = 0.
    pub ctr: f64,
    /// cost / clicks, 0 when clicks = 0.
    pub cpc: f64,
    /// cost / conversions, None when conversions = 0.
    pub cpa: Option<f64>,
    /// conversions / clicks, 0 when clicks = 0.
    pub conv_rate: f64,
}

impl MetricRow {
    pub fn new(raw: RawMetricRow) -> Self {
        let ctr = if raw.impressions > 0 {
            raw.clicks as f64 / raw.impressions as f64
        } else {
            0.0
        };
        let cpc = if raw.clicks > 0 {
            raw.cost / raw.clicks as f64
        } else {
            0.0
        };
        let cpa = if raw.conversions > 0.0 {
            Some(raw.cost / raw.conversions)
        } else {
            None
        };
        let conv_rate = if raw.clicks > 0 {
            raw.conversions / raw.clicks as f64
        } else {
            0.0
        };

        Self {
            entity_id: raw.entity_id,
            entity_key: raw.entity_key,
            group_id: raw.group_id,
            group_name: raw.group_name,
            campaign_id: raw.campaign_id,
            campaign_name: raw.campaign_name,
            campaign_type: raw.campaign_type,
            impressions: raw.impressions,
            clicks: raw.clicks,
            conversions: raw.conversions,
            cost: raw.cost,
            quality_score: raw.quality_score,
            performance_label: raw.performance_label,
            is_currently_active: raw.is_currently_active,
            resource_reference: raw.resource_reference,
            product_id: None,
            product_summary: None,
            ctr,
            cpc,
            cpa,
            conv_rate,
        }
    }

    /// A compact metrics blob attached to recommendations for display.
    pub fn metrics_json(&self) -> serde_json::Value {
        serde_json::json!({
            "impressions": self.impressions,
            "clicks": self.clicks,
            "conversions": self.conversions,
            "cost": self.cost,
            "ctr": self.ctr,
            "cpc": self.cpc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn raw(entity_id: &str, impressions: u64, clicks: u64, conversions: f64, cost: f64) -> RawMetricRow {
        RawMetricRow {
            entity_id: entity_id.to_string(),
            entity_key: entity_id.to_string(),
            group_id: "g1".to_string(),
            group_name: "Group 1".to_string(),
            campaign_id: "c1".to_string(),
            campaign_name: "Campaign 1".to_string(),
            campaign_type: "SEARCH".to_string(),
            impressions,
            clicks,
            conversions,
            cost,
            quality_score: None,
            performance_label: None,
            is_currently_active: true,
            resource_reference: None,
        }
    }

    #[test]
    fn derived_ratios_are_zero_safe() {
        let row = MetricRow::new(raw("a", 0, 0, 0.0, 0.0));
        assert_eq!(row.ctr, 0.0);
        assert_eq!(row.cpc, 0.0);
        assert_eq!(row.cpa, None);
        assert_eq!(row.conv_rate, 0.0);
    }

    #[test]
    fn derived_ratios_match_definition() {
        let row = MetricRow::new(raw("a", 1000, 50, 5.0, 250.0));
        assert!((row.ctr - 0.05).abs() < 1e-9);
        assert!((row.cpc - 5.0).abs() < 1e-9);
        assert!((row.cpa.unwrap() - 50.0).abs() < 1e-9);
        assert!((row.conv_rate - 0.1).abs() < 1e-9);
    }
}
