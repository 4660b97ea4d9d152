use crate::classify::PerformanceTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Add,
    Remove,
}

/// Which generator produced a keyword-family recommendation. Drives the
/// origin-scoped merge in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    Keyword,
    SearchTerm,
}

/// A single proposed action against one dimension value in one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// None for a pure ADD of a never-before-seen value.
    #[serde(default)]
    pub entity_id: Option<String>,
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    pub action: Action,
    pub target_value: String,
    pub reason: String,
    /// Present only on REMOVE when a live platform resource exists.
    #[serde(default)]
    pub resource_reference: Option<String>,
    /// Traceability back to the classification that produced this.
    #[serde(default)]
    pub based_on_tier: Option<PerformanceTier>,
    #[serde(default)]
    pub origin: Option<Origin>,
    #[serde(default)]
    pub metrics: Option<serde_json::Value>,
    #[serde(default)]
    pub applied: bool,
}

/// Recommendations grouped under their storage field key ("age", "keywords",
/// "headlines", ...). BTreeMap keeps serialization order stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationFields(pub BTreeMap<String, Vec<Recommendation>>);

impl RecommendationFields {
    pub fn single(key: &str, items: Vec<Recommendation>) -> Self {
        let mut map = BTreeMap::new();
        if !items.is_empty() {
            map.insert(key.to_string(), items);
        }
        Self(map)
    }

    pub fn insert(&mut self, key: &str, items: Vec<Recommendation>) {
        if !items.is_empty() {
            self.0.insert(key.to_string(), items);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| v.is_empty())
    }

    pub fn total_items(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

/// One campaign's worth of recommendations, the unit that gets persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecommendation {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub platform: String,
    pub parent_account_id: String,
    pub account_id: String,
    #[serde(default)]
    pub product_id: Option<String>,
    pub campaign_id: String,
    pub campaign_name: String,
    pub campaign_type: String,
    #[serde(default)]
    pub completed: bool,
    pub fields: RecommendationFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serializes_upper_case() {
        assert_eq!(serde_json::to_value(Action::Add).unwrap(), "ADD");
        assert_eq!(serde_json::to_value(Action::Remove).unwrap(), "REMOVE");
        assert_eq!(
            serde_json::to_value(Origin::SearchTerm).unwrap(),
            "SEARCH_TERM"
        );
    }

    #[test]
    fn empty_fields_are_not_inserted() {
        let mut fields = RecommendationFields::default();
        fields.insert("age", vec![]);
        assert!(fields.is_empty());
        assert_eq!(fields.total_items(), 0);
    }
}
