use crate::domain::MetricRow;
use std::collections::BTreeMap;

/// Per-group snapshot of which dimension values are currently active, with
/// the platform resource reference where one exists. Built fresh from the
/// adapter's rows on every run; never cached across runs.
#[derive(Debug, Clone, Default)]
pub struct TargetingState {
    groups: BTreeMap<String, BTreeMap<String, Option<String>>>,
}

impl TargetingState {
    pub fn from_rows(rows: &[MetricRow]) -> Self {
        let mut state = Self::default();
        for row in rows {
            if row.is_currently_active {
                state.insert(
                    &row.group_id,
                    &row.entity_key,
                    row.resource_reference.clone(),
                );
            }
        }
        state
    }

    pub fn insert(&mut self, group_id: &str, value: &str, resource_reference: Option<String>) {
        self.groups
            .entry(group_id.to_string())
            .or_default()
            .insert(value.to_string(), resource_reference);
    }

    pub fn is_active(&self, group_id: &str, value: &str) -> bool {
        self.groups
            .get(group_id)
            .is_some_and(|g| g.contains_key(value))
    }

    pub fn resource_reference(&self, group_id: &str, value: &str) -> Option<&str> {
        self.groups
            .get(group_id)?
            .get(value)?
            .as_deref()
    }

    /// Currently active values for a group, in deterministic order.
    pub fn active_values(&self, group_id: &str) -> Vec<&str> {
        self.groups
            .get(group_id)
            .map(|g| g.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn active_count(&self, group_id: &str) -> usize {
        self.groups.get(group_id).map_or(0, |g| g.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawMetricRow;

    fn row(group: &str, key: &str, active: bool) -> MetricRow {
        MetricRow::new(RawMetricRow {
            entity_id: format!("{group}:{key}"),
            entity_key: key.to_string(),
            group_id: group.to_string(),
            group_name: String::new(),
            campaign_id: "c1".to_string(),
            campaign_name: String::new(),
            campaign_type: "SEARCH".to_string(),
            impressions: 10,
            clicks: 1,
            conversions: 0.0,
            cost: 1.0,
            quality_score: None,
            performance_label: None,
            is_currently_active: active,
            resource_reference: active.then(|| format!("res/{key}")),
        })
    }

    #[test]
    fn tracks_only_active_rows() {
        let rows = vec![row("g1", "25-34", true), row("g1", "35-44", false)];
        let state = TargetingState::from_rows(&rows);
        assert!(state.is_active("g1", "25-34"));
        assert!(!state.is_active("g1", "35-44"));
        assert_eq!(state.active_count("g1"), 1);
        assert_eq!(state.resource_reference("g1", "25-34"), Some("res/25-34"));
    }

    #[test]
    fn active_values_are_ordered() {
        let rows = vec![row("g1", "b", true), row("g1", "a", true)];
        let state = TargetingState::from_rows(&rows);
        assert_eq!(state.active_values("g1"), vec!["a", "b"]);
    }
}
