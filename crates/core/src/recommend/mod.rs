pub mod expand;
pub mod seeds;

use crate::classify::{ClassifiedRow, PerformanceTier};
use crate::domain::{Action, Dimension, MetricRow, Recommendation};

/// Removal strategy: programmatic, no LLM. Every POOR/CRITICAL row that is
/// currently active yields exactly one REMOVE, with the classifier's
/// accumulated signals as the reason.
pub fn removals(classified: &[ClassifiedRow]) -> Vec<Recommendation> {
    classified
        .iter()
        .filter(|c| c.tier.is_poor() && c.row.is_currently_active)
        .map(|c| Recommendation {
            entity_id: Some(c.row.entity_id.clone()),
            group_id: c.row.group_id.clone(),
            group_name: c.row.group_name.clone(),
            action: Action::Remove,
            target_value: c.row.entity_key.clone(),
            reason: c.reason(),
            resource_reference: c.row.resource_reference.clone(),
            based_on_tier: Some(c.tier),
            origin: None,
            metrics: Some(c.row.metrics_json()),
            applied: false,
        })
        .collect()
}

const LOCATION_REMOVE_CLICKS: u64 = 50;
const LOCATION_REMOVE_SPEND: f64 = 10.0;

/// Location rules are programmatic in both directions: converting untargeted
/// locations become ADD candidates, targeted locations burning spend without
/// conversions become REMOVE candidates.
pub fn location_candidates(rows: &[MetricRow]) -> Vec<Recommendation> {
    let mut out = Vec::new();
    for row in rows {
        if row.is_currently_active {
            if row.conversions == 0.0
                && row.clicks >= LOCATION_REMOVE_CLICKS
                && row.cost > LOCATION_REMOVE_SPEND
            {
                out.push(location_rec(
                    row,
                    Action::Remove,
                    "High spend & clicks but zero conversions",
                ));
            }
        } else if row.conversions > 0.0 {
            out.push(location_rec(
                row,
                Action::Add,
                "Conversions from non-targeted location",
            ));
        }
    }
    out
}

fn location_rec(row: &MetricRow, action: Action, reason: &str) -> Recommendation {
    Recommendation {
        entity_id: (action == Action::Remove).then(|| row.entity_id.clone()),
        group_id: row.group_id.clone(),
        group_name: row.group_name.clone(),
        action,
        target_value: row.entity_key.clone(),
        reason: reason.to_string(),
        resource_reference: if action == Action::Remove {
            row.resource_reference.clone()
        } else {
            None
        },
        based_on_tier: Some(match action {
            Action::Remove => PerformanceTier::Poor,
            Action::Add => PerformanceTier::Good,
        }),
        origin: None,
        metrics: Some(row.metrics_json()),
        applied: false,
    }
}

/// Shape-only validation for generated candidates: trimmed, non-empty,
/// within the dimension's length limit, case-insensitive deduped. Semantic
/// validity is the generator collaborator's job, not re-derived here.
pub fn validate_shape(suggestions: Vec<String>, dimension: Dimension) -> Vec<String> {
    let max_len = dimension.max_text_len();
    let mut seen = std::collections::HashSet::new();
    let mut valid = Vec::new();

    for suggestion in suggestions {
        let text = suggestion.trim();
        if text.is_empty() {
            continue;
        }
        if let Some(max) = max_len {
            if text.chars().count() > max {
                tracing::warn!(text, length = text.chars().count(), max, "rejected suggestion (too long)");
                continue;
            }
        }
        if !seen.insert(text.to_lowercase()) {
            continue;
        }
        valid.push(text.to_string());
    }

    valid
}
