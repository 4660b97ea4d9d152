use crate::domain::{Action, Dimension, Recommendation, TargetingState};
use std::collections::{BTreeMap, HashSet};

/// Ranked untargeted values per group, best first, used to synthesize
/// replacement ADDs when a dimension requires 1:1 removal balancing.
#[derive(Debug, Clone, Default)]
pub struct ReplacementPool(BTreeMap<String, Vec<String>>);

impl ReplacementPool {
    pub fn insert(&mut self, group_id: &str, ranked_values: Vec<String>) {
        self.0.insert(group_id.to_string(), ranked_values);
    }

    fn ranked(&self, group_id: &str) -> &[String] {
        self.0.get(group_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Validates candidates against the live targeting snapshot.
///
/// Pure, deterministic and idempotent: `reconcile(reconcile(c, s), s)` equals
/// `reconcile(c, s)`. Dropping a candidate is a normal outcome, never an
/// error; an empty result for a group means "no changes this run".
pub fn reconcile(
    candidates: Vec<Recommendation>,
    state: &TargetingState,
    dimension: Dimension,
    replacements: &ReplacementPool,
) -> Vec<Recommendation> {
    let sentinels = dimension.sentinels();

    // Steps 1-4: sentinel drop, composite-key dedupe (first occurrence wins),
    // ADD-already-active drop, REMOVE-not-active drop. Grouped as we go,
    // preserving first-seen group order.
    let mut group_order: Vec<String> = Vec::new();
    let mut adds: BTreeMap<String, Vec<Recommendation>> = BTreeMap::new();
    let mut removes: BTreeMap<String, Vec<Recommendation>> = BTreeMap::new();
    let mut seen: HashSet<(String, String, Action)> = HashSet::new();

    for mut candidate in candidates {
        if sentinels.contains(&candidate.target_value.as_str()) {
            continue;
        }
        let key = (
            candidate.group_id.clone(),
            candidate.target_value.clone(),
            candidate.action,
        );
        if !seen.insert(key) {
            continue;
        }

        let active = state.is_active(&candidate.group_id, &candidate.target_value);
        match candidate.action {
            Action::Add if active => continue,
            Action::Remove if !active => continue,
            _ => {}
        }

        if candidate.action == Action::Remove && candidate.resource_reference.is_none() {
            candidate.resource_reference = state
                .resource_reference(&candidate.group_id, &candidate.target_value)
                .map(str::to_string);
        }

        if !group_order.contains(&candidate.group_id) {
            group_order.push(candidate.group_id.clone());
        }
        match candidate.action {
            Action::Add => adds.entry(candidate.group_id.clone()).or_default().push(candidate),
            Action::Remove => removes.entry(candidate.group_id.clone()).or_default().push(candidate),
        }
    }

    let mut out = Vec::new();
    for group_id in group_order {
        let mut group_adds = adds.remove(&group_id).unwrap_or_default();
        let mut group_removes = removes.remove(&group_id).unwrap_or_default();

        // Step 5: never let this pipeline zero out a group's targeting.
        // Surviving REMOVEs are deduped and all active (steps 2 and 4), so
        // covering every active value reduces to a count comparison.
        if group_adds.is_empty() && !group_removes.is_empty() {
            let active_count = state.active_count(&group_id);
            if active_count > 0 && group_removes.len() >= active_count {
                tracing::warn!(
                    group_id,
                    would_remove = group_removes.len(),
                    "skipping group: recommendations would remove all targeting"
                );
                continue;
            }
        }

        // Step 6: 1:1 replacement balancing where the dimension requires it.
        if dimension.balances_replacements() {
            synthesize_replacements(
                &group_id,
                &mut group_adds,
                &group_removes,
                state,
                replacements,
                dimension,
            );
        }

        out.append(&mut group_adds);
        out.append(&mut group_removes);
    }

    out
}

fn synthesize_replacements(
    group_id: &str,
    adds: &mut Vec<Recommendation>,
    removes: &[Recommendation],
    state: &TargetingState,
    replacements: &ReplacementPool,
    dimension: Dimension,
) {
    if removes.len() <= adds.len() {
        return;
    }
    let group_name = removes
        .first()
        .map(|r| r.group_name.clone())
        .unwrap_or_default();
    let existing: HashSet<String> = adds.iter().map(|a| a.target_value.clone()).collect();

    let mut pool = replacements.ranked(group_id).iter();
    while removes.len() > adds.len() {
        let Some(value) = pool.next() else { break };
        if existing.contains(value) || state.is_active(group_id, value) {
            continue;
        }
        adds.push(Recommendation {
            entity_id: None,
            group_id: group_id.to_string(),
            group_name: group_name.clone(),
            action: Action::Add,
            target_value: value.clone(),
            reason: format!("Replacement for removed {}", dimension.slug()),
            resource_reference: None,
            based_on_tier: None,
            origin: None,
            metrics: None,
            applied: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::PerformanceTier;

    fn candidate(group: &str, value: &str, action: Action) -> Recommendation {
        Recommendation {
            entity_id: Some(format!("{group}:{value}")),
            group_id: group.to_string(),
            group_name: format!("Group {group}"),
            action,
            target_value: value.to_string(),
            reason: "test".to_string(),
            resource_reference: None,
            based_on_tier: Some(PerformanceTier::Poor),
            origin: None,
            metrics: None,
            applied: false,
        }
    }

    fn state(entries: &[(&str, &str)]) -> TargetingState {
        let mut s = TargetingState::default();
        for (group, value) in entries {
            s.insert(group, value, Some(format!("res/{value}")));
        }
        s
    }

    #[test]
    fn drops_sentinel_values() {
        let out = reconcile(
            vec![candidate("g1", "AGE_RANGE_UNDETERMINED", Action::Remove)],
            &state(&[("g1", "AGE_RANGE_UNDETERMINED"), ("g1", "25-34")]),
            Dimension::Age,
            &ReplacementPool::default(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn dedupes_by_group_value_action_first_wins() {
        let mut first = candidate("g1", "shoes", Action::Add);
        first.reason = "first".to_string();
        let mut second = candidate("g1", "shoes", Action::Add);
        second.reason = "second".to_string();

        let out = reconcile(
            vec![first, second],
            &state(&[]),
            Dimension::Keyword,
            &ReplacementPool::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, "first");
    }

    #[test]
    fn drops_add_for_already_active_value() {
        let out = reconcile(
            vec![candidate("g1", "25-34", Action::Add)],
            &state(&[("g1", "25-34")]),
            Dimension::Age,
            &ReplacementPool::default(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn drops_remove_for_inactive_value() {
        let out = reconcile(
            vec![candidate("g1", "55-64", Action::Remove)],
            &state(&[("g1", "25-34")]),
            Dimension::Age,
            &ReplacementPool::default(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn backfills_resource_reference_on_remove() {
        let out = reconcile(
            vec![candidate("g1", "25-34", Action::Remove)],
            &state(&[("g1", "25-34"), ("g1", "35-44")]),
            Dimension::Age,
            &ReplacementPool::default(),
        );
        assert_eq!(out[0].resource_reference.as_deref(), Some("res/25-34"));
    }

    #[test]
    fn all_removal_guard_skips_group() {
        // "35-44" is the only active range and there is no ADD: the group
        // must yield an empty result.
        let out = reconcile(
            vec![candidate("g1", "35-44", Action::Remove)],
            &state(&[("g1", "35-44")]),
            Dimension::Age,
            &ReplacementPool::default(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn all_removal_guard_covers_multi_value_groups() {
        let out = reconcile(
            vec![
                candidate("g1", "25-34", Action::Remove),
                candidate("g1", "35-44", Action::Remove),
            ],
            &state(&[("g1", "25-34"), ("g1", "35-44")]),
            Dimension::Age,
            &ReplacementPool::default(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn all_removal_guard_allows_removal_with_add() {
        let out = reconcile(
            vec![
                candidate("g1", "35-44", Action::Remove),
                candidate("g1", "25-34", Action::Add),
            ],
            &state(&[("g1", "35-44")]),
            Dimension::Age,
            &ReplacementPool::default(),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].action, Action::Add);
        assert_eq!(out[1].action, Action::Remove);
    }

    #[test]
    fn partial_removal_is_allowed_without_adds() {
        let out = reconcile(
            vec![candidate("g1", "35-44", Action::Remove)],
            &state(&[("g1", "35-44"), ("g1", "25-34")]),
            Dimension::Age,
            &ReplacementPool::default(),
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn balances_removals_with_synthesized_adds() {
        let mut pool = ReplacementPool::default();
        pool.insert(
            "g1",
            vec!["Fast Delivery".to_string(), "Free Returns".to_string()],
        );
        let out = reconcile(
            vec![candidate("g1", "Old Headline", Action::Remove)],
            &state(&[("g1", "Old Headline"), ("g1", "Keeper")]),
            Dimension::Headline,
            &pool,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].action, Action::Add);
        assert_eq!(out[0].target_value, "Fast Delivery");
        assert_eq!(out[1].action, Action::Remove);
    }

    #[test]
    fn balancing_stops_when_pool_is_exhausted() {
        let out = reconcile(
            vec![candidate("g1", "Old Headline", Action::Remove)],
            &state(&[("g1", "Old Headline"), ("g1", "Keeper")]),
            Dimension::Headline,
            &ReplacementPool::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, Action::Remove);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut pool = ReplacementPool::default();
        pool.insert("g1", vec!["New One".to_string()]);
        let s = state(&[("g1", "Old Headline"), ("g1", "Keeper"), ("g2", "x")]);
        let candidates = vec![
            candidate("g1", "Old Headline", Action::Remove),
            candidate("g2", "x", Action::Remove),
            candidate("g2", "y", Action::Add),
            candidate("g2", "y", Action::Add),
        ];

        let once = reconcile(candidates, &s, Dimension::Headline, &pool);
        let twice = reconcile(once.clone(), &s, Dimension::Headline, &pool);
        let keys = |v: &[Recommendation]| -> Vec<(String, String, Action)> {
            v.iter()
                .map(|r| (r.group_id.clone(), r.target_value.clone(), r.action))
                .collect()
        };
        assert_eq!(keys(&once), keys(&twice));
    }
}
