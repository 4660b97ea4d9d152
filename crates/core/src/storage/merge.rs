//! Pure merge logic for recommendation fields. Kept free of sqlx so the
//! record-level invariants are testable without a database.

use crate::domain::dimension::NEGATIVE_KEYWORDS_FIELD;
use crate::domain::{Origin, Recommendation, RecommendationFields};
use std::collections::BTreeSet;

/// Keys where two generators write into the same field and a rerun of one
/// must not clobber the other's items.
fn is_origin_scoped(key: &str) -> bool {
    key == "keywords" || key == NEGATIVE_KEYWORDS_FIELD
}

/// Merges a fresh run's fields into an open record's fields.
///
/// Non-shared keys are replaced wholesale: the new run supersedes the old
/// one for that dimension. Shared keyword-family keys are merged by origin:
/// only items whose origin matches one the fresh run produced are replaced,
/// so a keyword rerun leaves search-term items untouched and vice versa.
pub fn merge_fields(existing: &mut RecommendationFields, incoming: RecommendationFields) {
    for (key, items) in incoming.0 {
        if !is_origin_scoped(&key) {
            existing.0.insert(key, items);
            continue;
        }

        let incoming_origins: BTreeSet<Option<Origin>> =
            items.iter().map(|r| r.origin).collect();
        let slot = existing.0.entry(key).or_default();
        slot.retain(|r| !incoming_origins.contains(&r.origin));
        slot.extend(items);
    }
    existing.0.retain(|_, items| !items.is_empty());
}

/// Identity for matching a stored item against an apply payload or a prior
/// run. `resource_reference` wins when both sides carry one; otherwise the
/// natural key (group, value, action) decides. Value comparison is
/// case-insensitive.
fn same_item(a: &Recommendation, b: &Recommendation) -> bool {
    if let (Some(ra), Some(rb)) = (&a.resource_reference, &b.resource_reference) {
        return ra == rb;
    }
    a.group_id == b.group_id
        && a.action == b.action
        && a.target_value.eq_ignore_ascii_case(&b.target_value)
}

/// Carries `applied` flags forward from a previous version of the record so
/// a regeneration never un-applies something already pushed to the platform.
pub fn carry_applied_flags(fresh: &mut RecommendationFields, previous: &RecommendationFields) {
    for (key, items) in fresh.0.iter_mut() {
        let Some(prev_items) = previous.0.get(key) else {
            continue;
        };
        for item in items.iter_mut() {
            if prev_items.iter().any(|p| p.applied && same_item(p, item)) {
                item.applied = true;
            }
        }
    }
}

/// Marks the stored items named by an apply payload as applied, leaving
/// everything else intact. Returns how many items were matched; items in the
/// payload that match nothing are counted separately by the caller via the
/// difference against the payload size.
pub fn mark_applied(stored: &mut RecommendationFields, payload: &RecommendationFields) -> usize {
    let mut matched = 0;
    for (key, applied_items) in &payload.0 {
        let Some(items) = stored.0.get_mut(key) else {
            tracing::warn!(key, "apply payload names a field the record does not have");
            continue;
        };
        for applied in applied_items {
            let mut hit = false;
            for item in items.iter_mut() {
                if same_item(item, applied) {
                    item.applied = true;
                    hit = true;
                }
            }
            if hit {
                matched += 1;
            } else {
                tracing::warn!(key, value = %applied.target_value, "apply payload item matched nothing");
            }
        }
    }
    matched
}

pub fn all_applied(fields: &RecommendationFields) -> bool {
    fields.0.values().flatten().all(|r| r.applied)
}

#[derive(Debug, Clone, Copy)]
pub struct ApplyOutcome {
    pub matched: usize,
    pub completed: bool,
}

/// Applies one payload to a record's stored fields in place. A full apply
/// completes the record even if some items stayed unapplied; a partial apply
/// never does.
pub fn apply_payload(
    stored: &mut RecommendationFields,
    payload: &RecommendationFields,
    is_partial: bool,
) -> ApplyOutcome {
    let matched = mark_applied(stored, payload);
    ApplyOutcome {
        matched,
        completed: !is_partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Action;

    fn rec(group: &str, value: &str, action: Action, origin: Option<Origin>) -> Recommendation {
        Recommendation {
            entity_id: None,
            group_id: group.to_string(),
            group_name: String::new(),
            action,
            target_value: value.to_string(),
            reason: "test".to_string(),
            resource_reference: None,
            based_on_tier: None,
            origin,
            metrics: None,
            applied: false,
        }
    }

    #[test]
    fn non_shared_keys_replace_wholesale() {
        let mut existing = RecommendationFields::single(
            "headlines",
            vec![rec("g1", "Old Headline", Action::Remove, None)],
        );
        let incoming = RecommendationFields::single(
            "headlines",
            vec![rec("g1", "New Headline", Action::Add, None)],
        );
        merge_fields(&mut existing, incoming);
        let items = &existing.0["headlines"];
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].target_value, "New Headline");
    }

    #[test]
    fn keyword_rerun_preserves_search_term_items() {
        let mut existing = RecommendationFields::single(
            "keywords",
            vec![
                rec("g1", "old idea", Action::Add, Some(Origin::Keyword)),
                rec("g1", "converting term", Action::Add, Some(Origin::SearchTerm)),
            ],
        );
        let incoming = RecommendationFields::single(
            "keywords",
            vec![rec("g1", "fresh idea", Action::Add, Some(Origin::Keyword))],
        );
        merge_fields(&mut existing, incoming);

        let values: Vec<&str> = existing.0["keywords"]
            .iter()
            .map(|r| r.target_value.as_str())
            .collect();
        assert!(values.contains(&"converting term"));
        assert!(values.contains(&"fresh idea"));
        assert!(!values.contains(&"old idea"));
    }

    #[test]
    fn unrelated_fields_survive_a_merge() {
        let mut existing =
            RecommendationFields::single("age", vec![rec("g1", "AGE_RANGE_18_24", Action::Remove, None)]);
        let incoming =
            RecommendationFields::single("gender", vec![rec("g1", "FEMALE", Action::Add, None)]);
        merge_fields(&mut existing, incoming);
        assert!(existing.0.contains_key("age"));
        assert!(existing.0.contains_key("gender"));
    }

    #[test]
    fn applied_flags_carry_forward_by_resource_reference() {
        let mut applied_old = rec("g1", "plumber", Action::Remove, None);
        applied_old.resource_reference = Some("res/1".to_string());
        applied_old.applied = true;
        let previous = RecommendationFields::single("keywords", vec![applied_old]);

        let mut regenerated = rec("g1", "PLUMBER", Action::Remove, None);
        regenerated.resource_reference = Some("res/1".to_string());
        let mut fresh = RecommendationFields::single("keywords", vec![regenerated]);

        carry_applied_flags(&mut fresh, &previous);
        assert!(fresh.0["keywords"][0].applied);
    }

    #[test]
    fn partial_apply_keeps_unsent_fields_intact() {
        let mut stored = RecommendationFields::default();
        stored.insert("keywords", vec![rec("g1", "kw a", Action::Add, Some(Origin::Keyword))]);
        stored.insert("headlines", vec![rec("g1", "Headline", Action::Add, None)]);

        // Payload touches only keywords.
        let payload =
            RecommendationFields::single("keywords", vec![rec("g1", "KW A", Action::Add, None)]);
        let matched = mark_applied(&mut stored, &payload);

        assert_eq!(matched, 1);
        assert!(stored.0["keywords"][0].applied);
        assert!(stored.0.contains_key("headlines"));
        assert!(!stored.0["headlines"][0].applied);
        assert!(!all_applied(&stored));
    }

    #[test]
    fn partial_apply_of_one_item_out_of_three() {
        let mut stored = RecommendationFields::single(
            "keywords",
            vec![
                rec("g1", "emergency plumber", Action::Add, Some(Origin::Keyword)),
                rec("g1", "boiler repair", Action::Add, Some(Origin::Keyword)),
                rec("g1", "drain cleaning", Action::Add, Some(Origin::SearchTerm)),
            ],
        );
        let before = serde_json::to_value(&stored).unwrap();

        let payload = RecommendationFields::single(
            "keywords",
            vec![rec("g1", "boiler repair", Action::Add, None)],
        );
        let outcome = apply_payload(&mut stored, &payload, true);

        assert_eq!(outcome.matched, 1);
        assert!(!outcome.completed);

        let items = &stored.0["keywords"];
        assert!(items[1].applied);
        // The two untouched items survive byte-for-byte.
        let after = serde_json::to_value(&stored).unwrap();
        assert_eq!(after["keywords"][0], before["keywords"][0]);
        assert_eq!(after["keywords"][2], before["keywords"][2]);
        assert!(!all_applied(&stored));
    }

    #[test]
    fn full_apply_completes_even_with_leftovers() {
        let mut stored = RecommendationFields::single(
            "keywords",
            vec![
                rec("g1", "kw a", Action::Add, None),
                rec("g1", "kw b", Action::Add, None),
            ],
        );
        let payload =
            RecommendationFields::single("keywords", vec![rec("g1", "kw a", Action::Add, None)]);
        let outcome = apply_payload(&mut stored, &payload, false);
        assert_eq!(outcome.matched, 1);
        assert!(outcome.completed);
    }

    #[test]
    fn unmatched_payload_items_are_not_counted() {
        let mut stored =
            RecommendationFields::single("keywords", vec![rec("g1", "kw a", Action::Add, None)]);
        let payload = RecommendationFields::single(
            "keywords",
            vec![rec("g9", "something else", Action::Add, None)],
        );
        assert_eq!(mark_applied(&mut stored, &payload), 0);
        assert!(!stored.0["keywords"][0].applied);
    }
}
