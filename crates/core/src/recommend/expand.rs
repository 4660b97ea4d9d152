//! LLM-backed candidate generation, one function per dimension family.
//!
//! Each function makes exactly one chat call per group, parses the JSON
//! reply, and turns it into ADD candidates. Parsing is split out into pure
//! functions; a malformed reply surfaces as an error carrying the raw output
//! and the caller decides how to isolate the failure.

use crate::classify::{ClassifiedRow, PerformanceTier};
use crate::domain::{Action, Dimension, Origin, Recommendation, TargetingState};
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json::{array_under, parse_object, string_items};
use crate::llm::{ChatRequest, LlmClient, Provider};
use crate::recommend::seeds::{select_seeds, SeedSource};
use crate::recommend::validate_shape;
use serde_json::json;

const MAX_KEYWORD_IDEAS: usize = 15;
const MAX_ASSET_SUGGESTIONS: usize = 5;
const SEED_EXAMPLE_LIMIT: usize = 3;

fn parse_error(detail: impl Into<String>, raw: &str) -> anyhow::Error {
    LlmDiagnosticsError {
        provider: Provider::OpenAi,
        stage: "parse",
        detail: detail.into(),
        raw_output: Some(raw.to_string()),
        raw_response_json: None,
    }
    .into()
}

fn rows_digest(rows: &[ClassifiedRow]) -> serde_json::Value {
    let items: Vec<serde_json::Value> = rows
        .iter()
        .map(|c| {
            json!({
                "value": c.row.entity_key,
                "tier": c.tier,
                "active": c.row.is_currently_active,
                "metrics": c.row.metrics_json(),
            })
        })
        .collect();
    json!(items)
}

/// Demographic (age/gender) additions: the model picks untargeted segments
/// worth enabling, given the group's per-segment performance.
pub async fn demographic_additions(
    llm: &dyn LlmClient,
    dimension: Dimension,
    group_id: &str,
    group_name: &str,
    classified: &[ClassifiedRow],
    state: &TargetingState,
) -> anyhow::Result<Vec<Recommendation>> {
    let system = format!(
        "You are a paid-search specialist reviewing {} targeting. \
         Reply with a JSON object: {{\"additions\": [{{\"value\": \"...\", \"reason\": \"...\"}}]}}. \
         Only propose segments that are NOT currently targeted. Propose nothing if the data does not support it.",
        dimension.slug()
    );
    let user = json!({
        "ad_group": group_name,
        "currently_targeted": state.active_values(group_id),
        "segment_performance": rows_digest(classified),
    })
    .to_string();

    let output = llm.generate(ChatRequest::json(system, user)).await?;
    let additions = parse_value_reason_items(&output, &["additions", "recommendations"])?;

    let recs = additions
        .into_iter()
        .filter(|(value, _)| {
            !state.is_active(group_id, value) && !dimension.sentinels().contains(&value.as_str())
        })
        .map(|(value, reason)| Recommendation {
            entity_id: None,
            group_id: group_id.to_string(),
            group_name: group_name.to_string(),
            action: Action::Add,
            target_value: value,
            reason,
            resource_reference: None,
            based_on_tier: None,
            origin: None,
            metrics: None,
            applied: false,
        })
        .collect();
    Ok(recs)
}

/// New keyword ideas seeded by the group's best performers and the product
/// summary. Existing keywords are filtered out and the list is capped.
pub async fn keyword_ideas(
    llm: &dyn LlmClient,
    group_id: &str,
    group_name: &str,
    classified: &[ClassifiedRow],
    product_summary: Option<&str>,
) -> anyhow::Result<Vec<Recommendation>> {
    let top: Vec<&str> = classified
        .iter()
        .filter(|c| c.is_top_performer)
        .map(|c| c.row.entity_key.as_str())
        .collect();
    let good: Vec<&str> = classified
        .iter()
        .filter(|c| c.tier == PerformanceTier::Good && !c.is_top_performer)
        .map(|c| c.row.entity_key.as_str())
        .collect();

    let system = format!(
        "You are a paid-search specialist expanding a keyword list. \
         Reply with a JSON object: {{\"keywords\": [\"...\"]}}. \
         Propose at most {MAX_KEYWORD_IDEAS} new keywords closely related to the winners; no duplicates of existing keywords."
    );
    let user = json!({
        "ad_group": group_name,
        "business": product_summary,
        "top_performing_keywords": top,
        "other_good_keywords": good,
    })
    .to_string();

    let output = llm.generate(ChatRequest::json(system, user)).await?;
    let ideas = parse_string_list(&output, &["keywords", "new_keywords"])?;

    let existing: std::collections::HashSet<String> = classified
        .iter()
        .map(|c| c.row.entity_key.to_lowercase())
        .collect();
    let recs = validate_shape(ideas, Dimension::Keyword)
        .into_iter()
        .filter(|k| !existing.contains(&k.to_lowercase()))
        .take(MAX_KEYWORD_IDEAS)
        .map(|keyword| Recommendation {
            entity_id: None,
            group_id: group_id.to_string(),
            group_name: group_name.to_string(),
            action: Action::Add,
            target_value: keyword,
            reason: "Related to top performing keywords".to_string(),
            resource_reference: None,
            based_on_tier: None,
            origin: Some(Origin::Keyword),
            metrics: None,
            applied: false,
        })
        .collect();
    Ok(recs)
}

/// Per-term verdict from one batched structured call over a group's search
/// terms. ADD verdicts become positive keyword candidates, NEGATIVE verdicts
/// become negative keyword candidates, IGNORE is dropped.
#[derive(Debug, Default)]
pub struct SearchTermOutcome {
    pub keyword_adds: Vec<Recommendation>,
    pub negatives: Vec<Recommendation>,
}

pub async fn search_term_verdicts(
    llm: &dyn LlmClient,
    group_id: &str,
    group_name: &str,
    classified: &[ClassifiedRow],
    product_summary: Option<&str>,
) -> anyhow::Result<SearchTermOutcome> {
    if classified.is_empty() {
        return Ok(SearchTermOutcome::default());
    }

    let system = "You are a paid-search specialist triaging search terms. \
                  For every term, decide: ADD (convert to a keyword), NEGATIVE (block it), or IGNORE. \
                  Reply with a JSON object: {\"verdicts\": [{\"term\": \"...\", \"verdict\": \"ADD|NEGATIVE|IGNORE\", \"reason\": \"...\"}]}."
        .to_string();
    let user = json!({
        "ad_group": group_name,
        "business": product_summary,
        "search_terms": rows_digest(classified),
    })
    .to_string();

    let output = llm.generate(ChatRequest::json(system, user)).await?;
    let verdicts = parse_verdicts(&output)?;

    let mut outcome = SearchTermOutcome::default();
    for v in verdicts {
        let Some(c) = classified.iter().find(|c| c.row.entity_key.eq_ignore_ascii_case(&v.term))
        else {
            tracing::warn!(term = %v.term, "verdict for unknown search term; dropped");
            continue;
        };
        let rec = |action: Action| Recommendation {
            entity_id: None,
            group_id: group_id.to_string(),
            group_name: group_name.to_string(),
            action,
            target_value: c.row.entity_key.clone(),
            reason: v.reason.clone(),
            resource_reference: None,
            based_on_tier: Some(c.tier),
            origin: Some(Origin::SearchTerm),
            metrics: Some(c.row.metrics_json()),
            applied: false,
        };
        match v.verdict {
            Verdict::Add => outcome.keyword_adds.push(rec(Action::Add)),
            Verdict::Negative => outcome.negatives.push(rec(Action::Add)),
            Verdict::Ignore => {}
        }
    }
    Ok(outcome)
}

/// Replacement assets (headlines/descriptions) generated from the seed
/// ladder. Returns shape-validated suggestion texts, capped.
pub async fn asset_suggestions(
    llm: &dyn LlmClient,
    dimension: Dimension,
    campaign_name: &str,
    group_name: &str,
    classified: &[ClassifiedRow],
    product_summary: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let (tier1, tier2, tier3) = seed_tiers(classified);
    let selection = select_seeds(&tier1, &tier2, &tier3, campaign_name, group_name);
    let examples: Vec<String> = selection.examples.into_iter().take(SEED_EXAMPLE_LIMIT).collect();

    let max_len = dimension.max_text_len().unwrap_or(90);
    let system = format!(
        "You are an ad copywriter. Write {MAX_ASSET_SUGGESTIONS} new {} variants, \
         each at most {max_len} characters. \
         Reply with a JSON object: {{\"suggestions\": [\"...\"]}}.",
        dimension.slug()
    );
    let user = match selection.source {
        SeedSource::CampaignContext => json!({
            "business": product_summary,
            "context_keywords": selection.context_keywords,
        }),
        SeedSource::BestPractices => json!({
            "business": product_summary,
            "guidance": "No historical examples available; follow general direct-response copy best practices.",
        }),
        _ => json!({
            "business": product_summary,
            "examples_that_performed_well": examples,
            "example_source": selection.source.label(),
        }),
    }
    .to_string();

    let output = llm.generate(ChatRequest::json(system, user)).await?;
    let suggestions = parse_string_list(&output, &["suggestions", "variants"])?;

    Ok(validate_shape(suggestions, dimension)
        .into_iter()
        .take(MAX_ASSET_SUGGESTIONS)
        .collect())
}

/// Seed tiers for asset generation: top performers first, then the remaining
/// GOOD rows, then LEARNING/PENDING rows still gathering data.
pub(crate) fn seed_tiers(classified: &[ClassifiedRow]) -> (Vec<String>, Vec<String>, Vec<String>) {
    let keys = |pred: &dyn Fn(&ClassifiedRow) -> bool| -> Vec<String> {
        classified
            .iter()
            .filter(|c| pred(c))
            .map(|c| c.row.entity_key.clone())
            .collect()
    };
    (
        keys(&|c| c.is_top_performer),
        keys(&|c| c.tier == PerformanceTier::Good && !c.is_top_performer),
        keys(&|c| c.tier == PerformanceTier::Learning),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Add,
    Negative,
    Ignore,
}

#[derive(Debug)]
struct TermVerdict {
    term: String,
    verdict: Verdict,
    reason: String,
}

fn parse_verdicts(output: &str) -> anyhow::Result<Vec<TermVerdict>> {
    let value = parse_object(output)?;
    let items = array_under(&value, &["verdicts", "results"])
        .ok_or_else(|| parse_error("missing verdicts array", output))?;

    let mut verdicts = Vec::with_capacity(items.len());
    for item in items {
        let Some(term) = item.get("term").and_then(|v| v.as_str()) else {
            return Err(parse_error("verdict item missing term", output));
        };
        let verdict = match item.get("verdict").and_then(|v| v.as_str()) {
            Some("ADD") => Verdict::Add,
            Some("NEGATIVE") => Verdict::Negative,
            Some("IGNORE") | None => Verdict::Ignore,
            Some(other) => return Err(parse_error(format!("unknown verdict {other:?}"), output)),
        };
        let reason = item
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("Search term triage")
            .to_string();
        verdicts.push(TermVerdict {
            term: term.to_string(),
            verdict,
            reason,
        });
    }
    Ok(verdicts)
}

fn parse_string_list(output: &str, keys: &[&str]) -> anyhow::Result<Vec<String>> {
    let value = parse_object(output)?;
    let items = array_under(&value, keys)
        .ok_or_else(|| parse_error(format!("missing one of {keys:?}"), output))?;
    Ok(string_items(items))
}

fn parse_value_reason_items(output: &str, keys: &[&str]) -> anyhow::Result<Vec<(String, String)>> {
    let value = parse_object(output)?;
    let items = array_under(&value, keys)
        .ok_or_else(|| parse_error(format!("missing one of {keys:?}"), output))?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(v) = item.get("value").and_then(|v| v.as_str()) else {
            return Err(parse_error("item missing value", output));
        };
        let reason = item
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("Model recommendation")
            .to_string();
        out.push((v.to_string(), reason));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, Thresholds};
    use crate::domain::{MetricRow, RawMetricRow};

    fn labeled_asset(key: &str, label: &str) -> MetricRow {
        MetricRow::new(RawMetricRow {
            entity_id: format!("asset/{key}"),
            entity_key: key.to_string(),
            group_id: "g1".to_string(),
            group_name: "Group".to_string(),
            campaign_id: "c1".to_string(),
            campaign_name: "Campaign".to_string(),
            campaign_type: "SEARCH".to_string(),
            impressions: 500,
            clicks: 10,
            conversions: 0.0,
            cost: 20.0,
            quality_score: None,
            performance_label: Some(label.to_string()),
            is_currently_active: true,
            resource_reference: None,
        })
    }

    #[test]
    fn learning_assets_feed_the_third_seed_rung() {
        let rows = vec![
            labeled_asset("Old Headline", "LOW"),
            labeled_asset("Fresh Variant", "LEARNING"),
        ];
        let classified = classify(rows, Dimension::Headline, &Thresholds::default());

        let (tier1, tier2, tier3) = seed_tiers(&classified);
        assert!(tier1.is_empty());
        assert!(tier2.is_empty());
        assert_eq!(tier3, vec!["Fresh Variant"]);

        let sel = select_seeds(&tier1, &tier2, &tier3, "Campaign", "Group");
        assert_eq!(sel.source, SeedSource::Tier3);
        assert_eq!(sel.examples, vec!["Fresh Variant"]);
    }

    #[test]
    fn top_performers_do_not_repeat_in_the_second_rung() {
        let rows = vec![
            labeled_asset("Only Winner", "BEST"),
            labeled_asset("Decent", "GOOD"),
        ];
        // Both map to GOOD; one becomes the top performer and must not also
        // appear as a tier-2 example.
        let classified = classify(rows, Dimension::Headline, &Thresholds::default());
        let (tier1, tier2, _) = seed_tiers(&classified);
        assert_eq!(tier1.len(), 1);
        assert!(!tier2.contains(&tier1[0]));
    }

    #[test]
    fn parse_verdicts_maps_all_outcomes() {
        let output = r#"{"verdicts": [
            {"term": "cheap plumber", "verdict": "ADD", "reason": "converts"},
            {"term": "plumber jobs", "verdict": "NEGATIVE", "reason": "hiring intent"},
            {"term": "plumber", "verdict": "IGNORE"}
        ]}"#;
        let verdicts = parse_verdicts(output).unwrap();
        assert_eq!(verdicts.len(), 3);
        assert_eq!(verdicts[0].verdict, Verdict::Add);
        assert_eq!(verdicts[1].verdict, Verdict::Negative);
        assert_eq!(verdicts[2].verdict, Verdict::Ignore);
    }

    #[test]
    fn parse_verdicts_rejects_unknown_verdict() {
        let output = r#"{"verdicts": [{"term": "x", "verdict": "MAYBE"}]}"#;
        assert!(parse_verdicts(output).is_err());
    }

    #[test]
    fn parse_string_list_tolerates_fences_and_alternate_keys() {
        let output = "```json\n{\"new_keywords\": [\"emergency plumber\", \"24h plumber\"]}\n```";
        let list = parse_string_list(output, &["keywords", "new_keywords"]).unwrap();
        assert_eq!(list, vec!["emergency plumber", "24h plumber"]);
    }

    #[test]
    fn parse_value_reason_defaults_missing_reason() {
        let output = r#"{"additions": [{"value": "AGE_RANGE_25_34"}]}"#;
        let items = parse_value_reason_items(output, &["additions"]).unwrap();
        assert_eq!(items[0].0, "AGE_RANGE_25_34");
        assert_eq!(items[0].1, "Model recommendation");
    }

    #[test]
    fn parse_value_reason_requires_value() {
        let output = r#"{"additions": [{"reason": "no value here"}]}"#;
        assert!(parse_value_reason_items(output, &["additions"]).is_err());
    }
}
