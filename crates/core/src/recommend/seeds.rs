use crate::llm::LlmClient;

/// Where the generation examples came from, in fallback priority order.
/// The first non-empty source wins; sources are never combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSource {
    Tier1,
    Tier2,
    Tier3,
    CampaignContext,
    BestPractices,
}

impl SeedSource {
    pub fn label(&self) -> &'static str {
        match self {
            SeedSource::Tier1 => "tier_1",
            SeedSource::Tier2 => "tier_2",
            SeedSource::Tier3 => "tier_3",
            SeedSource::CampaignContext => "campaign_context",
            SeedSource::BestPractices => "general_best_practices",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeedSelection {
    pub source: SeedSource,
    /// Example texts to anchor generation on (empty for the last two rungs).
    pub examples: Vec<String>,
    /// Stopword-filtered context keywords (CampaignContext rung only).
    pub context_keywords: Vec<String>,
}

/// Walks the fallback ladder: tier-1 examples, then tier-2, then tier-3,
/// then contextual keywords from surrounding names, then generic best
/// practices with no examples at all.
pub fn select_seeds(
    tier1: &[String],
    tier2: &[String],
    tier3: &[String],
    campaign_name: &str,
    group_name: &str,
) -> SeedSelection {
    for (source, examples) in [
        (SeedSource::Tier1, tier1),
        (SeedSource::Tier2, tier2),
        (SeedSource::Tier3, tier3),
    ] {
        if !examples.is_empty() {
            return SeedSelection {
                source,
                examples: examples.to_vec(),
                context_keywords: Vec::new(),
            };
        }
    }

    let keywords = extract_context_keywords(campaign_name, group_name);
    if !keywords.is_empty() {
        tracing::warn!(?keywords, "no example assets; using campaign context");
        return SeedSelection {
            source: SeedSource::CampaignContext,
            examples: Vec::new(),
            context_keywords: keywords,
        };
    }

    tracing::warn!("no examples and no context; falling back to best practices");
    SeedSelection {
        source: SeedSource::BestPractices,
        examples: Vec::new(),
        context_keywords: Vec::new(),
    }
}

const STOPWORDS: &[&str] = &[
    "campaign", "ad", "group", "adgroup", "the", "a", "an", "and", "or", "but", "in", "on", "at",
    "to", "for",
];

/// Lowercased alphabetic words from the campaign and group names, stopwords
/// and short words removed, capped at five.
pub fn extract_context_keywords(campaign_name: &str, group_name: &str) -> Vec<String> {
    let text = format!("{campaign_name} {group_name}").to_lowercase();
    let mut words: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
    {
        if !words.iter().any(|w| w == word) {
            words.push(word.to_string());
        }
        if words.len() == 5 {
            break;
        }
    }
    words
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Ranks the selected examples by embedding similarity to the target text
/// and keeps the closest `k`. Falls back to the first `k` examples when the
/// embedding collaborator fails; ordering ties break on original position.
pub async fn rank_examples_by_similarity(
    llm: &dyn LlmClient,
    target: &str,
    examples: &[String],
    k: usize,
) -> Vec<String> {
    if examples.len() <= k {
        return examples.to_vec();
    }

    let mut inputs = Vec::with_capacity(examples.len() + 1);
    inputs.push(target.to_string());
    inputs.extend(examples.iter().cloned());

    let embeddings = match llm.embed(&inputs).await {
        Ok(e) => e,
        Err(err) => {
            tracing::warn!(error = %err, "embedding failed; keeping first examples");
            return examples.iter().take(k).cloned().collect();
        }
    };
    let (target_emb, example_embs) = embeddings.split_at(1);

    let mut ranked: Vec<(usize, f32)> = example_embs
        .iter()
        .enumerate()
        .map(|(i, emb)| (i, cosine_similarity(&target_emb[0], emb)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .take(k)
        .map(|(i, _)| examples[i].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_non_empty_tier_wins() {
        let t2 = vec!["learning one".to_string()];
        let t3 = vec!["other".to_string()];
        let sel = select_seeds(&[], &t2, &t3, "Campaign", "Group");
        assert_eq!(sel.source, SeedSource::Tier2);
        assert_eq!(sel.examples, t2);
    }

    #[test]
    fn sources_are_never_combined() {
        let t1 = vec!["best".to_string()];
        let t2 = vec!["learning".to_string()];
        let sel = select_seeds(&t1, &t2, &[], "c", "g");
        assert_eq!(sel.source, SeedSource::Tier1);
        assert_eq!(sel.examples, vec!["best"]);
    }

    #[test]
    fn falls_back_to_context_keywords() {
        let sel = select_seeds(&[], &[], &[], "Plumbing Services Campaign", "Emergency Ad Group");
        assert_eq!(sel.source, SeedSource::CampaignContext);
        assert_eq!(sel.context_keywords, vec!["plumbing", "services", "emergency"]);
    }

    #[test]
    fn falls_back_to_best_practices_without_context() {
        let sel = select_seeds(&[], &[], &[], "Ad Campaign", "");
        assert_eq!(sel.source, SeedSource::BestPractices);
        assert!(sel.examples.is_empty());
    }

    #[test]
    fn context_keywords_filter_stopwords_and_cap() {
        let words = extract_context_keywords(
            "the best summer sale campaign for garden furniture",
            "patio chairs ad group",
        );
        assert_eq!(words, vec!["best", "summer", "sale", "garden", "furniture"]);
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
