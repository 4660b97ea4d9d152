use serde::{Deserialize, Serialize};

/// The optimization dimensions the pipeline can run over. Field names differ
/// per dimension on the ad platform; everything downstream of the adapter
/// works on the dimension-parameterized `MetricRow` shape plus the small
/// capability surface exposed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dimension {
    Age,
    Gender,
    Location,
    Keyword,
    SearchTerm,
    Headline,
    Description,
}

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Dimension::Age,
        Dimension::Gender,
        Dimension::Location,
        Dimension::Keyword,
        Dimension::SearchTerm,
        Dimension::Headline,
        Dimension::Description,
    ];

    /// URL path segment used by the API and the metrics adapter.
    pub fn slug(&self) -> &'static str {
        match self {
            Dimension::Age => "age",
            Dimension::Gender => "gender",
            Dimension::Location => "locations",
            Dimension::Keyword => "keywords",
            Dimension::SearchTerm => "search-terms",
            Dimension::Headline => "headlines",
            Dimension::Description => "descriptions",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Dimension> {
        Dimension::ALL.into_iter().find(|d| d.slug() == slug)
    }

    /// Key under which this dimension's recommendations are stored in the
    /// per-campaign record. Search terms feed the keyword field; the negative
    /// verdicts go to `negativeKeywords`.
    pub fn field_key(&self) -> &'static str {
        match self {
            Dimension::Age => "age",
            Dimension::Gender => "gender",
            Dimension::Location => "locationOptimizations",
            Dimension::Keyword | Dimension::SearchTerm => "keywords",
            Dimension::Headline => "headlines",
            Dimension::Description => "descriptions",
        }
    }

    /// Placeholder values the ad platform reports that are not targetable.
    pub fn sentinels(&self) -> &'static [&'static str] {
        match self {
            Dimension::Age => &["AGE_RANGE_UNDETERMINED"],
            Dimension::Gender => &["GENDER_UNDETERMINED"],
            Dimension::Location => &["UNKNOWN"],
            _ => &[],
        }
    }

    /// Maximum text length for generated candidates, where the platform
    /// enforces one.
    pub fn max_text_len(&self) -> Option<usize> {
        match self {
            Dimension::Headline => Some(30),
            Dimension::Description => Some(90),
            _ => None,
        }
    }

    /// Whether removals must be balanced 1:1 with replacement additions.
    pub fn balances_replacements(&self) -> bool {
        matches!(self, Dimension::Headline | Dimension::Description)
    }

    /// Asset dimensions carry a platform performance label that supersedes
    /// the metric thresholds when present.
    pub fn has_performance_labels(&self) -> bool {
        matches!(self, Dimension::Headline | Dimension::Description)
    }

    /// Only keywords expose a quality score on this platform.
    pub fn has_quality_score(&self) -> bool {
        matches!(self, Dimension::Keyword)
    }
}

pub const NEGATIVE_KEYWORDS_FIELD: &str = "negativeKeywords";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_round_trips() {
        for d in Dimension::ALL {
            assert_eq!(Dimension::from_slug(d.slug()), Some(d));
        }
        assert_eq!(Dimension::from_slug("budgets"), None);
    }

    #[test]
    fn keyword_and_search_term_share_a_field() {
        assert_eq!(Dimension::Keyword.field_key(), "keywords");
        assert_eq!(Dimension::SearchTerm.field_key(), "keywords");
    }
}
