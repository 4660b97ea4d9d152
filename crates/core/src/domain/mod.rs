pub mod dimension;
pub mod metrics;
pub mod recommendation;
pub mod targeting;

pub use dimension::Dimension;
pub use metrics::{MetricRow, RawMetricRow};
pub use recommendation::{
    Action, CampaignRecommendation, Origin, Recommendation, RecommendationFields,
};
pub use targeting::TargetingState;
