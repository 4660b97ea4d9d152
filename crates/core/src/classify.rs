use crate::domain::{Dimension, MetricRow};
use serde::{Deserialize, Serialize};

/// Discrete performance bucket for a measured entity.
///
/// CRITICAL is a stricter subset of POOR: every critical row also satisfies
/// the poor predicate (`is_poor`), it never bypasses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceTier {
    Good,
    Poor,
    Critical,
    Learning,
    InsufficientData,
}

impl PerformanceTier {
    pub fn is_poor(&self) -> bool {
        matches!(self, PerformanceTier::Poor | PerformanceTier::Critical)
    }

    /// Maps the ad platform's asset performance labels onto our tiers.
    pub fn from_platform_label(label: &str) -> PerformanceTier {
        match label {
            "LOW" => PerformanceTier::Poor,
            "GOOD" | "BEST" => PerformanceTier::Good,
            "LEARNING" | "PENDING" => PerformanceTier::Learning,
            _ => PerformanceTier::InsufficientData,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub efficiency: f64,
    pub impressions: f64,
    pub conversions: f64,
}

/// Threshold configuration for one dimension. Values are configuration, not
/// hard-coded logic: each dimension gets a named default set and individual
/// values can be overridden from the environment.
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// CTR floor, in percent.
    pub ctr_floor_pct: f64,
    pub quality_score_floor: u8,
    /// A row's CPL is "high" above this multiple of the campaign median.
    pub cpl_multiplier: f64,
    /// Clicks needed before zero conversions / low conversion rate counts.
    pub significance_clicks: u64,
    /// Conversion-rate floor, in percent.
    pub conv_rate_floor_pct: f64,
    pub critical_clicks: u64,
    pub critical_cost: f64,
    /// Below this many impressions a row is INSUFFICIENT_DATA (absent a
    /// critical failure).
    pub min_impressions: u64,
    pub default_max_cpl: f64,
    pub default_min_cpl: f64,
    /// Fraction of GOOD rows flagged as top performers.
    pub top_fraction: f64,
    pub weights: ScoreWeights,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ctr_floor_pct: 2.0,
            quality_score_floor: 4,
            cpl_multiplier: 1.5,
            significance_clicks: 15,
            conv_rate_floor_pct: 1.0,
            critical_clicks: 50,
            critical_cost: 2000.0,
            min_impressions: 10,
            default_max_cpl: 2000.0,
            default_min_cpl: 50.0,
            top_fraction: 0.2,
            weights: ScoreWeights {
                efficiency: 0.40,
                impressions: 0.30,
                conversions: 0.30,
            },
        }
    }
}

impl Thresholds {
    pub fn for_dimension(dimension: Dimension) -> Self {
        let mut t = match dimension {
            Dimension::SearchTerm => Self {
                ctr_floor_pct: 1.5,
                critical_cost: 1500.0,
                ..Self::default()
            },
            Dimension::Age | Dimension::Gender => Self {
                ctr_floor_pct: 1.0,
                significance_clicks: 25,
                ..Self::default()
            },
            _ => Self::default(),
        };
        t.apply_env_overrides();
        t
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_f64("ADWISE_CTR_FLOOR_PCT") {
            self.ctr_floor_pct = v;
        }
        if let Some(v) = env_f64("ADWISE_CRITICAL_COST") {
            self.critical_cost = v;
        }
        if let Some(v) = env_u64("ADWISE_CRITICAL_CLICKS") {
            self.critical_clicks = v;
        }
        if let Some(v) = env_u64("ADWISE_MIN_IMPRESSIONS") {
            self.min_impressions = v;
        }
        if let Some(v) = env_f64("ADWISE_TOP_FRACTION") {
            self.top_fraction = v;
        }
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}

/// A metric row tagged with exactly one tier, the audit reasons behind it,
/// and the top-performer flag used for downstream seeding.
#[derive(Debug, Clone)]
pub struct ClassifiedRow {
    pub row: MetricRow,
    pub tier: PerformanceTier,
    pub reasons: Vec<String>,
    pub is_top_performer: bool,
}

impl ClassifiedRow {
    pub fn reason(&self) -> String {
        self.reasons.join("; ")
    }
}

/// Classifies each row into exactly one tier. Deterministic: identical input
/// yields identical output, including top-performer selection order.
pub fn classify(rows: Vec<MetricRow>, dimension: Dimension, t: &Thresholds) -> Vec<ClassifiedRow> {
    let median_cpl = median_cpl(&rows, t);

    let mut out: Vec<ClassifiedRow> = rows
        .into_iter()
        .map(|row| classify_row(row, dimension, t, median_cpl))
        .collect();

    mark_top_performers(&mut out, t);
    out
}

fn classify_row(
    row: MetricRow,
    dimension: Dimension,
    t: &Thresholds,
    median_cpl: f64,
) -> ClassifiedRow {
    // Asset rows come with the platform's own verdict; it is authoritative
    // when present and the metric thresholds only back-fill its absence.
    if dimension.has_performance_labels() {
        if let Some(label) = row.performance_label.as_deref() {
            let tier = PerformanceTier::from_platform_label(label);
            return ClassifiedRow {
                reasons: vec![format!("Platform performance label {label}")],
                tier,
                is_top_performer: false,
                row,
            };
        }
    }

    // Critical first; short-circuits everything else.
    if row.conversions == 0.0 {
        if row.cost >= t.critical_cost {
            return ClassifiedRow {
                reasons: vec![format!("Critical: {:.2} spent with no conversions", row.cost)],
                tier: PerformanceTier::Critical,
                is_top_performer: false,
                row,
            };
        }
        if row.clicks >= t.critical_clicks {
            return ClassifiedRow {
                reasons: vec![format!("Critical: no conversions after {} clicks", row.clicks)],
                tier: PerformanceTier::Critical,
                is_top_performer: false,
                row,
            };
        }
    }

    if row.impressions < t.min_impressions {
        return ClassifiedRow {
            reasons: vec![format!("Insufficient data ({} impressions)", row.impressions)],
            tier: PerformanceTier::InsufficientData,
            is_top_performer: false,
            row,
        };
    }

    let reasons = poor_signals(&row, dimension, t, median_cpl);
    let tier = if reasons.len() >= 2 {
        PerformanceTier::Poor
    } else {
        PerformanceTier::Good
    };

    ClassifiedRow {
        row,
        tier,
        reasons,
        is_top_performer: false,
    }
}

fn poor_signals(
    row: &MetricRow,
    dimension: Dimension,
    t: &Thresholds,
    median_cpl: f64,
) -> Vec<String> {
    let mut signals = Vec::new();
    let ctr_pct = row.ctr * 100.0;
    let conv_rate_pct = row.conv_rate * 100.0;
    let has_significant_clicks = row.clicks >= t.significance_clicks;

    if row.clicks > 0 && ctr_pct < t.ctr_floor_pct {
        signals.push(format!("Low CTR ({ctr_pct:.1}%)"));
    }
    if row.clicks == 0 && row.impressions > 0 {
        signals.push(format!("No clicks after {} impressions", row.impressions));
    }
    if dimension.has_quality_score() {
        if let Some(qs) = row.quality_score {
            if qs <= t.quality_score_floor {
                signals.push(format!("Low quality score ({qs})"));
            }
        }
    }
    if row.conversions == 0.0 && has_significant_clicks {
        signals.push("No conversions despite clicks".to_string());
    }
    if let Some(cpl) = row.cpa {
        if cpl > median_cpl * t.cpl_multiplier {
            signals.push(format!("High CPL ({cpl:.2} vs {median_cpl:.2} median)"));
        }
    }
    if row.conversions > 0.0 && has_significant_clicks && conv_rate_pct < t.conv_rate_floor_pct {
        signals.push(format!("Low conversion rate ({conv_rate_pct:.1}%)"));
    }

    signals
}

fn median_cpl(rows: &[MetricRow], t: &Thresholds) -> f64 {
    let mut valid: Vec<f64> = rows.iter().filter_map(|r| r.cpa).filter(|c| *c > 0.0).collect();
    if valid.is_empty() {
        return t.default_max_cpl;
    }
    valid.sort_by(|a, b| a.total_cmp(b));
    let mid = valid.len() / 2;
    if valid.len() % 2 == 0 {
        (valid[mid - 1] + valid[mid]) / 2.0
    } else {
        valid[mid]
    }
}

/// Flags the top fraction of GOOD rows by a weighted composite score.
/// Stable sort: score descending, then entity_id ascending, so repeated runs
/// on identical input produce identical selections.
fn mark_top_performers(rows: &mut [ClassifiedRow], t: &Thresholds) {
    let good: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, c)| c.tier == PerformanceTier::Good)
        .map(|(i, _)| i)
        .collect();
    if good.is_empty() {
        return;
    }

    let bounds = Bounds::compute(rows, &good, t);
    let mut ranked: Vec<(usize, f64)> = good
        .iter()
        .map(|&i| (i, composite_score(&rows[i].row, &bounds, t)))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| rows[a.0].row.entity_id.cmp(&rows[b.0].row.entity_id))
    });

    let top_count = ((good.len() as f64 * t.top_fraction) as usize).max(1);
    for &(i, _) in ranked.iter().take(top_count) {
        rows[i].is_top_performer = true;
    }
}

struct Bounds {
    max_impressions: f64,
    max_ctr: f64,
    max_conversions: f64,
    max_quality: f64,
    min_cpl: f64,
    max_cpl: f64,
}

impl Bounds {
    fn compute(rows: &[ClassifiedRow], good: &[usize], t: &Thresholds) -> Self {
        let mut b = Bounds {
            max_impressions: 1.0,
            max_ctr: 1.0,
            max_conversions: 1.0,
            max_quality: 10.0,
            min_cpl: t.default_min_cpl,
            max_cpl: t.default_max_cpl,
        };
        let mut cpls: Vec<f64> = Vec::new();
        for &i in good {
            let r = &rows[i].row;
            b.max_impressions = b.max_impressions.max(r.impressions as f64);
            b.max_ctr = b.max_ctr.max(r.ctr);
            b.max_conversions = b.max_conversions.max(r.conversions);
            if let Some(qs) = r.quality_score {
                b.max_quality = b.max_quality.max(qs as f64);
            }
            if let Some(cpl) = r.cpa {
                if cpl > 0.0 {
                    cpls.push(cpl);
                }
            }
        }
        if !cpls.is_empty() {
            b.min_cpl = cpls.iter().copied().fold(f64::INFINITY, f64::min);
            b.max_cpl = cpls
                .iter()
                .copied()
                .fold(0.0_f64, f64::max)
                .min(t.default_max_cpl * 2.0);
        }
        b
    }
}

fn composite_score(row: &MetricRow, b: &Bounds, t: &Thresholds) -> f64 {
    let imp_score = row.impressions as f64 / b.max_impressions * 100.0;
    let ctr_score = row.ctr / b.max_ctr * 100.0;
    let conv_score = row.conversions / b.max_conversions * 100.0;
    let quality_score = row
        .quality_score
        .map(|qs| qs as f64 / b.max_quality * 100.0)
        .unwrap_or(50.0);
    let cpl_score = match row.cpa {
        Some(cpl) if cpl > 0.0 && b.max_cpl > b.min_cpl => {
            (1.0 - (cpl.min(b.max_cpl) - b.min_cpl) / (b.max_cpl - b.min_cpl)) * 100.0
        }
        _ => 50.0,
    };

    let efficiency = (ctr_score + quality_score + cpl_score) / 3.0;
    efficiency * t.weights.efficiency
        + imp_score * t.weights.impressions
        + conv_score * t.weights.conversions
}
