//! The per-run orchestrator: fetch metrics, classify, generate candidates,
//! reconcile against the live targeting snapshot, persist.
//!
//! Failure isolation is layered. A failure listing accounts aborts the run;
//! a failure for one account or one ad group is logged and skipped; a
//! persistence failure is logged loudly but never invalidates the computed
//! recommendations.

use crate::classify::{classify, ClassifiedRow, Thresholds};
use crate::domain::dimension::NEGATIVE_KEYWORDS_FIELD;
use crate::domain::{
    CampaignRecommendation, Dimension, MetricRow, Recommendation, RecommendationFields,
    TargetingState,
};
use crate::ingest::{AccountRef, AccountsProvider, CampaignProduct, MetricScope, MetricsProvider};
use crate::llm::LlmClient;
use crate::reconcile::{reconcile, ReplacementPool};
use crate::recommend::{
    expand, location_candidates, removals,
};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

const PLATFORM: &str = "GOOGLE_ADS";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to list accessible accounts: {0}")]
    Accounts(#[source] anyhow::Error),
    #[error("no accessible accounts for client {0}")]
    NoAccounts(String),
}

/// Everything scoping one run to one client. Passed explicitly; nothing in
/// the pipeline reads client identity from ambient state.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub client_code: String,
}

pub struct Pipeline {
    metrics: Arc<dyn MetricsProvider>,
    accounts: Arc<dyn AccountsProvider>,
    llm: Arc<dyn LlmClient>,
    pool: Option<sqlx::PgPool>,
}

impl Pipeline {
    pub fn new(
        metrics: Arc<dyn MetricsProvider>,
        accounts: Arc<dyn AccountsProvider>,
        llm: Arc<dyn LlmClient>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        Self {
            metrics,
            accounts,
            llm,
            pool,
        }
    }

    /// Runs one dimension for one client across every accessible account.
    /// Returns the recommendations that were produced (and persisted, when a
    /// database is configured).
    pub async fn run(
        &self,
        ctx: &ClientContext,
        dimension: Dimension,
    ) -> Result<Vec<CampaignRecommendation>, PipelineError> {
        let accounts = self
            .accounts
            .list_accessible_accounts(&ctx.client_code)
            .await
            .map_err(PipelineError::Accounts)?;
        if accounts.is_empty() {
            return Err(PipelineError::NoAccounts(ctx.client_code.clone()));
        }

        // Product links ground the generation prompts; losing them degrades
        // prompt quality but must not abort the run.
        let products = match self.accounts.campaign_product_map(&ctx.client_code).await {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!(error = %err, "campaign-product map unavailable; continuing without");
                BTreeMap::new()
            }
        };

        let results = join_all(
            accounts
                .iter()
                .map(|account| self.run_account(ctx, dimension, account, &products)),
        )
        .await;

        let mut out = Vec::new();
        for (account, result) in accounts.iter().zip(results) {
            match result {
                Ok(mut recs) => out.append(&mut recs),
                Err(err) => {
                    tracing::error!(
                        account_id = %account.account_id,
                        dimension = dimension.slug(),
                        error = %err,
                        "account run failed; other accounts unaffected"
                    );
                }
            }
        }
        Ok(out)
    }

    async fn run_account(
        &self,
        ctx: &ClientContext,
        dimension: Dimension,
        account: &AccountRef,
        products: &BTreeMap<String, CampaignProduct>,
    ) -> anyhow::Result<Vec<CampaignRecommendation>> {
        let scope = MetricScope {
            client_code: ctx.client_code.clone(),
            parent_account_id: account.parent_account_id.clone(),
            account_id: account.account_id.clone(),
            dimension,
        };
        let mut rows = self.metrics.fetch_metrics(&scope).await?;
        if rows.is_empty() {
            tracing::info!(account_id = %account.account_id, "no metric rows; nothing to do");
            return Ok(Vec::new());
        }

        // Only campaigns linked to a product are optimized; when the map is
        // unavailable (degraded) everything passes through ungrounded.
        if !products.is_empty() {
            let before = rows.len();
            rows.retain(|row| products.contains_key(&row.campaign_id));
            if rows.len() < before {
                tracing::info!(
                    account_id = %account.account_id,
                    dropped = before - rows.len(),
                    "dropped rows from campaigns without a linked product"
                );
            }
        }
        for row in &mut rows {
            if let Some(product) = products.get(&row.campaign_id) {
                row.product_id = Some(product.product_id.clone());
                row.product_summary = product.product_summary.clone();
            }
        }

        // Built fresh from this fetch; never cached across runs.
        let state = TargetingState::from_rows(&rows);

        let mut by_campaign: BTreeMap<String, Vec<MetricRow>> = BTreeMap::new();
        for row in rows {
            by_campaign.entry(row.campaign_id.clone()).or_default().push(row);
        }

        let mut out = Vec::new();
        for (campaign_id, campaign_rows) in by_campaign {
            let fields = self
                .campaign_fields(dimension, &campaign_rows, &state)
                .await;
            if fields.is_empty() {
                continue;
            }

            let first = &campaign_rows[0];
            let rec = CampaignRecommendation {
                id: None,
                platform: PLATFORM.to_string(),
                parent_account_id: account.parent_account_id.clone(),
                account_id: account.account_id.clone(),
                product_id: first.product_id.clone(),
                campaign_id: campaign_id.clone(),
                campaign_name: first.campaign_name.clone(),
                campaign_type: first.campaign_type.clone(),
                completed: false,
                fields,
            };

            if let Some(pool) = &self.pool {
                match crate::storage::records::upsert_campaign(pool, &ctx.client_code, &rec).await
                {
                    Ok(id) => tracing::info!(
                        campaign_id,
                        record_id = %id,
                        items = rec.fields.total_items(),
                        "recommendation record persisted"
                    ),
                    Err(err) => tracing::error!(
                        campaign_id,
                        error = %err,
                        "persisting recommendations failed; results still returned"
                    ),
                }
            }
            out.push(rec);
        }
        Ok(out)
    }

    /// Produces the recommendation fields for one campaign: per-group
    /// candidate generation, then one reconciliation pass over the whole
    /// candidate set.
    async fn campaign_fields(
        &self,
        dimension: Dimension,
        campaign_rows: &[MetricRow],
        state: &TargetingState,
    ) -> RecommendationFields {
        let mut by_group: BTreeMap<String, Vec<MetricRow>> = BTreeMap::new();
        for row in campaign_rows {
            by_group.entry(row.group_id.clone()).or_default().push(row.clone());
        }

        let thresholds = Thresholds::for_dimension(dimension);
        let mut candidates: Vec<Recommendation> = Vec::new();
        let mut negatives: Vec<Recommendation> = Vec::new();
        let mut replacements = ReplacementPool::default();

        for (group_id, group_rows) in by_group {
            if dimension == Dimension::Location {
                candidates.extend(location_candidates(&group_rows));
                continue;
            }

            let group_name = group_rows[0].group_name.clone();
            let product_summary = group_rows[0].product_summary.clone();
            let classified = classify(group_rows, dimension, &thresholds);

            // Search terms are observations, not targeting entities; there
            // is nothing to remove.
            if dimension != Dimension::SearchTerm {
                candidates.extend(removals(&classified));
            }

            // Generation failures are isolated per group: the programmatic
            // candidates above still stand.
            if let Err(err) = self
                .expand_group(
                    dimension,
                    &group_id,
                    &group_name,
                    product_summary.as_deref(),
                    &classified,
                    state,
                    &mut candidates,
                    &mut negatives,
                    &mut replacements,
                )
                .await
            {
                tracing::error!(
                    group_id,
                    dimension = dimension.slug(),
                    error = %err,
                    "candidate generation failed for group; programmatic candidates kept"
                );
            }
        }

        // Search-term candidates reconcile against an empty snapshot: a term
        // having traffic is not the same as it being targeted.
        let empty_state = TargetingState::default();
        let reconcile_state = if dimension == Dimension::SearchTerm {
            &empty_state
        } else {
            state
        };

        let mut fields = RecommendationFields::default();
        fields.insert(
            dimension.field_key(),
            reconcile(candidates, reconcile_state, dimension, &replacements),
        );
        if !negatives.is_empty() {
            fields.insert(
                NEGATIVE_KEYWORDS_FIELD,
                reconcile(negatives, reconcile_state, dimension, &ReplacementPool::default()),
            );
        }
        fields
    }

    #[allow(clippy::too_many_arguments)]
    async fn expand_group(
        &self,
        dimension: Dimension,
        group_id: &str,
        group_name: &str,
        product_summary: Option<&str>,
        classified: &[ClassifiedRow],
        state: &TargetingState,
        candidates: &mut Vec<Recommendation>,
        negatives: &mut Vec<Recommendation>,
        replacements: &mut ReplacementPool,
    ) -> anyhow::Result<()> {
        match dimension {
            Dimension::Age | Dimension::Gender => {
                let adds = expand::demographic_additions(
                    self.llm.as_ref(),
                    dimension,
                    group_id,
                    group_name,
                    classified,
                    state,
                )
                .await?;
                candidates.extend(adds);
            }
            Dimension::Keyword => {
                let ideas = expand::keyword_ideas(
                    self.llm.as_ref(),
                    group_id,
                    group_name,
                    classified,
                    product_summary,
                )
                .await?;
                candidates.extend(ideas);
            }
            Dimension::SearchTerm => {
                let outcome = expand::search_term_verdicts(
                    self.llm.as_ref(),
                    group_id,
                    group_name,
                    classified,
                    product_summary,
                )
                .await?;
                candidates.extend(outcome.keyword_adds);
                negatives.extend(outcome.negatives);
            }
            Dimension::Headline | Dimension::Description => {
                let campaign_name = classified
                    .first()
                    .map(|c| c.row.campaign_name.clone())
                    .unwrap_or_default();
                let suggestions = expand::asset_suggestions(
                    self.llm.as_ref(),
                    dimension,
                    &campaign_name,
                    group_name,
                    classified,
                    product_summary,
                )
                .await?;
                replacements.insert(group_id, suggestions);
            }
            Dimension::Location => unreachable!("locations are handled programmatically"),
        }
        Ok(())
    }
}
