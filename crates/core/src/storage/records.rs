use crate::domain::{CampaignRecommendation, RecommendationFields};
use crate::storage::merge::{all_applied, apply_payload, carry_applied_flags, merge_fields};
pub use crate::storage::merge::ApplyOutcome;
use anyhow::Context;
use uuid::Uuid;

/// Fetches the open (not completed) record for one campaign, if any. At most
/// one exists per (client, campaign) thanks to the partial unique index.
pub async fn fetch_open_record(
    pool: &sqlx::PgPool,
    client_code: &str,
    campaign_id: &str,
) -> anyhow::Result<Option<(Uuid, RecommendationFields)>> {
    let row: Option<(Uuid, serde_json::Value)> = sqlx::query_as(
        "SELECT id, fields FROM recommendation_records \
         WHERE client_code = $1 AND campaign_id = $2 AND NOT completed",
    )
    .bind(client_code)
    .bind(campaign_id)
    .fetch_optional(pool)
    .await
    .context("fetch open recommendation record failed")?;

    match row {
        None => Ok(None),
        Some((id, fields)) => {
            let fields: RecommendationFields = serde_json::from_value(fields)
                .context("stored recommendation fields did not parse")?;
            Ok(Some((id, fields)))
        }
    }
}

pub async fn list_open_records(
    pool: &sqlx::PgPool,
    client_code: &str,
) -> anyhow::Result<Vec<CampaignRecommendation>> {
    let rows: Vec<(
        Uuid,
        String,
        String,
        String,
        Option<String>,
        String,
        String,
        String,
        serde_json::Value,
    )> = sqlx::query_as(
        "SELECT id, platform, parent_account_id, account_id, product_id, \
                campaign_id, campaign_name, campaign_type, fields \
         FROM recommendation_records \
         WHERE client_code = $1 AND NOT completed \
         ORDER BY campaign_id",
    )
    .bind(client_code)
    .fetch_all(pool)
    .await
    .context("list open recommendation records failed")?;

    rows.into_iter()
        .map(|(id, platform, parent, account, product, cid, cname, ctype, fields)| {
            Ok(CampaignRecommendation {
                id: Some(id),
                platform,
                parent_account_id: parent,
                account_id: account,
                product_id: product,
                campaign_id: cid,
                campaign_name: cname,
                campaign_type: ctype,
                completed: false,
                fields: serde_json::from_value(fields)
                    .context("stored recommendation fields did not parse")?,
            })
        })
        .collect()
}

/// Persists one campaign's recommendations. If an open record exists its
/// fields are merged in (origin-scoped for the keyword family, wholesale
/// otherwise) and applied flags carry forward; otherwise a new record is
/// inserted. Returns the record id.
pub async fn upsert_campaign(
    pool: &sqlx::PgPool,
    client_code: &str,
    rec: &CampaignRecommendation,
) -> anyhow::Result<Uuid> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let open: Option<(Uuid, serde_json::Value)> = sqlx::query_as(
        "SELECT id, fields FROM recommendation_records \
         WHERE client_code = $1 AND campaign_id = $2 AND NOT completed \
         FOR UPDATE",
    )
    .bind(client_code)
    .bind(&rec.campaign_id)
    .fetch_optional(&mut *tx)
    .await
    .context("fetch open recommendation record failed")?;

    let id = match open {
        Some((id, stored)) => {
            let mut merged: RecommendationFields = serde_json::from_value(stored)
                .context("stored recommendation fields did not parse")?;
            let mut fresh = rec.fields.clone();
            carry_applied_flags(&mut fresh, &merged);
            merge_fields(&mut merged, fresh);

            sqlx::query(
                "UPDATE recommendation_records \
                 SET fields = $2, campaign_name = $3, product_id = $4, updated_at = now() \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(serde_json::to_value(&merged).context("serialize merged fields failed")?)
            .bind(&rec.campaign_name)
            .bind(&rec.product_id)
            .execute(&mut *tx)
            .await
            .context("update recommendation record failed")?;
            id
        }
        None => {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO recommendation_records \
                 (id, platform, client_code, parent_account_id, account_id, product_id, \
                  campaign_id, campaign_name, campaign_type, completed, fields) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10)",
            )
            .bind(id)
            .bind(&rec.platform)
            .bind(client_code)
            .bind(&rec.parent_account_id)
            .bind(&rec.account_id)
            .bind(&rec.product_id)
            .bind(&rec.campaign_id)
            .bind(&rec.campaign_name)
            .bind(&rec.campaign_type)
            .bind(serde_json::to_value(&rec.fields).context("serialize fields failed")?)
            .execute(&mut *tx)
            .await
            .context("insert recommendation record failed")?;
            id
        }
    };

    tx.commit().await.context("commit transaction failed")?;
    Ok(id)
}

/// Marks the items named by an apply payload as applied. The record's other
/// fields are preserved untouched; a full apply completes the record, a
/// partial apply leaves it open.
pub async fn apply_items(
    pool: &sqlx::PgPool,
    record_id: Uuid,
    payload: &RecommendationFields,
    is_partial: bool,
) -> anyhow::Result<ApplyOutcome> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let stored: Option<(serde_json::Value,)> = sqlx::query_as(
        "SELECT fields FROM recommendation_records WHERE id = $1 FOR UPDATE",
    )
    .bind(record_id)
    .fetch_optional(&mut *tx)
    .await
    .context("fetch recommendation record failed")?;
    let (stored,) = stored.with_context(|| format!("no recommendation record {record_id}"))?;

    let mut fields: RecommendationFields =
        serde_json::from_value(stored).context("stored recommendation fields did not parse")?;
    let outcome = apply_payload(&mut fields, payload, is_partial);
    if outcome.completed && !all_applied(&fields) {
        tracing::warn!(%record_id, "record completed with unapplied items remaining");
    }

    sqlx::query(
        "UPDATE recommendation_records \
         SET fields = $2, completed = $3, updated_at = now() \
         WHERE id = $1",
    )
    .bind(record_id)
    .bind(serde_json::to_value(&fields).context("serialize fields failed")?)
    .bind(outcome.completed)
    .execute(&mut *tx)
    .await
    .context("update recommendation record failed")?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(outcome)
}
