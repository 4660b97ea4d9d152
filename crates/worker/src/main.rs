use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adwise_core::domain::Dimension;
use adwise_core::ingest::HttpAdsDataProvider;
use adwise_core::llm::openai::OpenAiClient;
use adwise_core::pipeline::{ClientContext, Pipeline};

#[derive(Debug, Parser)]
#[command(name = "adwise_worker")]
struct Args {
    /// Client to run for.
    #[arg(long)]
    client_code: String,

    /// Dimension slug (age, gender, locations, keywords, search-terms,
    /// headlines, descriptions). Runs every dimension when omitted.
    #[arg(long)]
    dimension: Option<String>,

    /// Do everything except writing to the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = adwise_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let dimensions: Vec<Dimension> = match args.dimension.as_deref() {
        Some(slug) => vec![Dimension::from_slug(slug)
            .with_context(|| format!("unknown dimension slug: {slug}"))?],
        None => Dimension::ALL.to_vec(),
    };

    let pool = if args.dry_run {
        None
    } else {
        let db_url = settings.require_database_url()?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;
        adwise_core::storage::migrate(&pool).await?;
        Some(pool)
    };

    let provider = Arc::new(HttpAdsDataProvider::from_settings(&settings)?);
    let llm = Arc::new(OpenAiClient::from_settings(&settings)?);
    let pipeline = Pipeline::new(provider.clone(), provider, llm, pool.clone());

    let ctx = ClientContext {
        client_code: args.client_code.clone(),
    };

    for dimension in dimensions {
        if let Err(err) = run_dimension(&pipeline, &ctx, dimension, pool.as_ref(), args.dry_run).await {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(
                dimension = dimension.slug(),
                error = %err,
                "dimension run failed; continuing with the next one"
            );
        }
    }

    Ok(())
}

async fn run_dimension(
    pipeline: &Pipeline,
    ctx: &ClientContext,
    dimension: Dimension,
    pool: Option<&sqlx::PgPool>,
    dry_run: bool,
) -> anyhow::Result<()> {
    if let Some(pool) = pool {
        let acquired =
            adwise_core::storage::lock::try_acquire_run_lock(pool, &ctx.client_code, dimension)
                .await?;
        if !acquired {
            tracing::warn!(
                dimension = dimension.slug(),
                "run lock not acquired; another run in progress"
            );
            return Ok(());
        }
    }

    let result = pipeline.run(ctx, dimension).await;

    if let Some(pool) = pool {
        let _ =
            adwise_core::storage::lock::release_run_lock(pool, &ctx.client_code, dimension).await;
    }

    let recommendations = result?;
    let items: usize = recommendations.iter().map(|r| r.fields.total_items()).sum();
    tracing::info!(
        dimension = dimension.slug(),
        campaigns = recommendations.len(),
        items,
        dry_run,
        "dimension run finished"
    );

    if dry_run {
        println!("{}", serde_json::to_string_pretty(&recommendations)?);
    }

    Ok(())
}

fn init_sentry(settings: &adwise_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
