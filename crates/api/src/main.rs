use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use adwise_core::domain::{CampaignRecommendation, Dimension, RecommendationFields};
use adwise_core::ingest::HttpAdsDataProvider;
use adwise_core::llm::openai::OpenAiClient;
use adwise_core::pipeline::{ClientContext, Pipeline, PipelineError};
use adwise_core::storage;

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

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let provider = Arc::new(HttpAdsDataProvider::from_settings(&settings)?);
    let llm = Arc::new(OpenAiClient::from_settings(&settings)?);
    let pipeline = Arc::new(Pipeline::new(
        provider.clone(),
        provider,
        llm,
        pool.clone(),
    ));

    let state = AppState { pool, pipeline };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/ds/optimize/:dimension", post(optimize))
        .route("/api/ds/recommendations", get(list_recommendations))
        .route("/api/ds/recommendations/:id/apply", post(apply_items))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    pipeline: Arc<Pipeline>,
}

#[derive(Debug, Serialize)]
struct SuccessBody<T: Serialize> {
    status: &'static str,
    data: T,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, error: impl Into<String>, details: Option<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            status: "error",
            error: error.into(),
            details,
        }),
    )
}

fn client_code(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-client-code")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "missing x-client-code header",
                None,
            )
        })
}

#[derive(Debug, Serialize)]
struct RecommendationsData {
    recommendations: Vec<CampaignRecommendation>,
}

/// Runs the full pipeline for one dimension, synchronously. Holds the run
/// lock while working so a scheduled worker run for the same client and
/// dimension cannot interleave.
async fn optimize(
    State(state): State<AppState>,
    Path(dimension): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SuccessBody<RecommendationsData>>, ApiError> {
    let dimension = Dimension::from_slug(&dimension).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            format!("unknown optimization dimension: {dimension}"),
            None,
        )
    })?;
    let client_code = client_code(&headers)?;
    let ctx = ClientContext {
        client_code: client_code.clone(),
    };

    let locked = match &state.pool {
        Some(pool) => {
            let acquired = storage::lock::try_acquire_run_lock(pool, &client_code, dimension)
                .await
                .map_err(internal)?;
            if !acquired {
                return Err(api_error(
                    StatusCode::CONFLICT,
                    "a run for this client and dimension is already in progress",
                    None,
                ));
            }
            true
        }
        None => false,
    };

    let result = state.pipeline.run(&ctx, dimension).await;

    if locked {
        if let Some(pool) = &state.pool {
            let _ = storage::lock::release_run_lock(pool, &client_code, dimension).await;
        }
    }

    let recommendations = result.map_err(|err| match err {
        PipelineError::NoAccounts(_) => {
            api_error(StatusCode::NOT_FOUND, err.to_string(), None)
        }
        PipelineError::Accounts(source) => {
            sentry_anyhow::capture_anyhow(&source);
            api_error(
                StatusCode::BAD_GATEWAY,
                "failed to list accessible accounts",
                Some(format!("{source:#}")),
            )
        }
    })?;

    Ok(Json(SuccessBody {
        status: "success",
        data: RecommendationsData { recommendations },
    }))
}

async fn list_recommendations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SuccessBody<RecommendationsData>>, ApiError> {
    let Some(pool) = &state.pool else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "database unavailable",
            None,
        ));
    };
    let client_code = client_code(&headers)?;

    let recommendations = storage::records::list_open_records(pool, &client_code)
        .await
        .map_err(internal)?;

    Ok(Json(SuccessBody {
        status: "success",
        data: RecommendationsData { recommendations },
    }))
}

#[derive(Debug, Deserialize)]
struct ApplyRequest {
    fields: RecommendationFields,
    #[serde(default)]
    partial: bool,
}

#[derive(Debug, Serialize)]
struct ApplyData {
    matched: usize,
    completed: bool,
}

/// Marks the items the caller actually pushed to the ad platform as applied.
/// A partial payload never erases the record's other fields.
async fn apply_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApplyRequest>,
) -> Result<Json<SuccessBody<ApplyData>>, ApiError> {
    let Some(pool) = &state.pool else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "database unavailable",
            None,
        ));
    };

    let outcome = storage::records::apply_items(pool, id, &req.fields, req.partial)
        .await
        .map_err(internal)?;

    Ok(Json(SuccessBody {
        status: "success",
        data: ApplyData {
            matched: outcome.matched,
            completed: outcome.completed,
        },
    }))
}

fn internal(e: anyhow::Error) -> ApiError {
    sentry_anyhow::capture_anyhow(&e);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal error",
        Some(format!("{e:#}")),
    )
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
