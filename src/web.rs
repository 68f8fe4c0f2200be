use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::Query as MultiQuery;
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    cleaner,
    config::Config,
    db::Db,
    models::{CleanError, CleanResult, CleaningOptions, StoredOptions, Strategy},
    rule_store::RuleStore,
};

pub const DEFAULT_PROFILE: &str = "default";

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub rules: RuleStore,
}

/// Wraps internal failures into a JSON 500.
pub struct AppError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        warn!("Request failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{:#}", self.0) })),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct CleanQuery {
    url: String,
    strategy: Option<String>,
    profile: Option<String>,
    #[serde(default)]
    keep: Vec<String>,
    #[serde(default)]
    remove: Vec<String>,
    remove_referral: Option<bool>,
    clean_hash: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanRequest {
    url: String,
    #[serde(default)]
    strategy: Strategy,
    profile: Option<String>,
    options: Option<CleaningOptions>,
}

#[derive(Deserialize)]
struct ProfileQuery {
    profile: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/clean", get(clean_get).post(clean_post))
        .route("/options", get(get_options).put(put_options))
        .route("/rules/status", get(rules_status))
        .route("/rules/refresh", post(rules_refresh))
        .route("/history", get(history))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config, state: AppState) -> anyhow::Result<()> {
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    info!("Cleaning service listening on {}", config.server_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn stored_options(db: &Db, profile: &str) -> StoredOptions {
    match db.get_options(profile).await {
        Ok(options) => options,
        Err(e) => {
            warn!(profile, "Falling back to default options: {:#}", e);
            StoredOptions::defaults_for(profile)
        }
    }
}

#[tracing::instrument(skip(state, result), fields(changed = result.changed))]
async fn respond(state: &AppState, input: &str, strategy: Strategy, result: CleanResult) -> Response {
    let status = match result.error {
        None => StatusCode::OK,
        Some(CleanError::InvalidUrl) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(CleanError::RulesUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
    };

    if result.changed {
        let strategy_name = match strategy {
            Strategy::Heuristic => "heuristic",
            Strategy::Rules => "rules",
        };
        if let Err(e) = state
            .db
            .log_cleaned_link(input, &result.url, strategy_name, result.unwrapped_from.as_deref())
            .await
        {
            warn!("Failed to record cleaned link: {:#}", e);
        }
    }

    (status, Json(result)).into_response()
}

async fn clean_get(State(state): State<AppState>, MultiQuery(q): MultiQuery<CleanQuery>) -> Response {
    let strategy = match q.strategy.as_deref().map(str::parse::<Strategy>).transpose() {
        Ok(strategy) => strategy.unwrap_or_default(),
        Err(msg) => return (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response(),
    };

    let profile = q.profile.as_deref().unwrap_or(DEFAULT_PROFILE);
    let mut options = stored_options(&state.db, profile).await.to_options();
    options.keep_params.extend(q.keep);
    options.extra_bad_params.extend(q.remove);
    if let Some(remove_referral) = q.remove_referral {
        options.remove_referral = remove_referral;
        options.allow_referral = !remove_referral;
    }
    if let Some(clean_hash) = q.clean_hash {
        options.clean_hash = clean_hash;
    }

    let snapshot = state.rules.snapshot();
    let result = cleaner::run(strategy, &q.url, snapshot.as_deref(), &options);
    respond(&state, &q.url, strategy, result).await
}

async fn clean_post(State(state): State<AppState>, Json(req): Json<CleanRequest>) -> Response {
    let options = match req.options {
        Some(options) => options,
        None => {
            let profile = req.profile.as_deref().unwrap_or(DEFAULT_PROFILE);
            stored_options(&state.db, profile).await.to_options()
        }
    };

    let snapshot = state.rules.snapshot();
    let result = cleaner::run(req.strategy, &req.url, snapshot.as_deref(), &options);
    respond(&state, &req.url, req.strategy, result).await
}

async fn get_options(
    State(state): State<AppState>,
    Query(q): Query<ProfileQuery>,
) -> Result<Json<CleaningOptions>, AppError> {
    let profile = q.profile.as_deref().unwrap_or(DEFAULT_PROFILE);
    let stored = state.db.get_options(profile).await?;
    Ok(Json(stored.to_options()))
}

async fn put_options(
    State(state): State<AppState>,
    Query(q): Query<ProfileQuery>,
    Json(options): Json<CleaningOptions>,
) -> Result<Response, AppError> {
    let profile = q.profile.as_deref().unwrap_or(DEFAULT_PROFILE);
    let stored = match StoredOptions::from_options(profile, &options) {
        Ok(stored) => stored,
        Err(msg) => return Ok((StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()),
    };
    state.db.save_options(&stored).await?;
    info!(profile, "Saved options");
    Ok(Json(stored.to_options()).into_response())
}

async fn rules_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.rules.status())
}

async fn rules_refresh(State(state): State<AppState>) -> Response {
    match state.rules.refresh().await {
        Ok(_) => Json(state.rules.status()).into_response(),
        Err(e) => {
            warn!("Manual rule refresh failed: {:#}", e);
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": format!("{:#}", e) }))).into_response()
        }
    }
}

async fn history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = q.limit.unwrap_or(50).clamp(1, 1000);
    Ok(Json(state.db.get_history(limit).await?))
}
