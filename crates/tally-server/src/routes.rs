use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, warn};

use tally_engine::{CounterCache, CursorCache, EngineError};
use tally_types::api::{
    CountResponse, CursorResponse, ErrorResponse, EventAccepted, MostActiveQuery,
    MostActiveResponse, TopUsersQuery, TopUsersResponse, TotalResponse,
};
use tally_types::events::LiveEvent;
use tally_types::models::{ChannelId, UserId};

const MAX_TOP_USERS: usize = 100;

pub struct AppStateInner {
    pub counters: CounterCache,
    pub cursors: CursorCache,
    pub events: mpsc::Sender<LiveEvent>,
}

pub type AppState = Arc<AppStateInner>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("event queue closed")]
    Unavailable,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Engine(EngineError::NoActivity(_)) => StatusCode::NOT_FOUND,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Engine(e) => {
                error!("Request failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let error = match self {
            Self::Engine(EngineError::NoActivity(_)) => "no activity".to_string(),
            Self::Engine(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/users/{user_id}/channels/{channel_id}/count", get(get_count))
        .route("/users/{user_id}/total", get(get_total))
        .route("/users/{user_id}/most-active", get(most_active))
        .route("/channels/{channel_id}/top-users", get(top_users))
        .route("/channels/{channel_id}/cursor", get(get_cursor))
        .route("/cursors", get(list_cursors))
        .route("/events", post(post_event))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_count(
    State(state): State<AppState>,
    Path((user_id, channel_id)): Path<(UserId, ChannelId)>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.counters.get_count(user_id, channel_id).await?;
    Ok(Json(CountResponse {
        user_id,
        channel_id,
        count,
    }))
}

async fn get_total(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<TotalResponse>, ApiError> {
    let total = state.counters.total_for_user(user_id).await?;
    Ok(Json(TotalResponse { user_id, total }))
}

async fn most_active(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<MostActiveQuery>,
) -> Result<Json<MostActiveResponse>, ApiError> {
    let candidates = parse_channels(&query.channels)?;
    let channels = state
        .counters
        .most_active(user_id, &candidates, query.limit)
        .await?;
    Ok(Json(MostActiveResponse { user_id, channels }))
}

async fn top_users(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Query(query): Query<TopUsersQuery>,
) -> Result<Json<TopUsersResponse>, ApiError> {
    let users = state
        .counters
        .top_users(channel_id, query.limit.min(MAX_TOP_USERS))
        .await?;
    Ok(Json(TopUsersResponse { channel_id, users }))
}

async fn get_cursor(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<CursorResponse>, ApiError> {
    let cursor = match state.cursors.get(channel_id).await? {
        Some(cursor) => cursor.into(),
        None => CursorResponse::unseen(channel_id),
    };
    Ok(Json(cursor))
}

async fn list_cursors(
    State(state): State<AppState>,
) -> Result<Json<Vec<CursorResponse>>, ApiError> {
    let cursors = state.cursors.list().await?;
    Ok(Json(cursors.into_iter().map(CursorResponse::from).collect()))
}

async fn post_event(
    State(state): State<AppState>,
    Json(event): Json<LiveEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = event.kind();
    state.events.send(event).await.map_err(|_| {
        warn!(kind, "Live event rejected, ingestor stopped");
        ApiError::Unavailable
    })?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted {
            kind: kind.to_string(),
        }),
    ))
}

fn parse_channels(raw: &str) -> Result<Vec<ChannelId>, ApiError> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| ApiError::BadRequest(format!("invalid channel id {:?}", s.trim())))
        })
        .collect()
}
