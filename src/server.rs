use std::{sync::Arc, time::Duration};

use axum::{
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info};

use crate::{
    directory::{BotDirectory, DirectoryEntry},
    error::{DashboardError, Result},
    filters::TimeFilter,
    message::transform_rows,
    scoring::{coerce_score, validate_score, Scorer},
    sentiment::{
        with_deadline, SentimentAnalysisRequest, SentimentAnalysisResult, SentimentOrchestrator,
    },
    store::Store,
    thread::{group_by_thread, Thread, ThreadMap},
    views::{self, MessageRow, ThreadRow},
};

/// Header carrying the user id established by the upstream auth layer.
pub const USER_HEADER: &str = "x-user-id";

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

pub struct AppState {
    pub store: Store,
    pub scorer: Arc<dyn Scorer>,
    pub orchestrator: SentimentOrchestrator,
    pub directory_timeout: Duration,
    pub scoring_timeout: Duration,
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = DashboardError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|user_id| AuthUser {
                user_id: user_id.to_string(),
            })
            .ok_or(DashboardError::Unauthorized)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/bots", get(bots_handler))
        .route("/api/messages", get(messages_handler))
        .route("/api/threads", get(threads_handler))
        .route("/api/callbacks", get(callbacks_handler))
        .route("/api/groq", post(score_handler))
        .route("/api/sentiment/update", post(update_handler))
        .route("/api/sentiment/analyze", post(analyze_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// -----------------------------------------------------------------------------
// Views
// -----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ViewParams {
    pub bot: Option<String>,
    pub time: Option<TimeFilter>,
    pub thread: Option<String>,
}

/// Load the caller's directory, then only the messages it permits, grouped
/// by thread. Time windows are applied by each view afterwards.
async fn load_threads(
    state: &AppState,
    user: &AuthUser,
    params: &ViewParams,
) -> Result<(ThreadMap, BotDirectory)> {
    let directory = BotDirectory::load(&state.store, &user.user_id, state.directory_timeout).await?;

    let selected = params.bot.as_deref().filter(|b| !b.is_empty());
    if let Some(bot) = selected {
        if !directory.permits(Some(bot)) {
            return Err(DashboardError::forbidden(format!("bot {} is not assigned", bot)));
        }
    }

    let rows = state.store.fetch_messages(&directory.bot_ids(), selected).await?;
    let messages = directory.filter_permitted(transform_rows(rows)?);

    Ok((group_by_thread(messages), directory))
}

async fn bots_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<DirectoryEntry>>> {
    let directory = BotDirectory::load(&state.store, &user.user_id, state.directory_timeout).await?;
    Ok(Json(directory.entries()))
}

async fn messages_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<ViewParams>,
) -> Result<Json<Vec<MessageRow>>> {
    let (threads, directory) = load_threads(&state, &user, &params).await?;
    let threads = params.time.unwrap_or_default().apply(threads, Utc::now());
    Ok(Json(views::message_rows(&threads, &directory)))
}

async fn threads_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<ViewParams>,
) -> Result<Json<Vec<ThreadRow>>> {
    let (threads, directory) = load_threads(&state, &user, &params).await?;
    let threads = params.time.unwrap_or_default().retain_threads(threads, Utc::now());
    Ok(Json(views::thread_rows(&threads, &directory)))
}

async fn callbacks_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<ViewParams>,
) -> Result<Json<Vec<MessageRow>>> {
    let (threads, directory) = load_threads(&state, &user, &params).await?;
    let threads = params.time.unwrap_or_default().retain_threads(threads, Utc::now());
    let thread = params.thread.as_deref().filter(|t| !t.is_empty());
    Ok(Json(views::callback_rows(&threads, &directory, thread)))
}

// -----------------------------------------------------------------------------
// Sentiment
// -----------------------------------------------------------------------------

/// The thread, provided every one of its rows belongs to a bot the caller may
/// see. Unknown and hidden threads get the same `NotFound`.
async fn visible_thread(state: &AppState, user: &AuthUser, thread_id: &str) -> Result<Thread> {
    let directory = BotDirectory::load(&state.store, &user.user_id, state.directory_timeout).await?;
    let messages = transform_rows(state.store.thread_messages(thread_id).await?)?;

    let visible = !messages.is_empty()
        && messages.iter().all(|m| directory.permits(m.bot_id.as_deref()));
    if !visible {
        if !messages.is_empty() {
            debug!("Thread {} is outside the directory of {}", thread_id, user.user_id);
        }
        return Err(DashboardError::not_found("No messages found for the thread"));
    }
    Ok(Thread::new(thread_id, &messages))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub message_history: Option<String>,
    pub prompt: Option<String>,
}

async fn score_handler(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(body): Json<ScoreRequest>,
) -> Response {
    let message_history = body.message_history.unwrap_or_default();
    let prompt = body.prompt.unwrap_or_default();

    if message_history.trim().is_empty() || prompt.trim().is_empty() {
        info!(
            "Missing scoring fields: history={} prompt={}",
            !message_history.is_empty(),
            !prompt.is_empty()
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Message history and prompt are required" })),
        )
            .into_response();
    }

    let scoring = state.scorer.score(&message_history, &prompt);
    match with_deadline(state.scoring_timeout, "sentiment scoring", scoring).await {
        Ok(outcome) => Json(json!({
            "score": outcome.score,
            "justification": outcome.justification.unwrap_or_default(),
        }))
        .into_response(),
        Err(e) => {
            error!("Scoring failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to process request", "details": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub thread_id: Option<String>,
    pub score: Option<Value>,
    pub justification: Option<String>,
    pub message_history: Option<String>,
}

async fn update_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<UpdateRequest>,
) -> Result<Json<Value>> {
    let thread_id = body.thread_id.as_deref().map(str::trim).unwrap_or_default();
    let score = match &body.score {
        Some(score) if !score.is_null() && !thread_id.is_empty() => score,
        _ => return Err(DashboardError::validation("Thread ID and score are required")),
    };

    let score = coerce_score(score)
        .map_err(|_| DashboardError::validation("Score must be a valid number"))?;
    let score = validate_score(score).map_err(|e| DashboardError::validation(e.to_string()))?;

    visible_thread(&state, &user, thread_id).await?;

    let updated = state
        .store
        .update_thread_sentiment(
            thread_id,
            score,
            body.justification.as_deref(),
            body.message_history.as_deref(),
        )
        .await?;

    Ok(Json(json!({ "success": true, "updated": updated })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub thread_id: String,
    pub message_history: Option<String>,
    pub prompt: Option<String>,
}

/// Run the score-then-persist workflow for a thread. History and prompt
/// default to the thread transcript and the bot's stored prompt.
async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Json<SentimentAnalysisResult>> {
    let mut request = SentimentAnalysisRequest {
        thread_id: body.thread_id.trim().to_string(),
        message_history: body.message_history.unwrap_or_default(),
        prompt: body.prompt.unwrap_or_default(),
    };

    if !request.thread_id.is_empty() {
        let thread = visible_thread(&state, &user, &request.thread_id).await?;

        if request.message_history.trim().is_empty() {
            request.message_history = thread.transcript();
        }
        if request.prompt.trim().is_empty() {
            request.prompt = match thread.bot_id() {
                Some(bot_id) => state.store.sentiment_prompt(bot_id).await?.unwrap_or_default(),
                None => String::new(),
            };
        }
    }

    let result = state.orchestrator.analyze(&request).await;
    info!(
        "Sentiment analysis for thread {} finished in {:?}",
        request.thread_id, result.state
    );
    Ok(Json(result))
}
