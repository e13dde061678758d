use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use tradeassist_core::assistant::{ChatReply, ConfirmationOutcome};
use tradeassist_core::audit::AuditFilter;
use tradeassist_core::domain::audit::AuditEvent;
use tradeassist_core::domain::confirmation::TradeConfirmation;
use tradeassist_core::domain::conversation::ConversationMemory;
use tradeassist_core::domain::insight::{Insight, InsightType};
use tradeassist_core::domain::risk::GuardrailsResult;
use tradeassist_core::domain::trade::{TradeRecommendation, TradeRequest};
use tradeassist_core::embeddings::{IndexRequest, SimilarEmbedding};
use tradeassist_core::functions::FunctionDefinition;
use tradeassist_core::prompt::templates::{
    MarketAnalysisData, PortfolioOptimizationData, TradeRecommendationData,
};

use crate::caller::{ApiError, Caller};
use crate::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

const DEFAULT_SESSION_LIMIT: usize = 20;
const DEFAULT_SEARCH_LIMIT: usize = 5;
const MAX_SEARCH_LIMIT: usize = 50;

fn owned_prefix(user_id: i64) -> String {
    format!("{user_id}:")
}

#[derive(Deserialize)]
pub(crate) struct RespondBody {
    message: String,
}

pub(crate) async fn respond(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<RespondBody>,
) -> ApiResult<Value> {
    let reply = state
        .assistant()?
        .generate_response(&caller.ctx, caller.user_id, &body.message)
        .await?;
    Ok(Json(json!({ "reply": reply })))
}

#[derive(Deserialize)]
pub(crate) struct ChatBody {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

pub(crate) async fn chat(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<ChatBody>,
) -> ApiResult<ChatReply> {
    let reply = state
        .assistant()?
        .chat(&caller.ctx, caller.user_id, &body.message, body.session_id.as_deref())
        .await?;
    Ok(Json(reply))
}

pub(crate) async fn list_functions(State(state): State<AppState>, _caller: Caller) -> ApiResult<Vec<FunctionDefinition>> {
    Ok(Json(state.assistant()?.function_definitions()))
}

pub(crate) async fn execute_function(
    State(state): State<AppState>,
    caller: Caller,
    Path(name): Path<String>,
    Json(params): Json<Map<String, Value>>,
) -> ApiResult<Value> {
    let result = state
        .assistant()?
        .execute_function(&caller.ctx, caller.user_id, &name, params)
        .await?;
    Ok(Json(result))
}

/// Raw model output; the body is parsed as a function call, not as JSON.
pub(crate) async fn function_call(State(state): State<AppState>, caller: Caller, body: String) -> ApiResult<Value> {
    let result = state
        .assistant()?
        .handle_function_call(&caller.ctx, caller.user_id, &body)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub(crate) struct InsightsBody {
    #[serde(default)]
    portfolio: Value,
    #[serde(default)]
    trade_history: Value,
    insight_types: Vec<InsightType>,
}

pub(crate) async fn insights(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<InsightsBody>,
) -> ApiResult<Vec<Insight>> {
    if body.insight_types.is_empty() {
        return Err(ApiError::BadRequest("insight_types must not be empty".to_string()));
    }
    let insights = state
        .assistant()?
        .generate_insights(
            &caller.ctx,
            caller.user_id,
            &body.portfolio,
            &body.trade_history,
            &body.insight_types,
        )
        .await?;
    Ok(Json(insights))
}

pub(crate) async fn recommend_trade(
    State(state): State<AppState>,
    caller: Caller,
    Json(data): Json<TradeRecommendationData>,
) -> ApiResult<GuardrailsResult> {
    let result = state
        .assistant()?
        .recommend_trade(&caller.ctx, caller.user_id, data)
        .await?;
    Ok(Json(result))
}

pub(crate) async fn analyze_market(
    State(state): State<AppState>,
    caller: Caller,
    Json(data): Json<MarketAnalysisData>,
) -> ApiResult<Value> {
    let analysis = state
        .assistant()?
        .analyze_market(&caller.ctx, caller.user_id, data)
        .await?;
    Ok(Json(json!({ "analysis": analysis })))
}

pub(crate) async fn optimize_portfolio(
    State(state): State<AppState>,
    caller: Caller,
    Json(data): Json<PortfolioOptimizationData>,
) -> ApiResult<Value> {
    let optimization = state
        .assistant()?
        .optimize_portfolio(&caller.ctx, caller.user_id, data)
        .await?;
    Ok(Json(json!({ "optimization": optimization })))
}

#[derive(Deserialize)]
pub(crate) struct IndexBody {
    conversation_id: String,
    message_id: String,
    content: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Callers may only index into their own conversations.
pub(crate) async fn index_message(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<IndexBody>,
) -> Result<StatusCode, ApiError> {
    if !body.conversation_id.starts_with(&owned_prefix(caller.user_id)) {
        return Err(ApiError::BadRequest(format!(
            "conversation_id must start with {}",
            owned_prefix(caller.user_id)
        )));
    }
    state
        .assistant()?
        .index_message(
            &caller.ctx,
            IndexRequest {
                conversation_id: body.conversation_id,
                message_id: body.message_id,
                content: body.content,
                metadata: body.metadata,
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(crate) struct SearchBody {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

/// Results are restricted to the caller's conversations.
pub(crate) async fn search_similar(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<SearchBody>,
) -> ApiResult<Vec<SimilarEmbedding>> {
    let limit = body.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);
    let hits = state
        .assistant()?
        .search_user_similar(&caller.ctx, caller.user_id, &body.query, limit)
        .await?;
    Ok(Json(hits))
}

pub(crate) async fn guardrails(
    State(state): State<AppState>,
    caller: Caller,
    Json(recommendation): Json<TradeRecommendation>,
) -> ApiResult<GuardrailsResult> {
    let result = state
        .assistant()?
        .apply_guardrails(&caller.ctx, caller.user_id, &recommendation)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub(crate) struct ConfirmationBody {
    trade: TradeRequest,
    recommendation: TradeRecommendation,
}

pub(crate) async fn create_confirmation(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<ConfirmationBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let created = state
        .assistant()?
        .create_trade_confirmation(&caller.ctx, caller.user_id, body.trade, body.recommendation)
        .await?;
    Ok(match created {
        Some(confirmation) => (
            StatusCode::CREATED,
            Json(json!({ "required": true, "confirmation": confirmation })),
        ),
        None => (StatusCode::OK, Json(json!({ "required": false }))),
    })
}

pub(crate) async fn pending_confirmations(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Vec<TradeConfirmation>> {
    let pending = state
        .assistant()?
        .pending_confirmations(&caller.ctx, caller.user_id)
        .await?;
    Ok(Json(pending))
}

#[derive(Deserialize)]
pub(crate) struct DecisionBody {
    approve: bool,
}

pub(crate) async fn confirm_trade(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<ConfirmationOutcome> {
    let outcome = state
        .assistant()?
        .confirm_trade(&caller.ctx, caller.user_id, &id, body.approve)
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub(crate) struct SessionsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

pub(crate) async fn list_sessions(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<SessionsQuery>,
) -> ApiResult<Vec<ConversationMemory>> {
    let sessions = state
        .assistant()?
        .sessions(&caller.ctx, caller.user_id, q.limit.unwrap_or(DEFAULT_SESSION_LIMIT))
        .await?;
    Ok(Json(sessions))
}

pub(crate) async fn get_conversation(
    State(state): State<AppState>,
    caller: Caller,
    Path(session_id): Path<String>,
) -> ApiResult<ConversationMemory> {
    let memory = state
        .assistant()?
        .conversation(&caller.ctx, caller.user_id, &session_id)
        .await?;
    Ok(Json(memory))
}

pub(crate) async fn delete_conversation(
    State(state): State<AppState>,
    caller: Caller,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .assistant()?
        .delete_conversation(&caller.ctx, caller.user_id, &session_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
pub(crate) struct AuditQuery {
    #[serde(rename = "type")]
    event_type: Option<String>,
    severity: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    request_id: Option<String>,
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

impl AuditQuery {
    /// The filter is always pinned to the caller.
    fn into_filter(self, user_id: i64) -> Result<AuditFilter, ApiError> {
        Ok(AuditFilter {
            user_id: Some(user_id),
            event_type: self
                .event_type
                .map(|t| t.parse())
                .transpose()
                .map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string()))?,
            severity: self
                .severity
                .map(|s| s.parse())
                .transpose()
                .map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string()))?,
            start: self.start,
            end: self.end,
            request_id: self.request_id,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

pub(crate) async fn audit_events(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<AuditQuery>,
) -> ApiResult<Vec<AuditEvent>> {
    let filter = q.into_filter(caller.user_id)?;
    let events = state.assistant()?.audit_log().events(&caller.ctx, &filter).await?;
    Ok(Json(events))
}
