use super::{actions, AssistantDeps, ChatReply, HIGH_RISK_FUNCTIONS};
use crate::context::RequestContext;
use crate::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};
use crate::domain::conversation::{conversation_id, ConversationMemory, Message, Role};
use crate::domain::insight::{Insight, InsightType};
use crate::domain::risk::GuardrailsResult;
use crate::embeddings::{IndexRequest, SimilarEmbedding};
use crate::error::{AssistantError, Result, ResultExt};
use crate::functions::{parse_function_call, FunctionDefinition};
use crate::llm::json::{parse_insights, parse_trade_recommendation};
use crate::prompt::templates::{
    ChatData, HistoryLine, InsightsData, MarketAnalysisData, PortfolioOptimizationData, TradeRecommendationData,
    BUILTIN_VERSION, CHAT_RESPONSE, INSIGHTS, MARKET_ANALYSIS, PORTFOLIO_OPTIMIZATION, TRADE_RECOMMENDATION,
};
use crate::security::SecurityGate;
use serde_json::{json, Map, Value};

/// Drives one user turn through sanitizing, prompting, the model, output
/// validation, memory and audit.
pub struct AiOrchestrator {
    pub(super) deps: AssistantDeps,
}

impl AiOrchestrator {
    pub fn new(deps: AssistantDeps) -> Self {
        Self { deps }
    }

    pub fn security(&self) -> &SecurityGate {
        &self.deps.security
    }

    pub fn audit_log(&self) -> &crate::audit::AuditService {
        &self.deps.audit
    }

    pub fn function_definitions(&self) -> Vec<FunctionDefinition> {
        self.deps.functions.definitions()
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) async fn audit(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        event_type: AuditEventType,
        severity: AuditSeverity,
        action: &str,
        description: &str,
        metadata: Value,
    ) {
        let event = AuditEvent::new(event_type, severity, action, description)
            .user(user_id)
            .metadata(metadata);
        self.deps.audit.record(ctx, event).await;
    }

    /// Calls the model under the per-call deadline and validates its reply.
    async fn ask_model(&self, ctx: &RequestContext, prompt: &str) -> Result<(String, bool)> {
        let model_ctx = ctx.clone().with_timeout(self.deps.options.model_timeout);
        let raw = model_ctx
            .run(self.deps.model.generate_content(&model_ctx, prompt))
            .await?;
        let validated = self.deps.security.validate_output(ctx, &raw).await;
        if let Some(err) = &validated.policy_error {
            tracing::warn!(error = %err, "model reply failed validation, returning sanitized form");
        }
        let sanitized = validated.was_sanitized(&raw);
        Ok((validated.content, sanitized))
    }

    /// Stateless single turn: no memory, no recall.
    pub async fn generate_response(&self, ctx: &RequestContext, user_id: i64, message: &str) -> Result<String> {
        self.audit(
            ctx,
            user_id,
            AuditEventType::Ai,
            AuditSeverity::Info,
            actions::GENERATE_RESPONSE,
            "AI response generation requested",
            json!({ "message_length": message.len() }),
        )
        .await;

        let sanitized = self.deps.security.sanitize_input(ctx, message).await;
        let prompt = self.deps.templates.render(
            CHAT_RESPONSE,
            BUILTIN_VERSION,
            &ChatData {
                user_query: sanitized,
                ..Default::default()
            },
        )?;
        let (reply, was_sanitized) = self.ask_model(ctx, &prompt).await?;

        self.audit(
            ctx,
            user_id,
            AuditEventType::Ai,
            AuditSeverity::Info,
            actions::RESPONSE_GENERATED,
            "AI response generated",
            json!({ "response_length": reply.len(), "sanitized": was_sanitized }),
        )
        .await;
        Ok(reply)
    }

    /// Full conversational turn. A missing session id starts a new session.
    pub async fn chat(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<ChatReply> {
        let session_id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.audit(
            ctx,
            user_id,
            AuditEventType::Ai,
            AuditSeverity::Info,
            actions::GENERATE_RESPONSE,
            "AI chat turn requested",
            json!({ "session_id": session_id, "message_length": message.len() }),
        )
        .await;

        let sanitized = self.deps.security.sanitize_input(ctx, message).await;
        if sanitized.trim().is_empty() {
            return Err(AssistantError::invalid("message must not be empty"));
        }

        let memory = self.deps.memory.retrieve(ctx, user_id, &session_id).await?;
        let history: Vec<HistoryLine> = memory
            .as_ref()
            .map(|m| {
                let skip = m.messages.len().saturating_sub(self.deps.options.history_window);
                m.messages[skip..].iter().map(HistoryLine::from).collect()
            })
            .unwrap_or_default();
        let related = self.related_messages(ctx, user_id, &sanitized, &history).await;

        let prompt = self.deps.templates.render(
            CHAT_RESPONSE,
            BUILTIN_VERSION,
            &ChatData {
                user_query: sanitized.clone(),
                summary: memory.as_ref().and_then(|m| m.summary.clone()),
                history,
                related,
            },
        )?;
        let (reply, was_sanitized) = self.ask_model(ctx, &prompt).await?;

        // Nothing is persisted for a turn cancelled before this point.
        ctx.ensure_active()?;
        let now = self.deps.clock.now();
        let user_message = Message::new(Role::User, sanitized, now)
            .with_metadata("message_id", json!(uuid::Uuid::new_v4().to_string()));
        let assistant_message = Message::new(Role::Assistant, reply.clone(), now)
            .with_metadata("message_id", json!(uuid::Uuid::new_v4().to_string()));
        let stored = self
            .deps
            .memory
            .append(
                ctx,
                user_id,
                &session_id,
                vec![user_message.clone(), assistant_message.clone()],
            )
            .await?;

        if stored.messages.len() > self.deps.options.summary_threshold {
            self.deps
                .memory
                .compact(ctx, user_id, &session_id, self.deps.options.keep_after_summary)
                .await?;
            tracing::info!(user_id, session_id = %session_id, "conversation compacted into summary");
        }

        self.index_turn(ctx, &stored, &[user_message, assistant_message]).await;

        self.audit(
            ctx,
            user_id,
            AuditEventType::Ai,
            AuditSeverity::Info,
            actions::RESPONSE_GENERATED,
            "AI chat reply generated",
            json!({
                "session_id": session_id,
                "response_length": reply.len(),
                "sanitized": was_sanitized,
            }),
        )
        .await;

        Ok(ChatReply {
            session_id,
            reply,
            sanitized: was_sanitized,
        })
    }

    /// Earlier messages of this user that resemble `query`. Recall failures
    /// only degrade the prompt.
    async fn related_messages(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        query: &str,
        history: &[HistoryLine],
    ) -> Vec<String> {
        let Some(similarity) = &self.deps.similarity else {
            return Vec::new();
        };
        let limit = self.deps.options.related_limit;
        if limit == 0 {
            return Vec::new();
        }
        let scope = user_scope(user_id);
        match similarity.search_scoped(ctx, query, &scope, limit + history.len()).await {
            Ok(found) => found
                .into_iter()
                .filter(|e| !history.iter().any(|h| h.content == e.content))
                .take(limit)
                .map(|e| e.content)
                .collect(),
            Err(err) => {
                tracing::warn!(user_id, error = %err, "semantic recall failed");
                Vec::new()
            }
        }
    }

    async fn index_turn(&self, ctx: &RequestContext, memory: &ConversationMemory, messages: &[Message]) {
        let Some(similarity) = &self.deps.similarity else {
            return;
        };
        let conversation = memory.conversation_id();
        let requests = IndexRequest::for_messages(memory, messages);
        if let Err(err) = similarity.index_batch(ctx, requests).await {
            tracing::warn!(conversation_id = %conversation, error = %err, "failed to index chat turn");
        }
    }

    pub async fn execute_function(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<Value> {
        self.audit(
            ctx,
            user_id,
            AuditEventType::Ai,
            AuditSeverity::Info,
            actions::EXECUTE_FUNCTION,
            "Function execution requested",
            json!({ "function": name }),
        )
        .await;

        if name.trim().is_empty() {
            return Err(AssistantError::invalid("function name is required"));
        }
        if HIGH_RISK_FUNCTIONS.contains(&name) {
            tracing::warn!(user_id, function = %name, "high-risk function requested");
            self.audit(
                ctx,
                user_id,
                AuditEventType::Security,
                AuditSeverity::Warning,
                actions::HIGH_RISK_FUNCTION,
                "High-risk function invoked",
                json!({ "function": name }),
            )
            .await;
        }

        let call_ctx = ctx.clone().with_user(user_id);
        match self.deps.functions.call(&call_ctx, name, params).await {
            Ok(result) => {
                self.audit(
                    ctx,
                    user_id,
                    AuditEventType::Ai,
                    AuditSeverity::Info,
                    actions::FUNCTION_EXECUTED,
                    "Function executed",
                    json!({ "function": name }),
                )
                .await;
                Ok(result)
            }
            Err(err) => {
                self.audit(
                    ctx,
                    user_id,
                    AuditEventType::Ai,
                    AuditSeverity::Error,
                    actions::FUNCTION_FAILED,
                    "Function execution failed",
                    json!({ "function": name, "error": err.to_string() }),
                )
                .await;
                Err(err)
            }
        }
    }

    /// Dispatches a model-produced `{"name", "arguments"}` call.
    pub async fn handle_function_call(&self, ctx: &RequestContext, user_id: i64, call_json: &str) -> Result<Value> {
        let call = parse_function_call(call_json)?;
        self.execute_function(ctx, user_id, &call.name, call.arguments).await
    }

    /// Asks for two insights per requested type.
    pub async fn generate_insights(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        portfolio: &Value,
        trade_history: &Value,
        insight_types: &[InsightType],
    ) -> Result<Vec<Insight>> {
        self.audit(
            ctx,
            user_id,
            AuditEventType::Ai,
            AuditSeverity::Info,
            actions::GENERATE_INSIGHTS,
            "Insight generation requested",
            json!({ "insight_types": insight_types }),
        )
        .await;

        let data = InsightsData {
            portfolio_json: serde_json::to_string_pretty(portfolio).external("serialize portfolio")?,
            trade_history_json: serde_json::to_string_pretty(trade_history).external("serialize trade history")?,
            insight_types: insight_types.iter().map(|t| t.as_str().to_string()).collect(),
            count: insight_types.len() * 2,
        };
        let prompt = self.deps.templates.render(INSIGHTS, BUILTIN_VERSION, &data)?;

        let model_ctx = ctx.clone().with_timeout(self.deps.options.model_timeout);
        let raw = model_ctx
            .run(self.deps.model.generate_content(&model_ctx, &prompt))
            .await?;
        let mut insights = parse_insights(&raw, self.deps.clock.now()).external("parse insights reply")?;

        let gate = &self.deps.security;
        for insight in &mut insights {
            insight.title = gate.sanitize(&insight.title);
            insight.description = gate.sanitize(&insight.description);
            insight.recommendation = insight.recommendation.as_deref().map(|r| gate.sanitize(r));
            for metric in &mut insight.metrics {
                metric.name = gate.sanitize(&metric.name);
                metric.value = gate.sanitize(&metric.value);
            }
        }

        self.audit(
            ctx,
            user_id,
            AuditEventType::Ai,
            AuditSeverity::Info,
            actions::INSIGHTS_GENERATED,
            "Insights generated",
            json!({ "count": insights.len() }),
        )
        .await;
        Ok(insights)
    }

    /// Model recommendation for one asset, passed through the guardrails
    /// against the user's portfolio value.
    pub async fn recommend_trade(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        data: TradeRecommendationData,
    ) -> Result<GuardrailsResult> {
        self.audit(
            ctx,
            user_id,
            AuditEventType::Ai,
            AuditSeverity::Info,
            actions::TRADE_RECOMMENDATION,
            "Trade recommendation requested",
            json!({ "target_asset": data.target_asset }),
        )
        .await;

        let data = TradeRecommendationData {
            user_query: self.deps.security.sanitize_input(ctx, &data.user_query).await,
            ..data
        };
        let prompt = self.deps.templates.render(TRADE_RECOMMENDATION, BUILTIN_VERSION, &data)?;
        let model_ctx = ctx.clone().with_timeout(self.deps.options.model_timeout);
        let raw = model_ctx
            .run(self.deps.model.generate_content(&model_ctx, &prompt))
            .await?;
        let recommendation = parse_trade_recommendation(&raw).external("parse trade recommendation reply")?;

        self.apply_guardrails(ctx, user_id, &recommendation).await
    }

    pub async fn analyze_market(&self, ctx: &RequestContext, user_id: i64, data: MarketAnalysisData) -> Result<String> {
        let data = MarketAnalysisData {
            user_query: self.deps.security.sanitize_input(ctx, &data.user_query).await,
            ..data
        };
        let prompt = self.deps.templates.render(MARKET_ANALYSIS, BUILTIN_VERSION, &data)?;
        let (reply, was_sanitized) = self.ask_model(ctx, &prompt).await?;
        self.audit(
            ctx,
            user_id,
            AuditEventType::Ai,
            AuditSeverity::Info,
            actions::RESPONSE_GENERATED,
            "Market analysis generated",
            json!({ "template": MARKET_ANALYSIS, "response_length": reply.len(), "sanitized": was_sanitized }),
        )
        .await;
        Ok(reply)
    }

    pub async fn optimize_portfolio(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        data: PortfolioOptimizationData,
    ) -> Result<String> {
        let data = PortfolioOptimizationData {
            user_query: self.deps.security.sanitize_input(ctx, &data.user_query).await,
            ..data
        };
        let prompt = self.deps.templates.render(PORTFOLIO_OPTIMIZATION, BUILTIN_VERSION, &data)?;
        let (reply, was_sanitized) = self.ask_model(ctx, &prompt).await?;
        self.audit(
            ctx,
            user_id,
            AuditEventType::Ai,
            AuditSeverity::Info,
            actions::RESPONSE_GENERATED,
            "Portfolio optimization generated",
            json!({ "template": PORTFOLIO_OPTIMIZATION, "response_length": reply.len(), "sanitized": was_sanitized }),
        )
        .await;
        Ok(reply)
    }

    pub async fn conversation(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
    ) -> Result<ConversationMemory> {
        self.deps
            .memory
            .retrieve(ctx, user_id, session_id)
            .await?
            .ok_or_else(|| AssistantError::not_found(format!("conversation not found: {session_id}")))
    }

    pub async fn sessions(&self, ctx: &RequestContext, user_id: i64, limit: usize) -> Result<Vec<ConversationMemory>> {
        self.deps.memory.list_user_sessions(ctx, user_id, limit).await
    }

    /// Drops the message log and its embeddings. Idempotent.
    pub async fn delete_conversation(&self, ctx: &RequestContext, user_id: i64, session_id: &str) -> Result<()> {
        self.deps.memory.delete_session(ctx, user_id, session_id).await?;
        if let Some(similarity) = &self.deps.similarity {
            let removed = similarity
                .store()
                .delete_embeddings_by_conversation(ctx, &conversation_id(user_id, session_id))
                .await?;
            tracing::info!(user_id, session_id = %session_id, removed, "conversation deleted");
        }
        Ok(())
    }

    pub async fn index_message(&self, ctx: &RequestContext, request: IndexRequest) -> Result<()> {
        self.similarity()?.index(ctx, request).await
    }

    pub async fn search_similar(&self, ctx: &RequestContext, query: &str, limit: usize) -> Result<Vec<SimilarEmbedding>> {
        self.similarity()?.search(ctx, query, limit).await
    }

    /// Semantic search restricted to one user's conversations.
    pub async fn search_user_similar(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SimilarEmbedding>> {
        self.similarity()?
            .search_scoped(ctx, query, &user_scope(user_id), limit)
            .await
    }

    fn similarity(&self) -> Result<&crate::embeddings::SimilarityService> {
        self.deps
            .similarity
            .as_ref()
            .ok_or_else(|| AssistantError::invalid("semantic memory is not configured"))
    }
}

/// Prefix shared by every conversation id of `user_id`.
fn user_scope(user_id: i64) -> String {
    conversation_id(user_id, "")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::{PaperTradeExecutor, StaticMarketData, StaticPortfolio, StaticRiskPolicy};
    use crate::assistant::AssistantOptions;
    use crate::audit::{AuditService, InMemoryAuditRepository};
    use crate::config::RiskPolicySettings;
    use crate::context::ManualClock;
    use crate::domain::trade::{RecommendationAction, RiskLevel};
    use crate::embeddings::{InMemoryVectorStore, SimilarityService};
    use crate::error::ErrorKind;
    use crate::functions::trading::{register_standard_functions, TradingPorts};
    use crate::functions::FunctionRegistry;
    use crate::memory::InMemoryConversationRepository;
    use crate::prompt::TemplateRegistry;
    use crate::risk::{ConfirmationFlow, InMemoryConfirmationRepository, RiskAssessor, RiskGuardrails};
    use crate::security::{ContentValidator, SecurityOptions};
    use crate::testing::{t0, KeywordEmbedder, ScriptedModel};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    pub(crate) struct Harness {
        pub orchestrator: AiOrchestrator,
        pub model: Arc<ScriptedModel>,
        pub audit: Arc<InMemoryAuditRepository>,
        pub clock: Arc<ManualClock>,
    }

    pub(crate) fn harness_with(model: ScriptedModel, risk: RiskPolicySettings, options: AssistantOptions) -> Harness {
        let clock = Arc::new(ManualClock::new(t0()));
        let model = Arc::new(model);
        let audit_repo = Arc::new(InMemoryAuditRepository::new());
        let audit = AuditService::new(audit_repo.clone(), clock.clone());
        let market = Arc::new(StaticMarketData::new(clock.clone()));
        let portfolio = Arc::new(StaticPortfolio::new(clock.clone()));
        let risk = Arc::new(StaticRiskPolicy::new(risk));

        let functions = FunctionRegistry::default();
        register_standard_functions(
            &functions,
            TradingPorts {
                market: market.clone(),
                portfolio: portfolio.clone(),
                risk: risk.clone(),
                clock: clock.clone(),
            },
        )
        .unwrap();

        let deps = AssistantDeps {
            model: model.clone(),
            security: SecurityGate::new(SecurityOptions::default(), ContentValidator::with_default_rules().unwrap())
                .unwrap()
                .with_audit(audit.clone()),
            templates: TemplateRegistry::with_builtins().unwrap(),
            functions,
            memory: Arc::new(InMemoryConversationRepository::new(clock.clone())),
            similarity: Some(SimilarityService::new(
                Arc::new(KeywordEmbedder::new(&["cat", "dog", "btc"])),
                Arc::new(InMemoryVectorStore::new(clock.clone())),
            )),
            guardrails: RiskGuardrails::new(risk.clone(), clock.clone()),
            assessor: RiskAssessor::new(risk),
            confirmations: ConfirmationFlow::new(Arc::new(InMemoryConfirmationRepository::new()), clock.clone()),
            portfolio,
            executor: Some(Arc::new(PaperTradeExecutor::new(market, clock.clone()))),
            audit,
            clock: clock.clone(),
            options,
        };
        Harness {
            orchestrator: AiOrchestrator::new(deps),
            model,
            audit: audit_repo,
            clock,
        }
    }

    pub(crate) fn harness(model: ScriptedModel) -> Harness {
        harness_with(model, RiskPolicySettings::default(), AssistantOptions::default())
    }

    fn actions_logged(h: &Harness) -> Vec<String> {
        h.audit.snapshot().into_iter().map(|e| e.action).collect()
    }

    #[tokio::test]
    async fn generate_response_sanitizes_input_and_audits() {
        let h = harness(ScriptedModel::replying(&["Markets are calm today."]));
        let ctx = RequestContext::background();
        let reply = h
            .orchestrator
            .generate_response(&ctx, 7, "How is the market?<script>alert(1)</script>")
            .await
            .unwrap();
        assert_eq!(reply, "Markets are calm today.");

        let prompt = &h.model.prompts()[0];
        assert!(prompt.contains("How is the market?"));
        assert!(!prompt.contains("<script>"));

        let logged = actions_logged(&h);
        assert!(logged.contains(&actions::GENERATE_RESPONSE.to_string()));
        assert!(logged.contains(&"INPUT_SANITIZED".to_string()));
        let done = h
            .audit
            .snapshot()
            .into_iter()
            .find(|e| e.action == actions::RESPONSE_GENERATED)
            .unwrap();
        assert_eq!(done.metadata["sanitized"], json!(false));
        assert_eq!(done.metadata["response_length"], json!(reply.len()));
    }

    #[tokio::test]
    async fn trading_reply_gets_disclaimer() {
        let h = harness(ScriptedModel::replying(&["You could buy some ETH."]));
        let reply = h
            .orchestrator
            .generate_response(&RequestContext::background(), 1, "What should I do?")
            .await
            .unwrap();
        assert!(reply.starts_with("You could buy some ETH."));
        assert!(reply.contains("not financial advice"));
    }

    #[tokio::test]
    async fn chat_persists_turn_and_recalls_history() {
        let h = harness(ScriptedModel::replying(&["Cats are great.", "Still about cats."]));
        let ctx = RequestContext::background();

        let first = h.orchestrator.chat(&ctx, 3, "Tell me about my cat", None).await.unwrap();
        assert_eq!(first.reply, "Cats are great.");

        h.clock.advance(chrono::Duration::minutes(1));
        let second = h
            .orchestrator
            .chat(&ctx, 3, "More on the cat please", Some(&first.session_id))
            .await
            .unwrap();
        assert_eq!(second.session_id, first.session_id);

        let memory = h.orchestrator.conversation(&ctx, 3, &first.session_id).await.unwrap();
        assert_eq!(memory.messages.len(), 4);
        assert_eq!(memory.messages[0].role, Role::User);
        assert_eq!(memory.messages[3].content, "Still about cats.");

        let prompt = &h.model.prompts()[1];
        assert!(prompt.contains("user: Tell me about my cat"));
        assert!(prompt.contains("assistant: Cats are great."));
    }

    #[tokio::test]
    async fn chat_recalls_related_messages_from_other_sessions_of_same_user() {
        let h = harness(ScriptedModel::replying(&["noted", "noted", "noted"]));
        let ctx = RequestContext::background();
        h.orchestrator.chat(&ctx, 5, "my dog is sick", Some("a")).await.unwrap();
        h.orchestrator.chat(&ctx, 6, "their dog barks", Some("b")).await.unwrap();

        h.orchestrator.chat(&ctx, 5, "what about the dog", Some("c")).await.unwrap();
        let prompt = &h.model.prompts()[2];
        assert!(prompt.contains("RELATED EARLIER MESSAGES"));
        assert!(prompt.contains("my dog is sick"));
        assert!(!prompt.contains("their dog barks"));
    }

    #[tokio::test]
    async fn related_recall_is_not_crowded_out_by_other_users() {
        let h = harness(ScriptedModel::replying(&["noted", "noted"]));
        let ctx = RequestContext::background();
        for i in 0..12 {
            h.orchestrator
                .index_message(
                    &ctx,
                    IndexRequest {
                        conversation_id: format!("6:s{i}"),
                        message_id: "m".to_string(),
                        content: format!("dog {i}"),
                        metadata: Map::new(),
                    },
                )
                .await
                .unwrap();
        }
        h.orchestrator.chat(&ctx, 5, "my dog is sick", Some("a")).await.unwrap();

        h.orchestrator.chat(&ctx, 5, "what about the dog", Some("c")).await.unwrap();
        let prompt = &h.model.prompts()[1];
        assert!(prompt.contains("my dog is sick"));
        assert!(!prompt.contains("dog 0"));

        let hits = h.orchestrator.search_user_similar(&ctx, 5, "dog", 3).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|hit| hit.conversation_id.starts_with("5:")));
    }

    #[tokio::test]
    async fn overlapping_turns_on_one_session_all_persist() {
        let h = harness(ScriptedModel::replying(&["one", "two", "three", "four"]));
        let ctx = RequestContext::background();
        h.clock.set(t0() + chrono::Duration::minutes(5));
        h.orchestrator.chat(&ctx, 8, "hello", Some("s")).await.unwrap();

        // Stamped before the previous turn was stored.
        h.clock.set(t0());
        h.orchestrator.chat(&ctx, 8, "again", Some("s")).await.unwrap();
        let (a, b) = tokio::join!(
            h.orchestrator.chat(&ctx, 8, "x", Some("s")),
            h.orchestrator.chat(&ctx, 8, "y", Some("s")),
        );
        a.unwrap();
        b.unwrap();

        let memory = h.orchestrator.conversation(&ctx, 8, "s").await.unwrap();
        assert_eq!(memory.messages.len(), 8);
        assert!(crate::domain::conversation::is_time_ordered(&memory.messages));
        assert_eq!(memory.messages[2].content, "again");
        assert_eq!(memory.messages[2].timestamp, t0() + chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn chat_rejects_message_that_sanitizes_to_nothing() {
        let h = harness(ScriptedModel::replying(&[]));
        let err = h
            .orchestrator
            .chat(&RequestContext::background(), 1, "<script>x</script>", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(h.model.prompts().is_empty());
    }

    #[tokio::test]
    async fn model_failure_leaves_memory_untouched() {
        let model = ScriptedModel::replying(&[]);
        model.push_error("provider down");
        let h = harness(model);
        let ctx = RequestContext::background();
        let err = h.orchestrator.chat(&ctx, 1, "hello", Some("s")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
        assert_eq!(
            h.orchestrator.conversation(&ctx, 1, "s").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn cancelled_turn_persists_nothing() {
        let h = harness(ScriptedModel::replying(&[]));
        let (ctx, cancel) = RequestContext::new(None);
        cancel.cancel();
        let err = h.orchestrator.chat(&ctx, 1, "hello", Some("s")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        let sessions = h.orchestrator.sessions(&RequestContext::background(), 1, 10).await.unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn long_sessions_are_folded_into_summary() {
        let options = AssistantOptions {
            summary_threshold: 4,
            keep_after_summary: 2,
            ..AssistantOptions::default()
        };
        let h = harness_with(ScriptedModel::replying(&[]), RiskPolicySettings::default(), options);
        let ctx = RequestContext::background();
        for i in 0..3 {
            h.orchestrator.chat(&ctx, 2, &format!("question {i}"), Some("s")).await.unwrap();
            h.clock.advance(chrono::Duration::seconds(1));
        }
        let memory = h.orchestrator.conversation(&ctx, 2, "s").await.unwrap();
        assert!(memory.messages.len() <= 4);
        let summary = memory.summary.unwrap();
        assert!(summary.contains("user: question 0"));
    }

    #[tokio::test]
    async fn delete_conversation_removes_embeddings() {
        let h = harness(ScriptedModel::replying(&["ok"]));
        let ctx = RequestContext::background();
        h.orchestrator.chat(&ctx, 4, "cat facts", Some("s")).await.unwrap();
        assert!(!h.orchestrator.search_similar(&ctx, "cat", 5).await.unwrap().is_empty());

        h.orchestrator.delete_conversation(&ctx, 4, "s").await.unwrap();
        h.orchestrator.delete_conversation(&ctx, 4, "s").await.unwrap();
        assert!(h.orchestrator.search_similar(&ctx, "cat", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn high_risk_function_is_flagged_and_not_executed() {
        let h = harness(ScriptedModel::replying(&[]));
        let ctx = RequestContext::background();
        let mut params = Map::new();
        params.insert("symbol".into(), json!("btc"));
        params.insert("action".into(), json!("buy"));
        params.insert("amount".into(), json!(0.1));
        params.insert("price_type".into(), json!("market"));

        let result = h
            .orchestrator
            .execute_function(&ctx, 9, "execute_trade", params)
            .await
            .unwrap();
        assert_eq!(result["success"], json!(false));

        let events = h.audit.snapshot();
        let flagged = events
            .iter()
            .find(|e| e.action == actions::HIGH_RISK_FUNCTION)
            .unwrap();
        assert_eq!(flagged.event_type, AuditEventType::Security);
        assert_eq!(flagged.severity, AuditSeverity::Warning);
        assert!(events.iter().any(|e| e.action == actions::FUNCTION_EXECUTED));
    }

    #[tokio::test]
    async fn function_errors_are_audited_and_surfaced() {
        let h = harness(ScriptedModel::replying(&[]));
        let ctx = RequestContext::background();
        let err = h
            .orchestrator
            .execute_function(&ctx, 1, "get_market_data", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing required parameter: symbol");
        assert!(actions_logged(&h).contains(&actions::FUNCTION_FAILED.to_string()));

        let err = h
            .orchestrator
            .execute_function(&ctx, 1, " ", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn function_call_json_is_dispatched_with_user_context() {
        let h = harness(ScriptedModel::replying(&[]));
        let result = h
            .orchestrator
            .handle_function_call(
                &RequestContext::background(),
                12,
                r#"{"name":"get_portfolio_summary","arguments":"{}"}"#,
            )
            .await
            .unwrap();
        assert_eq!(result["total_value"], json!(100_000.0));
    }

    #[tokio::test]
    async fn insights_are_parsed_sanitized_and_stamped() {
        let reply = r#"```json
[
  {"title": "Heavy <span>BTC</span> weighting", "description": "Half the book is BTC", "type": "portfolio",
   "importance": "high", "metrics": [{"name": "btc_share", "value": 50}], "recommendation": "Trim BTC"},
  {"title": "ETH momentum", "description": "Rising volume", "type": "market", "importance": "low"}
]
```"#;
        let h = harness(ScriptedModel::replying(&[reply]));
        let insights = h
            .orchestrator
            .generate_insights(
                &RequestContext::background(),
                1,
                &json!({"total_value": 100000}),
                &json!([]),
                &[InsightType::Portfolio, InsightType::Market],
            )
            .await
            .unwrap();
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].title, "Heavy BTC weighting");
        assert_eq!(insights[0].metrics[0].value, "50");
        assert_eq!(insights[0].timestamp, t0());
        assert_ne!(insights[0].id, insights[1].id);
        let prompt = &h.model.prompts()[0];
        assert!(prompt.contains("Generate 4 insights"));
        assert!(prompt.contains("insight types: portfolio, market."));
        assert!(actions_logged(&h).contains(&actions::INSIGHTS_GENERATED.to_string()));
    }

    #[tokio::test]
    async fn recommend_trade_clamps_position_size() {
        let reply = r#"{"recommendation":"BUY","confidence":0.8,"reasoning":"BTC breakout","risk_level":"MEDIUM",
            "suggested_position_size":10,"suggested_stop_loss":3,"technical_indicators":{}}"#;
        let h = harness(ScriptedModel::replying(&[reply]));
        let result = h
            .orchestrator
            .recommend_trade(
                &RequestContext::background(),
                1,
                TradeRecommendationData {
                    target_asset: "BTC".into(),
                    risk_profile: "moderate".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.original.suggested_position_size, 10.0);
        assert_eq!(result.modified.suggested_position_size, 2.0);
        assert_eq!(result.modified.recommendation, RecommendationAction::Buy);
        assert_eq!(result.modified.risk_level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn unparseable_recommendation_is_external_failure() {
        let h = harness(ScriptedModel::replying(&["I think you should buy."]));
        let err = h
            .orchestrator
            .recommend_trade(
                &RequestContext::background(),
                1,
                TradeRecommendationData {
                    target_asset: "ETH".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
    }

    #[tokio::test]
    async fn similarity_passthrough_requires_configuration() {
        let mut h = harness(ScriptedModel::replying(&[]));
        h.orchestrator.deps.similarity = None;
        let err = h
            .orchestrator
            .search_similar(&RequestContext::background(), "cat", 3)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "semantic memory is not configured");
    }
}
