//! Top-level request pipeline driving validation, prompting, memory and risk.

mod bootstrap;
mod orchestrator;
mod trade_flow;

pub use bootstrap::{build_orchestrator, build_with_model};
pub use orchestrator::AiOrchestrator;
pub use trade_flow::ConfirmationOutcome;

use crate::audit::AuditService;
use crate::context::Clock;
use crate::embeddings::SimilarityService;
use crate::functions::FunctionRegistry;
use crate::llm::ModelProvider;
use crate::memory::ConversationMemoryRepository;
use crate::ports::{PortfolioService, TradeExecutor};
use crate::prompt::TemplateRegistry;
use crate::risk::{ConfirmationFlow, RiskAssessor, RiskGuardrails};
use crate::security::SecurityGate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Functions that get an extra security audit entry when invoked.
pub const HIGH_RISK_FUNCTIONS: [&str; 3] = ["execute_trade", "update_settings", "delete_data"];

pub mod actions {
    pub const GENERATE_RESPONSE: &str = "GENERATE_RESPONSE";
    pub const RESPONSE_GENERATED: &str = "RESPONSE_GENERATED";
    pub const EXECUTE_FUNCTION: &str = "EXECUTE_FUNCTION";
    pub const HIGH_RISK_FUNCTION: &str = "HIGH_RISK_FUNCTION";
    pub const FUNCTION_EXECUTED: &str = "FUNCTION_EXECUTED";
    pub const FUNCTION_FAILED: &str = "FUNCTION_FAILED";
    pub const GENERATE_INSIGHTS: &str = "GENERATE_INSIGHTS";
    pub const INSIGHTS_GENERATED: &str = "INSIGHTS_GENERATED";
    pub const TRADE_RECOMMENDATION: &str = "TRADE_RECOMMENDATION";
    pub const GUARDRAILS_APPLIED: &str = "GUARDRAILS_APPLIED";
    pub const CONFIRMATION_CREATED: &str = "TRADE_CONFIRMATION_CREATED";
    pub const TRADE_APPROVED: &str = "TRADE_APPROVED";
    pub const TRADE_REJECTED: &str = "TRADE_REJECTED";
    pub const TRADE_BLOCKED: &str = "TRADE_BLOCKED";
    pub const TRADE_EXECUTED: &str = "TRADE_EXECUTED";
}

#[derive(Debug, Clone)]
pub struct AssistantOptions {
    /// Recent messages included verbatim in the chat prompt.
    pub history_window: usize,
    /// Semantically related earlier messages included in the chat prompt.
    pub related_limit: usize,
    /// Sessions longer than this are folded into a summary.
    pub summary_threshold: usize,
    /// Messages kept verbatim after folding.
    pub keep_after_summary: usize,
    pub model_timeout: Duration,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            history_window: 10,
            related_limit: 3,
            summary_threshold: 40,
            keep_after_summary: 20,
            model_timeout: Duration::from_secs(crate::llm::DEFAULT_MODEL_TIMEOUT_SECS),
        }
    }
}

/// Everything the orchestrator drives, chosen at the composition root.
pub struct AssistantDeps {
    pub model: Arc<dyn ModelProvider>,
    pub security: SecurityGate,
    pub templates: TemplateRegistry,
    pub functions: FunctionRegistry,
    pub memory: Arc<dyn ConversationMemoryRepository>,
    pub similarity: Option<SimilarityService>,
    pub guardrails: RiskGuardrails,
    pub assessor: RiskAssessor,
    pub confirmations: ConfirmationFlow,
    pub portfolio: Arc<dyn PortfolioService>,
    pub executor: Option<Arc<dyn TradeExecutor>>,
    pub audit: AuditService,
    pub clock: Arc<dyn Clock>,
    pub options: AssistantOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub reply: String,
    /// Whether output validation changed the model's text.
    pub sanitized: bool,
}
