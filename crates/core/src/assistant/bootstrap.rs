use super::{AiOrchestrator, AssistantDeps, AssistantOptions};
use crate::adapters::{PaperTradeExecutor, StaticMarketData, StaticPortfolio, StaticRiskPolicy};
use crate::audit::AuditService;
use crate::config::Settings;
use crate::context::Clock;
use crate::embeddings::{embedding_service_from_settings, SimilarityService};
use crate::functions::trading::{register_standard_functions, TradingPorts};
use crate::functions::FunctionRegistry;
use crate::llm::{model_from_settings, ModelProvider};
use crate::prompt::TemplateRegistry;
use crate::risk::{ConfirmationFlow, RiskAssessor, RiskGuardrails};
use crate::security::{ContentValidator, Encryptor, SecurityGate, SecurityOptions};
use crate::storage::Repositories;
use std::sync::Arc;

/// Wires the orchestrator with the model chosen by `AI_PROVIDER`.
pub fn build_orchestrator(
    settings: &Settings,
    repos: Repositories,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<AiOrchestrator> {
    let model = model_from_settings(settings)?;
    build_with_model(settings, model, repos, clock)
}

pub fn build_with_model(
    settings: &Settings,
    model: Arc<dyn ModelProvider>,
    repos: Repositories,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<AiOrchestrator> {
    let audit = AuditService::new(repos.audit.clone(), clock.clone());
    let security = SecurityGate::new(SecurityOptions::default(), ContentValidator::with_default_rules()?)?
        .with_encryptor(Encryptor::from_env_key(settings.encryption_key.as_deref())?)
        .with_audit(audit.clone());

    let market = Arc::new(StaticMarketData::new(clock.clone()));
    let portfolio = Arc::new(StaticPortfolio::new(clock.clone()));
    let risk = Arc::new(StaticRiskPolicy::new(settings.risk.clone()));

    let functions = FunctionRegistry::default();
    register_standard_functions(
        &functions,
        TradingPorts {
            market: market.clone(),
            portfolio: portfolio.clone(),
            risk: risk.clone(),
            clock: clock.clone(),
        },
    )?;

    let embedder = embedding_service_from_settings(settings, model.clone())?;
    let threshold = settings.conversation_summary_threshold.max(2);

    let deps = AssistantDeps {
        model,
        security,
        templates: TemplateRegistry::with_builtins()?,
        functions,
        memory: repos.memory,
        similarity: Some(SimilarityService::new(embedder, repos.vectors)),
        guardrails: RiskGuardrails::new(risk.clone(), clock.clone()),
        assessor: RiskAssessor::new(risk),
        confirmations: ConfirmationFlow::new(repos.confirmations, clock.clone()),
        portfolio,
        executor: Some(Arc::new(PaperTradeExecutor::new(market, clock.clone()))),
        audit,
        clock,
        options: AssistantOptions {
            summary_threshold: threshold,
            keep_after_summary: threshold / 2,
            ..AssistantOptions::default()
        },
    };
    tracing::info!(
        functions = deps.functions.definitions().len(),
        summary_threshold = threshold,
        "assistant initialised"
    );
    Ok(AiOrchestrator::new(deps))
}
