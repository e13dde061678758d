//! Guardrails, pre-trade assessment and the two-phase confirmation flow.

pub mod assessment;
pub mod confirmation;
pub mod guardrails;

pub use assessment::RiskAssessor;
pub use confirmation::{
    requires_confirmation, ConfirmationFlow, ConfirmationRepository, InMemoryConfirmationRepository,
    CONFIRMATION_TTL_HOURS,
};
pub use guardrails::{extract_symbol, RiskGuardrails, KNOWN_SYMBOLS};
