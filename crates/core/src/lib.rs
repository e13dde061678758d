pub mod adapters;
pub mod assistant;
pub mod audit;
pub mod context;
pub mod domain;
pub mod embeddings;
pub mod error;
pub mod functions;
pub mod llm;
pub mod memory;
pub mod ports;
pub mod prompt;
pub mod risk;
pub mod security;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub mod config {
    use anyhow::Context;
    use std::str::FromStr;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub ai_provider: String,
        pub ai_fallback_provider: Option<String>,
        pub gemini_api_key: Option<String>,
        pub openai_api_key: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub encryption_key: Option<String>,
        pub conversation_summary_threshold: usize,
        pub risk: RiskPolicySettings,
    }

    /// Knobs for the configuration-driven risk policy.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RiskPolicySettings {
        pub trading_enabled: bool,
        pub disabled_reason: Option<String>,
        pub max_position_pct: f64,
        pub current_drawdown_pct: f64,
        pub max_drawdown_pct: f64,
        pub daily_loss_pct: f64,
        pub daily_loss_limit_pct: f64,
        pub max_exposure_pct: f64,
    }

    impl Default for RiskPolicySettings {
        fn default() -> Self {
            Self {
                trading_enabled: true,
                disabled_reason: None,
                max_position_pct: 2.0,
                current_drawdown_pct: 0.0,
                max_drawdown_pct: 20.0,
                daily_loss_pct: 0.0,
                daily_loss_limit_pct: 5.0,
                max_exposure_pct: 25.0,
            }
        }
    }

    fn env_parse<T: FromStr>(key: &str) -> Option<T> {
        std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
    }

    impl RiskPolicySettings {
        pub fn from_env() -> Self {
            let defaults = Self::default();
            Self {
                trading_enabled: env_parse("RISK_TRADING_ENABLED").unwrap_or(defaults.trading_enabled),
                disabled_reason: std::env::var("RISK_DISABLED_REASON").ok(),
                max_position_pct: env_parse("RISK_MAX_POSITION_PCT").unwrap_or(defaults.max_position_pct),
                current_drawdown_pct: env_parse("RISK_CURRENT_DRAWDOWN_PCT")
                    .unwrap_or(defaults.current_drawdown_pct),
                max_drawdown_pct: env_parse("RISK_MAX_DRAWDOWN_PCT").unwrap_or(defaults.max_drawdown_pct),
                daily_loss_pct: env_parse("RISK_DAILY_LOSS_PCT").unwrap_or(defaults.daily_loss_pct),
                daily_loss_limit_pct: env_parse("RISK_DAILY_LOSS_LIMIT_PCT")
                    .unwrap_or(defaults.daily_loss_limit_pct),
                max_exposure_pct: env_parse("RISK_MAX_EXPOSURE_PCT").unwrap_or(defaults.max_exposure_pct),
            }
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                ai_provider: std::env::var("AI_PROVIDER").unwrap_or_else(|_| "gemini".to_string()),
                ai_fallback_provider: std::env::var("AI_FALLBACK_PROVIDER").ok(),
                gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
                openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                encryption_key: std::env::var("ENCRYPTION_KEY").ok(),
                conversation_summary_threshold: env_parse("CONVERSATION_SUMMARY_THRESHOLD")
                    .unwrap_or(40),
                risk: RiskPolicySettings::from_env(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_gemini_api_key(&self) -> anyhow::Result<&str> {
            self.gemini_api_key
                .as_deref()
                .context("GEMINI_API_KEY is required")
        }

        pub fn require_openai_api_key(&self) -> anyhow::Result<&str> {
            self.openai_api_key
                .as_deref()
                .context("OPENAI_API_KEY is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }
    }
}
