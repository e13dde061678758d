use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditEventType {
    Auth,
    Ai,
    Admin,
    Trading,
    Security,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::Auth => "AUTH",
            AuditEventType::Ai => "AI",
            AuditEventType::Admin => "ADMIN",
            AuditEventType::Trading => "TRADING",
            AuditEventType::Security => "SECURITY",
        }
    }
}

impl AuditSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditSeverity::Info => "INFO",
            AuditSeverity::Warning => "WARNING",
            AuditSeverity::Error => "ERROR",
            AuditSeverity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AUTH" => Ok(AuditEventType::Auth),
            "AI" => Ok(AuditEventType::Ai),
            "ADMIN" => Ok(AuditEventType::Admin),
            "TRADING" => Ok(AuditEventType::Trading),
            "SECURITY" => Ok(AuditEventType::Security),
            other => anyhow::bail!("unknown audit event type: {other}"),
        }
    }
}

impl FromStr for AuditSeverity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(AuditSeverity::Info),
            "WARNING" => Ok(AuditSeverity::Warning),
            "ERROR" => Ok(AuditSeverity::Error),
            "CRITICAL" => Ok(AuditSeverity::Critical),
            other => anyhow::bail!("unknown audit severity: {other}"),
        }
    }
}

/// Append-only record of a user-visible action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Assigned by the store.
    #[serde(default)]
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    #[serde(rename = "type")]
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub action: String,
    pub description: String,
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub request_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        severity: AuditSeverity,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_id: None,
            event_type,
            severity,
            action: action.into(),
            description: description.into(),
            metadata: serde_json::Value::Object(Default::default()),
            ip: String::new(),
            user_agent: String::new(),
            request_id: String::new(),
            created_at: None,
        }
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
