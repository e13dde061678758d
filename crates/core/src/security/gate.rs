use crate::audit::AuditService;
use crate::context::RequestContext;
use crate::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};
use crate::error::{AssistantError, Result};
use crate::security::crypto::Encryptor;
use crate::security::validator::{
    open_tag_regex, unsafe_html_elements, ContentValidator, ContentViolation, Severity,
};
use regex::Regex;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityOptions {
    pub enable_content_validation: bool,
    pub enable_input_sanitization: bool,
    pub enable_encryption: bool,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            enable_content_validation: true,
            enable_input_sanitization: true,
            enable_encryption: true,
        }
    }
}

/// Output after validation. `content` is always safe to return, even when
/// `policy_error` is set.
#[derive(Debug)]
pub struct ValidatedOutput {
    pub content: String,
    pub violations: Vec<ContentViolation>,
    pub policy_error: Option<AssistantError>,
}

impl ValidatedOutput {
    pub fn was_sanitized(&self, raw: &str) -> bool {
        self.content != raw
    }
}

#[derive(Clone)]
pub struct SecurityGate {
    options: SecurityOptions,
    validator: ContentValidator,
    script: Regex,
    open_tag: Regex,
    sql: Regex,
    encryptor: Option<Encryptor>,
    audit: Option<AuditService>,
}

impl SecurityGate {
    pub fn new(options: SecurityOptions, validator: ContentValidator) -> anyhow::Result<Self> {
        Ok(Self {
            options,
            validator,
            script: Regex::new(r"(?i)<script[\s\S]*?</script>")?,
            open_tag: open_tag_regex()?,
            sql: Regex::new(
                r"(?i)(union\s+select|select\s+.*\s+from(\s+\w+)?|insert\s+into(\s+\w+)?|update\s+.*\s+set|delete\s+from(\s+\w+)?|drop\s+table(\s+\w+)?|exec\s+xp_|exec\s+sp_|exec\s+master|declare\s+@|;--)",
            )?,
            encryptor: None,
            audit: None,
        })
    }

    pub fn with_encryptor(mut self, encryptor: Encryptor) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    pub fn with_audit(mut self, audit: AuditService) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn validator(&self) -> &ContentValidator {
        &self.validator
    }

    /// Strips script blocks, unsafe HTML (keeping inner text) and SQL fragments.
    ///
    /// Passes repeat until nothing changes, so the result is a fixpoint.
    pub fn sanitize(&self, input: &str) -> String {
        let mut current = input.to_string();
        loop {
            let next = self.sanitize_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn sanitize_once(&self, input: &str) -> String {
        let without_scripts = self.script.replace_all(input, "");

        let elements = unsafe_html_elements(&self.open_tag, &without_scripts);
        let mut without_html = String::with_capacity(without_scripts.len());
        let mut last = 0;
        for el in elements {
            without_html.push_str(&without_scripts[last..el.outer.start]);
            without_html.push_str(&without_scripts[el.inner]);
            last = el.outer.end;
        }
        without_html.push_str(&without_scripts[last..]);

        self.sql.replace_all(&without_html, "").into_owned()
    }

    pub async fn sanitize_input(&self, ctx: &RequestContext, input: &str) -> String {
        if !self.options.enable_input_sanitization {
            return input.to_string();
        }
        let sanitized = self.sanitize(input);
        if sanitized != input {
            tracing::info!(
                original_length = input.len(),
                sanitized_length = sanitized.len(),
                "input sanitized"
            );
            self.audit_change(
                ctx,
                "INPUT_SANITIZED",
                "Potentially harmful content removed from user input",
                input.len(),
                sanitized.len(),
            )
            .await;
        }
        sanitized
    }

    pub async fn validate_output(&self, ctx: &RequestContext, output: &str) -> ValidatedOutput {
        if !self.options.enable_content_validation {
            return ValidatedOutput {
                content: output.to_string(),
                violations: Vec::new(),
                policy_error: None,
            };
        }

        let result = self.validator.validate(output);
        for violation in &result.violations {
            match violation.severity {
                Severity::Error => tracing::warn!(
                    rule = %violation.rule,
                    description = %violation.description,
                    "content validation error"
                ),
                Severity::Warning | Severity::Info => tracing::info!(
                    rule = %violation.rule,
                    description = %violation.description,
                    "content validation warning"
                ),
            }
        }

        let policy_error = (!result.valid).then(|| {
            AssistantError::PolicyViolation(format!(
                "content validation failed: {} violations",
                result.violations.len()
            ))
        });

        if result.sanitized != output {
            tracing::info!(
                original_length = output.len(),
                sanitized_length = result.sanitized.len(),
                "output sanitized"
            );
            self.audit_change(
                ctx,
                "OUTPUT_SANITIZED",
                "Potentially harmful content removed from AI output",
                output.len(),
                result.sanitized.len(),
            )
            .await;
        }

        ValidatedOutput {
            content: result.sanitized,
            violations: result.violations,
            policy_error,
        }
    }

    /// No-op when encryption is disabled or no key is configured.
    pub fn encrypt_sensitive(&self, data: &str) -> Result<String> {
        match (&self.encryptor, self.options.enable_encryption) {
            (Some(enc), true) => enc.encrypt_string(data),
            _ => Ok(data.to_string()),
        }
    }

    pub fn decrypt_sensitive(&self, data: &str) -> Result<String> {
        match (&self.encryptor, self.options.enable_encryption) {
            (Some(enc), true) => enc.decrypt_string(data),
            _ => Ok(data.to_string()),
        }
    }

    async fn audit_change(
        &self,
        ctx: &RequestContext,
        action: &str,
        description: &str,
        original_length: usize,
        sanitized_length: usize,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let event = AuditEvent::new(
            AuditEventType::Security,
            AuditSeverity::Warning,
            action,
            description,
        )
        .metadata(json!({
            "original_length": original_length,
            "sanitized_length": sanitized_length,
        }));
        audit.record(ctx, event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditRepository;
    use crate::context::SystemClock;
    use crate::error::ErrorKind;
    use crate::security::validator::DISCLAIMER;
    use std::sync::Arc;

    fn gate() -> SecurityGate {
        SecurityGate::new(
            SecurityOptions::default(),
            ContentValidator::with_default_rules().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn strips_sql_injection_fragments() {
        let g = gate();
        assert_eq!(
            g.sanitize("Please run SELECT * FROM users; DROP TABLE users;--"),
            "Please run ; "
        );
        assert_eq!(g.sanitize("then DELETE FROM orders now"), "then  now");
        assert_eq!(g.sanitize("INSERT INTO logs values"), " values");
    }

    #[test]
    fn keeps_inner_text_of_unsafe_html() {
        let out = gate().sanitize("<span class=\"x\">hello</span> <b>world</b>");
        assert_eq!(out, "hello <b>world</b>");
    }

    #[test]
    fn removes_script_blocks() {
        assert_eq!(gate().sanitize("a<script>steal()</script>b"), "ab");
    }

    #[test]
    fn sanitization_is_idempotent() {
        let g = gate();
        let inputs = [
            "Please run SELECT * FROM users; DROP TABLE users;--",
            "<div><div>nested</div></div>",
            "<scr<script>x</script>ipt>alert(1)</script>",
            "union union select select from from",
            "; -- ;;---- declare @x",
            "plain text stays",
        ];
        for input in inputs {
            let once = g.sanitize(input);
            assert_eq!(g.sanitize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[tokio::test]
    async fn sanitize_input_audits_changes() {
        let repo = Arc::new(InMemoryAuditRepository::new());
        let g = gate().with_audit(AuditService::new(repo.clone(), Arc::new(SystemClock)));
        let ctx = RequestContext::background().with_user(3);

        let out = g.sanitize_input(&ctx, "hi <script>x</script>").await;
        assert_eq!(out, "hi ");

        let events = repo.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "INPUT_SANITIZED");
        assert_eq!(events[0].event_type, AuditEventType::Security);
        assert_eq!(events[0].metadata["original_length"], 21);
        assert_eq!(events[0].metadata["sanitized_length"], 3);

        g.sanitize_input(&ctx, "nothing to do").await;
        assert_eq!(repo.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn sanitization_can_be_disabled() {
        let g = SecurityGate::new(
            SecurityOptions {
                enable_input_sanitization: false,
                ..Default::default()
            },
            ContentValidator::with_default_rules().unwrap(),
        )
        .unwrap();
        let raw = "DROP TABLE users";
        assert_eq!(g.sanitize_input(&RequestContext::background(), raw).await, raw);
    }

    #[tokio::test]
    async fn validate_output_returns_sanitized_text_with_policy_error() {
        let out = gate()
            .validate_output(&RequestContext::background(), "Easy money: pump it")
            .await;
        assert_eq!(out.content, "Easy money: [REDACTED] it");
        let err = out.policy_error.unwrap();
        assert_eq!(err.kind(), ErrorKind::PolicyViolation);
        assert_eq!(err.to_string(), "content validation failed: 1 violations");
    }

    #[tokio::test]
    async fn validate_output_appends_disclaimer() {
        let out = gate()
            .validate_output(&RequestContext::background(), "Should I buy BTC now?")
            .await;
        assert!(out.policy_error.is_none());
        assert!(out.content.ends_with(DISCLAIMER));
        assert!(out.was_sanitized("Should I buy BTC now?"));
    }

    #[test]
    fn encryption_round_trips_when_enabled() {
        let g = gate().with_encryptor(Encryptor::random());
        let sealed = g.encrypt_sensitive("api-secret").unwrap();
        assert_ne!(sealed, "api-secret");
        assert_eq!(g.decrypt_sensitive(&sealed).unwrap(), "api-secret");
    }

    #[test]
    fn encryption_is_passthrough_without_key() {
        assert_eq!(gate().encrypt_sensitive("x").unwrap(), "x");
    }
}
