use anyhow::Context;
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;

pub const REDACTION_MARKER: &str = "[REDACTED]";

pub const DISCLAIMER: &str = "\n\nDISCLAIMER: This information is for educational purposes only and not financial advice. Trading cryptocurrencies involves significant risk. Always do your own research before making investment decisions.";

/// Tags that may pass through unflagged.
const ALLOWED_HTML_TAGS: &[&str] = &["code", "pre", "br", "p", "b", "i", "strong", "em"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone)]
enum Matcher {
    Pattern(Regex),
    UnsafeHtml(Regex),
}

impl Matcher {
    fn find_all(&self, text: &str) -> Vec<Range<usize>> {
        match self {
            Matcher::Pattern(re) => re.find_iter(text).map(|m| m.range()).collect(),
            Matcher::UnsafeHtml(open_tag) => unsafe_html_elements(open_tag, text)
                .into_iter()
                .map(|el| el.outer)
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub name: String,
    pub description: String,
    pub severity: Severity,
    matcher: Matcher,
}

impl ValidationRule {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        pattern: &str,
        severity: Severity,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let re = Regex::new(pattern).with_context(|| format!("invalid pattern for rule {name}"))?;
        Ok(Self {
            name,
            description: description.into(),
            severity,
            matcher: Matcher::Pattern(re),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentViolation {
    pub rule: String,
    pub description: String,
    pub severity: Severity,
    #[serde(rename = "match")]
    pub matched: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ContentViolation>,
    pub sanitized: String,
}

/// Regex rule engine that flags and redacts disallowed content.
///
/// The rule list is shared: clones see rules added through any handle.
#[derive(Debug, Clone)]
pub struct ContentValidator {
    rules: Arc<RwLock<Vec<ValidationRule>>>,
    trading_verbs: Regex,
    disclaimer_phrases: Regex,
}

impl ContentValidator {
    pub fn empty() -> anyhow::Result<Self> {
        Ok(Self {
            rules: Arc::new(RwLock::new(Vec::new())),
            trading_verbs: Regex::new(r"(?i)\b(buy|sell|invest|trade)\b")?,
            disclaimer_phrases: Regex::new(
                r"(?i)\b(disclaimer|not financial advice|educational purposes only|do your own research|dyor)\b",
            )?,
        })
    }

    pub fn with_default_rules() -> anyhow::Result<Self> {
        let validator = Self::empty()?;
        let rules = [
            ("SENSITIVE_DATA_CREDIT_CARD", "Credit card number", r"\b(?:\d{4}[-\s]?){3}\d{4}\b", Severity::Error),
            ("SENSITIVE_DATA_SSN", "Social security number", r"\b\d{3}[-\s]?\d{2}[-\s]?\d{4}\b", Severity::Error),
            (
                "SENSITIVE_DATA_API_KEY",
                "API key",
                r#"(?i)\b(api[-_]?key|apikey|access[-_]?key|auth[-_]?token|client[-_]?secret)[-_]?[:=]\s*["']?([a-zA-Z0-9]{16,})["']?"#,
                Severity::Error,
            ),
            ("SENSITIVE_DATA_PASSWORD", "Password", r#"(?i)"(password|passwd|pwd)":\s*"[^"]*""#, Severity::Error),
            ("MALICIOUS_CODE_JS", "JavaScript code", r"(?i)<script[\s\S]*?</script>", Severity::Error),
            ("TRADING_ADVICE_DISCLAIMER", "Trading advice without disclaimer", r"(?i)\b(buy|sell|invest|trade)\b", Severity::Warning),
            (
                "FINANCIAL_ADVICE",
                "Financial advice",
                r"(?i)\b(guarantee|guaranteed|promise|assured|certain)\b.*\b(return|profit|gain|income)\b",
                Severity::Error,
            ),
            ("MARKET_MANIPULATION", "Market manipulation", r"(?i)\b(pump|dump|manipulate|scheme|scam)\b", Severity::Error),
        ];

        let mut compiled = Vec::with_capacity(rules.len() + 1);
        for (name, description, pattern, severity) in rules {
            compiled.push(ValidationRule::new(name, description, pattern, severity)?);
        }
        compiled.insert(
            5,
            ValidationRule {
                name: "MALICIOUS_CODE_HTML".to_string(),
                description: "HTML tags".to_string(),
                severity: Severity::Warning,
                matcher: Matcher::UnsafeHtml(open_tag_regex()?),
            },
        );

        *validator.rules.write() = compiled;
        Ok(validator)
    }

    pub fn add_rule(&self, rule: ValidationRule) {
        tracing::debug!(rule = %rule.name, "registering content rule");
        self.rules.write().push(rule);
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.read().iter().map(|r| r.name.clone()).collect()
    }

    /// Pure function of `content` and the current rule set.
    pub fn validate(&self, content: &str) -> ValidationResult {
        let mut result = ValidationResult {
            valid: true,
            violations: Vec::new(),
            sanitized: content.to_string(),
        };

        for rule in self.rules.read().iter() {
            let matches = rule.matcher.find_all(content);
            if matches.is_empty() {
                continue;
            }
            if rule.severity == Severity::Error {
                result.valid = false;
            }
            for range in matches {
                result.violations.push(ContentViolation {
                    rule: rule.name.clone(),
                    description: rule.description.clone(),
                    severity: rule.severity,
                    matched: content[range].to_string(),
                });
            }
            if rule.severity == Severity::Error {
                let current = rule.matcher.find_all(&result.sanitized);
                result.sanitized = replace_ranges(&result.sanitized, &current, REDACTION_MARKER);
            }
        }

        if self.needs_disclaimer(content) {
            result.sanitized.push_str(DISCLAIMER);
        }
        result
    }

    pub fn needs_disclaimer(&self, content: &str) -> bool {
        self.trading_verbs.is_match(content) && !self.disclaimer_phrases.is_match(content)
    }
}

pub(crate) fn open_tag_regex() -> anyhow::Result<Regex> {
    Regex::new(r"(?i)<([a-z][a-z0-9]*)\b[^>]*>").context("invalid html tag pattern")
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HtmlElement {
    pub outer: Range<usize>,
    pub inner: Range<usize>,
}

/// Finds `<tag ...>inner</tag>` spans whose tag is outside the allow-list.
/// The closing tag is the nearest one with the same name.
pub(crate) fn unsafe_html_elements(open_tag: &Regex, text: &str) -> Vec<HtmlElement> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(caps) = open_tag.captures_at(text, pos) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let tag = name.as_str().to_ascii_lowercase();
        if ALLOWED_HTML_TAGS.contains(&tag.as_str()) {
            pos = whole.end();
            continue;
        }
        let close = format!("</{tag}>");
        match lower[whole.end()..].find(&close) {
            Some(offset) => {
                let inner = whole.end()..whole.end() + offset;
                let outer = whole.start()..inner.end + close.len();
                pos = outer.end;
                out.push(HtmlElement { outer, inner });
            }
            None => pos = whole.end(),
        }
    }
    out
}

pub(crate) fn replace_ranges(text: &str, ranges: &[Range<usize>], with: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for range in ranges {
        out.push_str(&text[last..range.start]);
        out.push_str(with);
        last = range.end;
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn validator() -> ContentValidator {
        ContentValidator::with_default_rules().unwrap()
    }

    #[test]
    fn default_rule_order_is_stable() {
        assert_eq!(
            validator().rule_names(),
            vec![
                "SENSITIVE_DATA_CREDIT_CARD",
                "SENSITIVE_DATA_SSN",
                "SENSITIVE_DATA_API_KEY",
                "SENSITIVE_DATA_PASSWORD",
                "MALICIOUS_CODE_JS",
                "MALICIOUS_CODE_HTML",
                "TRADING_ADVICE_DISCLAIMER",
                "FINANCIAL_ADVICE",
                "MARKET_MANIPULATION",
            ]
        );
    }

    #[test]
    fn appends_disclaimer_to_trading_talk() {
        let result = validator().validate("Should I buy BTC now?");
        assert!(result.valid);
        assert!(result.sanitized.ends_with(DISCLAIMER));
        assert!(result
            .sanitized
            .contains("DISCLAIMER: This information is for educational purposes only"));
        assert!(result
            .violations
            .iter()
            .any(|v| v.rule == "TRADING_ADVICE_DISCLAIMER" && v.severity == Severity::Warning));
    }

    #[test]
    fn existing_disclaimer_is_respected() {
        let text = "You could sell some ETH. DYOR.";
        let result = validator().validate(text);
        assert_eq!(result.sanitized, text);
    }

    #[test]
    fn no_disclaimer_without_trading_verbs() {
        let text = "Bitcoin's block time is roughly ten minutes.";
        assert_eq!(validator().validate(text).sanitized, text);
    }

    #[test]
    fn redacts_credit_card_numbers() {
        let result = validator().validate("card 4111 1111 1111 1111 on file");
        assert!(!result.valid);
        assert_eq!(result.sanitized, "card [REDACTED] on file");
        assert_eq!(result.violations[0].rule, "SENSITIVE_DATA_CREDIT_CARD");
    }

    #[test]
    fn redacts_api_keys_and_passwords() {
        let result =
            validator().validate(r#"api_key=ABCDEF0123456789XYZ and {"password": "hunter2"}"#);
        assert!(!result.valid);
        assert_eq!(result.sanitized, "[REDACTED] and {[REDACTED]}");
    }

    #[test]
    fn flags_market_manipulation() {
        let result = validator().validate("Join our pump group");
        assert!(!result.valid);
        assert_eq!(result.sanitized, "Join our [REDACTED] group");
    }

    #[test]
    fn guaranteed_returns_are_errors() {
        let result = validator().validate("We guarantee a 20% return every month");
        assert!(!result.valid);
        assert!(result.violations.iter().any(|v| v.rule == "FINANCIAL_ADVICE"));
        assert!(!result.sanitized.contains("guarantee"));
    }

    #[test]
    fn unsafe_html_is_a_warning_and_kept() {
        let text = "<div>hello</div> and <b>bold</b>";
        let result = validator().validate(text);
        assert!(result.valid);
        assert_eq!(result.sanitized, text);
        let html: Vec<_> = result
            .violations
            .iter()
            .filter(|v| v.rule == "MALICIOUS_CODE_HTML")
            .collect();
        assert_eq!(html.len(), 1);
        assert_eq!(html[0].matched, "<div>hello</div>");
    }

    #[test]
    fn script_blocks_are_redacted() {
        let result = validator().validate("hi <script>alert(1)</script>");
        assert!(!result.valid);
        assert_eq!(result.sanitized, "hi [REDACTED]");
    }

    #[test]
    fn validation_is_deterministic() {
        let v = validator();
        let text = "Buy now! 123-45-6789 <span>x</span>";
        assert_eq!(v.validate(text), v.validate(text));
    }

    #[test]
    fn custom_rules_are_shared_between_clones() {
        let v = validator();
        let clone = v.clone();
        v.add_rule(ValidationRule::new("RUG", "Rug pull", r"(?i)\brug\b", Severity::Error).unwrap());
        assert!(!clone.validate("rug incoming").valid);
    }

    #[test]
    fn html_scan_matches_nearest_closing_tag() {
        let re = open_tag_regex().unwrap();
        let text = "<DIV class=x>a</div><em>b</em>";
        let els = unsafe_html_elements(&re, text);
        assert_eq!(els.len(), 1);
        assert_eq!(&text[els[0].inner.clone()], "a");
    }
}
