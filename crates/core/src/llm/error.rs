use crate::llm::Provider;

/// Provider-side failure, kept with the raw body for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} returned HTTP {status}")]
    Status {
        provider: Provider,
        status: u16,
        body: String,
    },
    #[error("{provider} response could not be decoded: {detail}")]
    Decode {
        provider: Provider,
        detail: String,
        body: String,
    },
    #[error("{provider} returned no content")]
    Empty { provider: Provider },
}

impl ProviderError {
    /// Rate limits and server-side errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Status { status, .. } if *status == 429 || *status >= 500)
    }

    pub fn raw_body(&self) -> Option<&str> {
        match self {
            ProviderError::Status { body, .. } | ProviderError::Decode { body, .. } => Some(body),
            ProviderError::Empty { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_throttling_and_server_errors_are_transient() {
        let status = |status| ProviderError::Status {
            provider: Provider::OpenAI,
            status,
            body: String::new(),
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!ProviderError::Empty { provider: Provider::Gemini }.is_transient());
        assert_eq!(status(500).raw_body(), Some(""));
    }
}
