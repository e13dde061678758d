use crate::llm::error::ProviderError;
use crate::llm::Provider;
use anyhow::Context;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub(crate) fn build_client(timeout_env: &str, default_secs: u64) -> anyhow::Result<reqwest::Client> {
    let timeout_secs = std::env::var(timeout_env)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default_secs);

    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("failed to build reqwest client")
}

/// POSTs `body` and decodes the JSON reply, keeping the raw body on failure.
pub(crate) async fn post_json<Req, Res>(
    http: &reqwest::Client,
    provider: Provider,
    url: &str,
    headers: HeaderMap,
    body: &Req,
) -> anyhow::Result<Res>
where
    Req: Serialize + ?Sized,
    Res: DeserializeOwned,
{
    let res = http
        .post(url)
        .headers(headers)
        .json(body)
        .send()
        .await
        .with_context(|| format!("{provider} request failed"))?;

    let status = res.status();
    let text = res
        .text()
        .await
        .with_context(|| format!("failed to read {provider} response body"))?;
    if !status.is_success() {
        let err = ProviderError::Status {
            provider,
            status: status.as_u16(),
            body: text,
        };
        tracing::warn!(%provider, status = status.as_u16(), transient = err.is_transient(), "model provider rejected request");
        return Err(err.into());
    }

    serde_json::from_str::<Res>(&text).map_err(|e| {
        ProviderError::Decode {
            provider,
            detail: e.to_string(),
            body: text,
        }
        .into()
    })
}
