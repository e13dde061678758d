use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;

use tradeassist_core::context::RequestContext;
use tradeassist_core::error::{AssistantError, ErrorKind};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Authenticated caller and the request context built from its headers.
pub(crate) struct Caller {
    pub user_id: i64,
    pub ctx: RequestContext,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn client_ip(headers: &HeaderMap) -> String {
    header(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let user_id: i64 = header(headers, "x-user-id")
            .ok_or_else(|| ApiError::Unauthorized("x-user-id header is required".to_string()))?
            .parse()
            .map_err(|_| ApiError::Unauthorized("x-user-id must be an integer".to_string()))?;

        let (ctx, _cancel) = RequestContext::new(header(headers, "x-request-id").map(str::to_string));
        let ctx = ctx
            .with_user(user_id)
            .with_client(client_ip(headers), header(headers, "user-agent").unwrap_or_default())
            .with_timeout(REQUEST_TIMEOUT);

        Ok(Self { user_id, ctx })
    }
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Core(AssistantError),
    BadRequest(String),
    Unauthorized(String),
    Unavailable,
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        ApiError::Core(err)
    }
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::PolicyViolation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::RiskBlocked => StatusCode::FORBIDDEN,
        ErrorKind::StateConflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::External => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Core(err) => {
                let kind = err.kind();
                if let AssistantError::External(inner) = &err {
                    sentry_anyhow::capture_anyhow(inner);
                    tracing::error!(error = %format!("{inner:#}"), "request failed on a dependency");
                }
                (status_for(kind), kind.to_string(), err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_input".to_string(), msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized".to_string(), msg),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable".to_string(),
                "assistant is not configured".to_string(),
            ),
        };
        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use pretty_assertions::assert_eq;

    async fn extract(req: Request<()>) -> Result<Caller, ApiError> {
        let (mut parts, _) = req.into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn builds_context_from_headers() {
        let req = Request::builder()
            .header("x-user-id", "42")
            .header("x-request-id", "req-1")
            .header("user-agent", "curl/8")
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body(())
            .unwrap();
        let caller = extract(req).await.unwrap();
        assert_eq!(caller.user_id, 42);
        assert_eq!(caller.ctx.request_id, "req-1");
        assert_eq!(caller.ctx.user_id, Some(42));
        assert_eq!(caller.ctx.ip, "10.0.0.1");
        assert_eq!(caller.ctx.user_agent, "curl/8");
        assert!(caller.ctx.deadline().is_some());
    }

    #[tokio::test]
    async fn missing_user_is_rejected() {
        let req = Request::builder().body(()).unwrap();
        let err = extract(req).await.err().unwrap();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn maps_core_errors_to_statuses() {
        let cases = [
            (AssistantError::invalid("x"), StatusCode::BAD_REQUEST),
            (AssistantError::PolicyViolation("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (AssistantError::RiskBlocked("x".into()), StatusCode::FORBIDDEN),
            (AssistantError::conflict("x"), StatusCode::CONFLICT),
            (AssistantError::not_found("x"), StatusCode::NOT_FOUND),
            (AssistantError::Cancelled("deadline exceeded"), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
        assert_eq!(
            ApiError::Unavailable.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
