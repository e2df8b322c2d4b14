//! # Authentication
//!
//! Operator bearer authentication for the protected API routes.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, unauthorized_with_trace_id};
use crate::server::AppState;
use crate::telemetry::TraceContext;

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Authentication middleware that validates operator bearer tokens.
///
/// Local and test profiles without configured tokens accept every request.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if config.operator_tokens.is_empty() && config.is_local_profile() {
        request.extensions_mut().insert(OperatorAuth);
        return Ok(next.run(request).await);
    }

    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id.clone());

    let token = extract_bearer_token(request.headers()).map_err(|message| match &trace_id {
        Some(trace_id) => unauthorized_with_trace_id(Some(message), trace_id.clone()),
        None => unauthorized(Some(message)),
    })?;
    validate_token(&config, token)?;

    tracing::debug!("Authenticated operator request");
    request.extensions_mut().insert(OperatorAuth);
    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, &'static str> {
    headers
        .get(AUTHORIZATION)
        .ok_or("Missing Authorization header")?
        .to_str()
        .map_err(|_| "Invalid Authorization header")?
        .strip_prefix("Bearer ")
        .ok_or("Authorization header must use Bearer scheme")
}

fn validate_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .operator_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    Arc<AppConfig>: FromRef<S>,
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(extract_bearer_token(&headers), Ok("s3cret"));
    }

    #[test]
    fn non_bearer_schemes_are_rejected() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            extract_bearer_token(&headers),
            Err("Missing Authorization header")
        );
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(
            extract_bearer_token(&headers),
            Err("Authorization header must use Bearer scheme")
        );
    }

    #[test]
    fn tokens_compare_against_every_configured_value() {
        let config = AppConfig {
            operator_tokens: vec!["first".to_string(), "second".to_string()],
            ..AppConfig::default()
        };
        assert!(validate_token(&config, "second").is_ok());
        assert!(validate_token(&config, "third").is_err());
    }
}
