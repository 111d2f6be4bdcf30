//! Gate middleware, layered on protected routes in the order
//! token -> rate limit -> policy.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::{debug, error};

use super::GateState;
use crate::gate::{AdmissionRequest, AuthFailure, Claims, Rejection, Rotation};

pub const TOKEN_HEADER: &str = "x-token";
pub const NEW_TOKEN_HEADER: &str = "new-token";
pub const NEW_EXPIRES_AT_HEADER: &str = "new-expires-at";

/// The raw token the request authenticated with.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// Set by handlers that end the session; suppresses rotation headers.
#[derive(Debug, Clone, Copy)]
pub struct SessionEnded;

/// Token from `x-token`, else from `Authorization: Bearer`.
#[must_use]
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if token.is_some() {
        return token.map(str::to_string);
    }
    extract_bearer_token(headers)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Client address: first hop of the trusted header when configured, else the
/// socket peer.
#[must_use]
pub fn client_addr(request: &Request, trusted_header: Option<&str>) -> String {
    trusted_header
        .and_then(|name| request.headers().get(name))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Token gate: rejects unauthenticated requests, attaches [`Claims`] and
/// [`SessionToken`] to the request and rotation headers to the response.
pub async fn authenticate(
    State(state): State<GateState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let token = extract_token(request.headers());
    let authenticated = state.lifecycle.authenticate(token.as_deref()).await?;

    if let Some(token) = token {
        request.extensions_mut().insert(SessionToken(token));
    }
    if let Some(rotation) = &authenticated.rotation {
        request.extensions_mut().insert(rotation.clone());
    }
    request.extensions_mut().insert(authenticated.claims);

    let mut response = next.run(request).await;

    if let Some(rotation) = authenticated.rotation {
        if response.extensions().get::<SessionEnded>().is_none() {
            attach_rotation(&mut response, &rotation);
        }
    }

    Ok(response)
}

fn attach_rotation(response: &mut Response, rotation: &Rotation) {
    match HeaderValue::from_str(&rotation.token) {
        Ok(token) => {
            let headers = response.headers_mut();
            headers.insert(HeaderName::from_static(NEW_TOKEN_HEADER), token);
            headers.insert(
                HeaderName::from_static(NEW_EXPIRES_AT_HEADER),
                HeaderValue::from(rotation.expires_at),
            );
        }
        Err(err) => error!("Failed to encode rotated token header: {err}"),
    }
}

/// Admission gate.
pub async fn rate_limit(
    State(state): State<GateState>,
    request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let client = client_addr(&request, state.lifecycle.config().client_ip_header());
    let claims = request.extensions().get::<Claims>().cloned();

    state
        .limiter
        .admit(&AdmissionRequest {
            client_addr: &client,
            claims: claims.as_ref(),
        })
        .await?;

    Ok(next.run(request).await)
}

/// Policy gate: `(authority, path, method)` must be allowed.
pub async fn enforce_policy(
    State(state): State<GateState>,
    request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let Some(claims) = request.extensions().get::<Claims>() else {
        return Err(AuthFailure::NoToken.into());
    };

    let subject = claims.subject();
    let decision = state
        .enforcer
        .enforce(&subject, request.uri().path(), request.method().as_str());

    if !decision.is_allowed() {
        debug!(subject = %subject, path = request.uri().path(), "policy denied request");
        return Err(Rejection::Unauthorized);
    }

    Ok(next.run(request).await)
}
