//! JSON failure envelope for gate rejections.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;

use crate::gate::{Rejection, error::retry_after_seconds};

/// Application error code carried in every failure body.
pub const FAILURE_CODE: u16 = 7;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Failure {
    pub code: u16,
    pub msg: String,
    /// `reason` is a stable machine-readable code. Token rejections add
    /// `reload: true`, rate limiting adds `retry_after` (seconds).
    #[schema(value_type = Object)]
    pub data: Value,
}

impl Failure {
    #[must_use]
    pub fn new(msg: impl Into<String>, data: Value) -> Self {
        Self {
            code: FAILURE_CODE,
            msg: msg.into(),
            data,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let reason = self.code();
        match &self {
            Self::Unauthenticated(_) => (
                StatusCode::UNAUTHORIZED,
                Json(Failure::new(
                    self.to_string(),
                    json!({ "reason": reason, "reload": true }),
                )),
            )
                .into_response(),
            Self::Unauthorized => (
                StatusCode::FORBIDDEN,
                Json(Failure::new(self.to_string(), json!({ "reason": reason }))),
            )
                .into_response(),
            Self::RateLimited { retry_after } => {
                let seconds = retry_after_seconds(*retry_after);
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(Failure::new(
                        self.to_string(),
                        json!({ "reason": reason, "retry_after": seconds }),
                    )),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(seconds));
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::AuthFailure;
    use std::time::Duration;

    async fn body(response: Response) -> anyhow::Result<Failure> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn token_rejection_asks_for_reload() -> anyhow::Result<()> {
        let response = Rejection::from(AuthFailure::Expired).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let failure = body(response).await?;
        assert_eq!(failure.code, FAILURE_CODE);
        assert_eq!(failure.msg, "authorization expired");
        assert_eq!(failure.data["reload"], json!(true));
        assert_eq!(failure.data["reason"], json!("token_expired"));
        Ok(())
    }

    #[tokio::test]
    async fn forbidden_has_no_reload() -> anyhow::Result<()> {
        let response = Rejection::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body(response).await?.data.get("reload"), None);
        Ok(())
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() -> anyhow::Result<()> {
        let response = Rejection::RateLimited {
            retry_after: Duration::from_millis(41_200),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER),
            Some(&HeaderValue::from_static("42"))
        );
        let failure = body(response).await?;
        assert_eq!(failure.data["retry_after"], json!(42));
        // message and header report the same cooldown
        assert_eq!(failure.msg, "too many requests, retry in 42s");
        Ok(())
    }
}
