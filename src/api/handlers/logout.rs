use axum::{
    Extension,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::error;

use crate::{
    api::{
        GateState,
        middleware::{SessionEnded, SessionToken},
        response::Failure,
    },
    gate::{Claims, Rotation},
};

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Token revoked"),
        (status = 401, description = "Missing, expired, invalid or revoked token", body = Failure),
        (status = 503, description = "Revocation could not be recorded", body = Failure)
    ),
    tag = "session"
)]
/// Blacklist the presented token, and its replacement if this request rotated it.
pub async fn logout(
    State(state): State<GateState>,
    Extension(claims): Extension<Claims>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    rotation: Option<Extension<Rotation>>,
) -> Response {
    let mut revoked = state.lifecycle.logout(&token, claims.exp).await;
    if let (true, Some(Extension(rotation))) = (revoked.is_ok(), rotation) {
        revoked = state
            .lifecycle
            .logout(&rotation.token, rotation.expires_at)
            .await;
    }

    let mut response = match revoked {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to blacklist token for {}: {err}", claims.username);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Failure::new(
                    "logout failed, try again",
                    json!({ "reason": "session_unavailable" }),
                )),
            )
                .into_response()
        }
    };
    response.extensions_mut().insert(SessionEnded);
    response
}
