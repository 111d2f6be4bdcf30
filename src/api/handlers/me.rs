use axum::{Extension, response::Json};

use crate::{api::response::Failure, gate::Claims};

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Claims of the calling session", body = Claims),
        (status = 401, description = "Missing, expired, invalid or revoked token", body = Failure),
        (status = 403, description = "Policy denies access", body = Failure),
        (status = 429, description = "Rate limited", body = Failure)
    ),
    tag = "session"
)]
pub async fn me(Extension(claims): Extension<Claims>) -> Json<Claims> {
    Json(claims)
}
