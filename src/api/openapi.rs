use utoipa::OpenApi;

use crate::{
    api::{
        handlers::{health, logout, me},
        response::Failure,
    },
    gate::Claims,
};

#[derive(OpenApi)]
#[openapi(
    paths(health::health, me::me, logout::logout),
    components(schemas(health::Health, Claims, Failure)),
    tags(
        (name = "health", description = "Liveness"),
        (name = "session", description = "Gate-protected session endpoints")
    )
)]
pub struct ApiDoc;
