//! HTTP surface: gate middleware, handlers and the `OpenAPI` document.
//!
//! Flow Overview:
//! 1) Every request gets an `x-request-id` (ULID) and a tracing span.
//! 2) `/health`, `/swagger-ui` and `/api-docs/openapi.json` are public.
//! 3) Protected routes pass token -> rate limit -> policy before the handler.

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, debug_span, error, info};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::gate::{PolicyEnforcer, RateLimiter, TokenLifecycle};

pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod response;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Everything the gates need, shared by all requests.
#[derive(Debug, Clone)]
pub struct GateState {
    pub lifecycle: Arc<TokenLifecycle>,
    pub limiter: RateLimiter,
    pub enforcer: Arc<PolicyEnforcer>,
}

/// Build the application router.
#[must_use]
pub fn router(state: GateState) -> Router {
    // route_layer: the last one added runs first.
    let protected = Router::new()
        .route("/v1/me", get(handlers::me::me))
        .route("/v1/auth/logout", post(handlers::logout::logout))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::enforce_policy,
        ))
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .route_layer(from_fn_with_state(state.clone(), middleware::authenticate));

    Router::new()
        .route(
            "/health",
            get(handlers::health::health).options(handlers::health::health),
        )
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID_HEADER,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span)),
        )
        .with_state(state)
}

/// Serve `app` until SIGINT or SIGTERM, draining in-flight requests.
///
/// # Errors
/// Returns an error if the server fails
pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {err}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let path = request.uri().path();
    let method = request.method().as_str();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", method, path, request_id)
}
