//! Defines the gateway's routes.
//!
//! ## Structure
//! - `GET    /`             : service banner
//! - `GET    /healthz`      : liveness
//! - `GET    /readyz`       : store readiness
//! - `GET    /{*filepath}`  : fetch, optional `w` / `q` transform
//! - `PUT    /{*filepath}`  : upload (rate limited, API key)
//! - `DELETE /{*filepath}`  : delete (rate limited, API key)
//!
//! The wildcard `*filepath` allows nested paths like `photos/2025/img.jpg`.
//! Static routes win over the wildcard, so objects named `healthz` or
//! `readyz` cannot be fetched.

use crate::{
    handlers::{
        health_handlers::{healthz, index, readyz},
        object_handlers::{delete_object, fetch_object, upload_object},
    },
    middleware::{rate_limit, require_api_key},
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    handler::Handler,
    middleware::from_fn_with_state,
    routing::get,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the router with its state and request filters applied.
///
/// Mutating handlers are wrapped so the rate limit runs first, then the API
/// key check, then body extraction.
pub fn routes(state: AppState) -> Router {
    let upload = upload_object
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(from_fn_with_state(state.clone(), require_api_key))
        .layer(from_fn_with_state(state.clone(), rate_limit));
    let delete = delete_object
        .layer(from_fn_with_state(state.clone(), require_api_key))
        .layer(from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/{*filepath}", get(fetch_object).put(upload).delete(delete))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
