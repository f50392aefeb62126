//! Health & readiness handlers.
//!
//! - GET /        -> service banner
//! - GET /healthz -> simple liveness ("ok")
//! - GET /readyz  -> readiness that checks the object store answers

use crate::{models::object::ObjectPath, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use uuid::Uuid;

/// `GET /`
pub async fn index(State(state): State<AppState>) -> impl IntoResponse {
    Json(IndexResponse {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        transport: state.gateway.transport_name(),
    })
}

/// `GET /healthz`
///
/// Liveness probe, always 200. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Asks the store whether a random probe object exists. Any answer, yes or
/// no, means the store is reachable: 200. A store error gives 503; its
/// details are logged, never returned.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let probe = format!(".readyz-{}", Uuid::new_v4());
    let reachable = match ObjectPath::new(probe) {
        Ok(path) => match state.gateway.store().exists(&path).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(error = %err, "readiness probe failed");
                false
            }
        },
        Err(err) => {
            tracing::error!(error = %err, "readiness probe path rejected");
            false
        }
    };
    let check = CheckStatus {
        ok: reachable,
        error: (!reachable).then_some("store unreachable"),
    };

    let status = if check.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if check.ok { "ok".into() } else { "error".into() },
        store: check,
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct IndexResponse {
    service: &'static str,
    version: &'static str,
    transport: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    store: CheckStatus,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<&'static str>,
}
