//! Request filters run before the mutating handlers, in order:
//! rate limit, then API key check. Body validation happens in the
//! `UploadedFile` extractor.

use crate::{
    errors::{AppError, GatewayError},
    state::AppState,
};
use anyhow::Context as _;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    DefaultKeyedRateLimiter, Quota,
    clock::{Clock, DefaultClock},
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    time::Duration,
};
use tracing::warn;

/// Header carrying the shared-secret key.
pub const API_KEY_HEADER: &str = "api-key";

/// Token buckets keyed by client IP.
pub type Limiter = DefaultKeyedRateLimiter<IpAddr>;

/// Limiter allowing each client `requests` per `window`, all of them as a burst.
pub fn limiter(requests: u32, window: Duration) -> anyhow::Result<Limiter> {
    let burst = NonZeroU32::new(requests).context("rate limit must be greater than zero")?;
    let quota = Quota::with_period(window / requests)
        .context("rate limit window too short")?
        .allow_burst(burst);
    Ok(Limiter::keyed(quota))
}

/// Peer IP from the connection info. Servers started without connect info
/// put every request in one shared bucket.
fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let client = client_ip(&req);
    match state.limiter.check_key(&client) {
        Ok(()) => next.run(req).await,
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            warn!(%client, path = %req.uri().path(), retry_after = secs, "rate limited");
            AppError::too_many_requests(secs.max(1)).into_response()
        }
    }
}

/// Rejects requests without a valid `api-key` header and records the
/// resulting `Authorized` proof in the request extensions.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    let authorized = state
        .gateway
        .authorize(key)
        .map_err(GatewayError::from)?;
    req.extensions_mut().insert(authorized);
    Ok(next.run(req).await)
}
