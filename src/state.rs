//! Shared router state.

use crate::{middleware::Limiter, services::gateway::Gateway};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub limiter: Arc<Limiter>,
    pub max_upload_bytes: usize,
}
