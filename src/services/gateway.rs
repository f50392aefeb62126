//! The gateway facade: fetch, upload and delete.

use crate::{
    errors::{GatewayError, GatewayResult},
    models::{object::ObjectPath, transform::TransformRequest},
    services::{
        auth::{self, AuthError, Authorized, KeyValidator},
        resolver::DerivativeResolver,
        storage::ObjectStorage,
        transport::{Delivery, TransportStrategy},
    },
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// Composes resolver, transport strategy and auth check. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn ObjectStorage>,
    resolver: DerivativeResolver,
    transport: Arc<dyn TransportStrategy>,
    keys: Arc<dyn KeyValidator>,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn ObjectStorage>,
        transport: Arc<dyn TransportStrategy>,
        keys: Arc<dyn KeyValidator>,
    ) -> Self {
        Self {
            resolver: DerivativeResolver::new(store.clone()),
            store,
            transport,
            keys,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStorage> {
        &self.store
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn authorize(&self, key: Option<&str>) -> Result<Authorized, AuthError> {
        auth::authorize(self.keys.as_ref(), key)
    }

    pub async fn fetch(
        &self,
        path: &ObjectPath,
        transform: TransformRequest,
    ) -> GatewayResult<Delivery> {
        let resolved = self.resolver.resolve(path, transform).await?;
        debug!(%path, resolved = %resolved.path, from = ?resolved.from, "resolved fetch");
        self.transport.deliver(&resolved.path).await
    }

    /// Create-only upload; an existing object is never overwritten.
    pub async fn upload(
        &self,
        _auth: &Authorized,
        path: &ObjectPath,
        bytes: Bytes,
        content_type: &str,
    ) -> GatewayResult<()> {
        if self.store.exists(path).await? {
            return Err(GatewayError::Conflict(path.to_string()));
        }
        let size = bytes.len();
        self.transport.store(path, bytes, content_type).await?;
        info!(%path, size, content_type, "uploaded object");
        Ok(())
    }

    pub async fn delete(&self, _auth: &Authorized, path: &ObjectPath) -> GatewayResult<()> {
        if !self.store.exists(path).await? {
            return Err(GatewayError::NotFound(path.to_string()));
        }
        self.transport.remove(path).await?;
        info!(%path, "deleted object");
        Ok(())
    }
}
