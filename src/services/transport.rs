//! How bytes move between client and store.
//!
//! Two strategies share the [`TransportStrategy`] contract:
//! - [`RedirectTransport`] answers fetches with a public or signed URL and
//!   never touches object bytes;
//! - [`ProxyTransport`] streams object bytes through the gateway, reading
//!   either straight from the store or through a server-side signed GET.
//!
//! Uploads and deletes follow the same switch: the signed variants delegate
//! them through write/delete signed URLs, the others call the store directly.

use crate::{
    config::TransportMode,
    errors::{GatewayError, GatewayResult},
    models::object::{ObjectInfo, ObjectPath},
    services::storage::{
        ObjectStorage, ObjectStream, SignedOperation, StoreError, WriteMode,
    },
};
use async_trait::async_trait;
use axum::http::header;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::{sync::Arc, time::Duration};
use tracing::debug;
use url::Url;

/// What the HTTP layer should send back for a fetch.
#[derive(Debug)]
pub enum Delivery {
    Redirect { location: Url, permanent: bool },
    Stream(ObjectStream),
}

#[async_trait]
pub trait TransportStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, path: &ObjectPath) -> GatewayResult<Delivery>;

    /// Create `path`. Existence has already been checked by the caller.
    async fn store(&self, path: &ObjectPath, bytes: Bytes, content_type: &str)
    -> GatewayResult<()>;

    async fn remove(&self, path: &ObjectPath) -> GatewayResult<()>;
}

/// Executes requests against store-issued signed URLs.
#[derive(Clone)]
pub struct SignedRequests {
    http: reqwest::Client,
    expiry: Duration,
}

impl SignedRequests {
    pub fn new(http: reqwest::Client, expiry: Duration) -> Self {
        Self { http, expiry }
    }

    async fn url(
        &self,
        store: &dyn ObjectStorage,
        path: &ObjectPath,
        operation: SignedOperation,
    ) -> GatewayResult<Url> {
        let signed = store.signed_url(path, operation, self.expiry).await?;
        debug!(%path, ?operation, expires_at = %signed.expires_at, "issued signed url");
        Ok(signed.url)
    }
}

fn check_status(path: &ObjectPath, status: reqwest::StatusCode) -> GatewayResult<()> {
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound(path.to_string()));
    }
    if !status.is_success() {
        return Err(StoreError::UpstreamStatus {
            path: path.to_string(),
            status: status.as_u16(),
        }
        .into());
    }
    Ok(())
}

/// Upload/delete path shared by both strategies.
#[derive(Clone)]
enum Mutations {
    Direct,
    Signed(SignedRequests),
}

impl Mutations {
    async fn store(
        &self,
        store: &dyn ObjectStorage,
        path: &ObjectPath,
        bytes: Bytes,
        content_type: &str,
    ) -> GatewayResult<()> {
        match self {
            Mutations::Direct => {
                store.write(path, bytes, content_type, WriteMode::Create).await?;
            }
            Mutations::Signed(signed) => {
                let url = signed.url(store, path, SignedOperation::Write).await?;
                let response = signed
                    .http
                    .put(url)
                    .header(header::CONTENT_TYPE, content_type)
                    .body(bytes)
                    .send()
                    .await
                    .map_err(StoreError::from)?;
                check_status(path, response.status())?;
            }
        }
        Ok(())
    }

    async fn remove(&self, store: &dyn ObjectStorage, path: &ObjectPath) -> GatewayResult<()> {
        match self {
            Mutations::Direct => store.delete(path).await?,
            Mutations::Signed(signed) => {
                let url = signed.url(store, path, SignedOperation::Delete).await?;
                let response = signed
                    .http
                    .delete(url)
                    .send()
                    .await
                    .map_err(StoreError::from)?;
                check_status(path, response.status())?;
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
enum Link {
    Public,
    Signed(Duration),
}

pub struct RedirectTransport {
    store: Arc<dyn ObjectStorage>,
    link: Link,
    mutations: Mutations,
}

impl RedirectTransport {
    /// Permanent redirects to public URLs; writes go straight to the store.
    pub fn public(store: Arc<dyn ObjectStorage>) -> Self {
        Self {
            store,
            link: Link::Public,
            mutations: Mutations::Direct,
        }
    }

    /// Temporary redirects to read-signed URLs; writes are delegated.
    pub fn signed(store: Arc<dyn ObjectStorage>, requests: SignedRequests) -> Self {
        Self {
            store,
            link: Link::Signed(requests.expiry),
            mutations: Mutations::Signed(requests),
        }
    }
}

#[async_trait]
impl TransportStrategy for RedirectTransport {
    fn name(&self) -> &'static str {
        match self.link {
            Link::Public => "redirect-public",
            Link::Signed(_) => "redirect-signed",
        }
    }

    async fn deliver(&self, path: &ObjectPath) -> GatewayResult<Delivery> {
        match self.link {
            Link::Public => {
                let location = self
                    .store
                    .public_url(path)
                    .ok_or(StoreError::PublicUrlUnavailable)?;
                Ok(Delivery::Redirect {
                    location,
                    permanent: true,
                })
            }
            Link::Signed(expiry) => {
                let signed = self
                    .store
                    .signed_url(path, SignedOperation::Read, expiry)
                    .await?;
                Ok(Delivery::Redirect {
                    location: signed.url,
                    permanent: false,
                })
            }
        }
    }

    async fn store(
        &self,
        path: &ObjectPath,
        bytes: Bytes,
        content_type: &str,
    ) -> GatewayResult<()> {
        self.mutations
            .store(self.store.as_ref(), path, bytes, content_type)
            .await
    }

    async fn remove(&self, path: &ObjectPath) -> GatewayResult<()> {
        self.mutations.remove(self.store.as_ref(), path).await
    }
}

pub struct ProxyTransport {
    store: Arc<dyn ObjectStorage>,
    mutations: Mutations,
}

impl ProxyTransport {
    /// Stream from the store's own read stream.
    pub fn direct(store: Arc<dyn ObjectStorage>) -> Self {
        Self {
            store,
            mutations: Mutations::Direct,
        }
    }

    /// Stream from a server-side GET of a read-signed URL.
    pub fn signed(store: Arc<dyn ObjectStorage>, requests: SignedRequests) -> Self {
        Self {
            store,
            mutations: Mutations::Signed(requests),
        }
    }

    async fn fetch_signed(
        &self,
        requests: &SignedRequests,
        path: &ObjectPath,
    ) -> GatewayResult<ObjectStream> {
        let url = requests
            .url(self.store.as_ref(), path, SignedOperation::Read)
            .await?;
        let response = requests
            .http
            .get(url)
            .send()
            .await
            .map_err(StoreError::from)?;
        check_status(path, response.status())?;

        let upstream_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = match upstream_type {
            Some(content_type) => content_type,
            None => self.store.metadata(path).await?.content_type,
        };

        let info = ObjectInfo {
            content_type,
            size: response.content_length(),
        };
        let body = response.bytes_stream().map_err(StoreError::from).boxed();
        Ok(ObjectStream { info, body })
    }
}

#[async_trait]
impl TransportStrategy for ProxyTransport {
    fn name(&self) -> &'static str {
        match self.mutations {
            Mutations::Direct => "proxy-direct",
            Mutations::Signed(_) => "proxy-signed",
        }
    }

    async fn deliver(&self, path: &ObjectPath) -> GatewayResult<Delivery> {
        let object = match &self.mutations {
            Mutations::Direct => self.store.read(path).await?,
            Mutations::Signed(requests) => self.fetch_signed(requests, path).await?,
        };
        Ok(Delivery::Stream(object))
    }

    async fn store(
        &self,
        path: &ObjectPath,
        bytes: Bytes,
        content_type: &str,
    ) -> GatewayResult<()> {
        self.mutations
            .store(self.store.as_ref(), path, bytes, content_type)
            .await
    }

    async fn remove(&self, path: &ObjectPath) -> GatewayResult<()> {
        self.mutations.remove(self.store.as_ref(), path).await
    }
}

/// Build the strategy selected at deployment time.
pub fn build_transport(
    mode: TransportMode,
    store: Arc<dyn ObjectStorage>,
    http: reqwest::Client,
    signed_url_expiry: Duration,
) -> Arc<dyn TransportStrategy> {
    let requests = SignedRequests::new(http, signed_url_expiry);
    match mode {
        TransportMode::RedirectPublic => Arc::new(RedirectTransport::public(store)),
        TransportMode::RedirectSigned => Arc::new(RedirectTransport::signed(store, requests)),
        TransportMode::ProxyDirect => Arc::new(ProxyTransport::direct(store)),
        TransportMode::ProxySigned => Arc::new(ProxyTransport::signed(store, requests)),
    }
}
