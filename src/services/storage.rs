//! Object store client adapter.
//!
//! `ObjectStorage` is the capability the gateway core needs from a remote blob
//! store: existence check, streamed read, write, delete, metadata read and
//! time-limited signed URLs. `BucketStorage` implements it over the
//! `object_store` crate for Google Cloud Storage, Amazon S3 and a local
//! directory. Existence is never cached; every call goes to the store.

use crate::{
    config::{StoreBackend, StoreSettings},
    models::object::{ObjectInfo, ObjectPath, content_type_for_path},
};
use anyhow::Context as _;
use async_trait::async_trait;
use axum::http::Method;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use object_store::{
    Attribute, Attributes, GetOptions, ObjectStore, PutMode, PutOptions, PutPayload,
    aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, local::LocalFileSystem, path::Path,
    signer::Signer,
};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{path}` not found")]
    NotFound { path: String },
    #[error("object `{path}` already exists")]
    AlreadyExists { path: String },
    #[error("store cannot issue signed urls")]
    SigningUnsupported,
    #[error("no public url configured for the store")]
    PublicUrlUnavailable,
    #[error("signed url for `{path}` answered with status {status}")]
    UpstreamStatus { path: String, status: u16 },
    #[error("signed url expiry out of range: {0}")]
    InvalidExpiry(String),
    #[error(transparent)]
    Backend(object_store::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl StoreError {
    /// Classify a backend error for `path`, lifting not-found / already-exists.
    pub fn from_backend(path: &ObjectPath, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                path: path.to_string(),
            },
            object_store::Error::AlreadyExists { .. } => StoreError::AlreadyExists {
                path: path.to_string(),
            },
            other => StoreError::Backend(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// An object's metadata plus its bytes as a stream of chunks.
pub struct ObjectStream {
    pub info: ObjectInfo,
    pub body: BoxStream<'static, StoreResult<Bytes>>,
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Whether a write may replace an existing object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Overwrite,
}

/// The operation a signed URL grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignedOperation {
    Read,
    Write,
    Delete,
}

impl SignedOperation {
    fn method(self) -> Method {
        match self {
            SignedOperation::Read => Method::GET,
            SignedOperation::Write => Method::PUT,
            SignedOperation::Delete => Method::DELETE,
        }
    }
}

/// A store-issued URL granting one operation until `expires_at`.
#[derive(Clone, Debug)]
pub struct SignedUrl {
    pub url: Url,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn exists(&self, path: &ObjectPath) -> StoreResult<bool>;

    async fn read(&self, path: &ObjectPath) -> StoreResult<ObjectStream>;

    /// Read the whole object into memory. Only for objects that must be
    /// decoded as a unit.
    async fn read_bytes(&self, path: &ObjectPath) -> StoreResult<Bytes> {
        let mut object = self.read(path).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = object.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    async fn metadata(&self, path: &ObjectPath) -> StoreResult<ObjectInfo>;

    async fn write(
        &self,
        path: &ObjectPath,
        bytes: Bytes,
        content_type: &str,
        mode: WriteMode,
    ) -> StoreResult<()>;

    async fn delete(&self, path: &ObjectPath) -> StoreResult<()>;

    async fn signed_url(
        &self,
        path: &ObjectPath,
        operation: SignedOperation,
        expires_in: Duration,
    ) -> StoreResult<SignedUrl>;

    fn public_url(&self, path: &ObjectPath) -> Option<Url>;
}

/// `ObjectStorage` over one bucket of an `object_store` backend.
#[derive(Clone)]
pub struct BucketStorage {
    inner: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    public_base: Option<Url>,
    stores_attributes: bool,
    conditional_create: bool,
}

impl BucketStorage {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            signer: None,
            public_base: None,
            stores_attributes: true,
            conditional_create: true,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_public_base(mut self, base: Url) -> Self {
        self.public_base = Some(base);
        self
    }

    /// Backends that reject content-type attributes; the type is then
    /// inferred from the path on read.
    pub fn without_attributes(mut self) -> Self {
        self.stores_attributes = false;
        self
    }

    /// Backends without conditional create; create-only writes then rely on
    /// the caller's prior existence check.
    pub fn without_conditional_create(mut self) -> Self {
        self.conditional_create = false;
        self
    }

    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    pub fn has_public_base(&self) -> bool {
        self.public_base.is_some()
    }

    /// Build the configured backend.
    pub fn from_settings(settings: &StoreSettings) -> anyhow::Result<Self> {
        match settings.backend {
            StoreBackend::Gcs => {
                let bucket = settings
                    .bucket
                    .as_deref()
                    .context("BUCKET_NAME is required for the gcs backend")?;
                let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
                if let Some(credentials) = &settings.credentials {
                    builder = builder.with_service_account_path(credentials);
                }
                let gcs = Arc::new(
                    builder
                        .build()
                        .context("building Google Cloud Storage client")?,
                );
                let public_base = match &settings.public_base_url {
                    Some(url) => url.clone(),
                    None => Url::parse(&format!("https://storage.googleapis.com/{bucket}"))?,
                };
                Ok(Self::new(gcs.clone())
                    .with_signer(gcs)
                    .with_public_base(public_base))
            }
            StoreBackend::S3 => {
                let bucket = settings
                    .bucket
                    .as_deref()
                    .context("BUCKET_NAME is required for the s3 backend")?;
                let s3 = Arc::new(
                    AmazonS3Builder::from_env()
                        .with_bucket_name(bucket)
                        .build()
                        .context("building S3 client")?,
                );
                let public_base = match &settings.public_base_url {
                    Some(url) => url.clone(),
                    None => Url::parse(&format!("https://{bucket}.s3.amazonaws.com"))?,
                };
                Ok(Self::new(s3.clone())
                    .with_signer(s3)
                    .with_public_base(public_base)
                    .without_conditional_create())
            }
            StoreBackend::Local => {
                std::fs::create_dir_all(&settings.storage_dir).with_context(|| {
                    format!("creating storage directory {}", settings.storage_dir)
                })?;
                let local = LocalFileSystem::new_with_prefix(&settings.storage_dir)
                    .context("opening local storage directory")?;
                let storage = Self::new(Arc::new(local)).without_attributes();
                Ok(match &settings.public_base_url {
                    Some(url) => storage.with_public_base(url.clone()),
                    None => storage,
                })
            }
        }
    }

    fn content_type_from(&self, path: &ObjectPath, attributes: &Attributes) -> String {
        attributes
            .get(&Attribute::ContentType)
            .map(|value| {
                let value: &str = value.as_ref();
                value.to_string()
            })
            .unwrap_or_else(|| content_type_for_path(path.as_str()).to_string())
    }
}

fn location(path: &ObjectPath) -> Path {
    Path::from(path.as_str())
}

#[async_trait]
impl ObjectStorage for BucketStorage {
    async fn exists(&self, path: &ObjectPath) -> StoreResult<bool> {
        match self.inner.head(&location(path)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(StoreError::from_backend(path, err)),
        }
    }

    async fn read(&self, path: &ObjectPath) -> StoreResult<ObjectStream> {
        let result = self
            .inner
            .get(&location(path))
            .await
            .map_err(|err| StoreError::from_backend(path, err))?;

        let info = ObjectInfo {
            content_type: self.content_type_from(path, &result.attributes),
            size: Some(result.meta.size as u64),
        };
        let body = result.into_stream().map_err(StoreError::Backend).boxed();

        Ok(ObjectStream { info, body })
    }

    async fn metadata(&self, path: &ObjectPath) -> StoreResult<ObjectInfo> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .inner
            .get_opts(&location(path), options)
            .await
            .map_err(|err| StoreError::from_backend(path, err))?;

        Ok(ObjectInfo {
            content_type: self.content_type_from(path, &result.attributes),
            size: Some(result.meta.size as u64),
        })
    }

    async fn write(
        &self,
        path: &ObjectPath,
        bytes: Bytes,
        content_type: &str,
        mode: WriteMode,
    ) -> StoreResult<()> {
        let mut attributes = Attributes::new();
        if self.stores_attributes {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        let mode = match mode {
            WriteMode::Create if self.conditional_create => PutMode::Create,
            _ => PutMode::Overwrite,
        };
        let options = PutOptions {
            mode,
            attributes,
            ..Default::default()
        };

        let size = bytes.len();
        self.inner
            .put_opts(&location(path), PutPayload::from(bytes), options)
            .await
            .map_err(|err| StoreError::from_backend(path, err))?;
        debug!(%path, size, "wrote object");
        Ok(())
    }

    async fn delete(&self, path: &ObjectPath) -> StoreResult<()> {
        self.inner
            .delete(&location(path))
            .await
            .map_err(|err| StoreError::from_backend(path, err))?;
        debug!(%path, "deleted object");
        Ok(())
    }

    async fn signed_url(
        &self,
        path: &ObjectPath,
        operation: SignedOperation,
        expires_in: Duration,
    ) -> StoreResult<SignedUrl> {
        let signer = self.signer.as_ref().ok_or(StoreError::SigningUnsupported)?;
        let ttl = chrono::Duration::from_std(expires_in)
            .map_err(|err| StoreError::InvalidExpiry(err.to_string()))?;
        let expires_at = Utc::now() + ttl;

        let url = signer
            .signed_url(operation.method(), &location(path), expires_in)
            .await
            .map_err(|err| StoreError::from_backend(path, err))?;

        Ok(SignedUrl { url, expires_at })
    }

    fn public_url(&self, path: &ObjectPath) -> Option<Url> {
        let mut url = self.public_base.clone()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(path.as_str().split('/'));
        Some(url)
    }
}
