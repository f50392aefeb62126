//! Shared test doubles.

use crate::{
    models::object::{ObjectInfo, ObjectPath},
    services::storage::{
        BucketStorage, ObjectStorage, ObjectStream, SignedOperation, SignedUrl, StoreError,
        StoreResult, WriteMode,
    },
};
use async_trait::async_trait;
use futures::stream;
use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path as UrlPath, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use object_store::{memory::InMemory, path::Path, signer::Signer};
use std::{
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::net::TcpListener;
use url::Url;

pub fn object_path(raw: &str) -> ObjectPath {
    ObjectPath::new(raw).unwrap()
}

pub fn memory_storage() -> BucketStorage {
    BucketStorage::new(Arc::new(InMemory::new()))
}

fn sample_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x * 7 + y * 3) % 256) as u8,
            ((x * 13) ^ (y * 5)) as u8,
            ((x * y) % 251) as u8,
        ])
    }))
}

fn encoded(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    encoded(sample_image(width, height), ImageFormat::Jpeg)
}

pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    encoded(sample_image(width, height), ImageFormat::Png)
}

/// Counts calls per operation on the wrapped store.
pub struct CountingStorage {
    inner: Arc<dyn ObjectStorage>,
    pub exists: AtomicUsize,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub deletes: AtomicUsize,
    pub signs: AtomicUsize,
}

impl CountingStorage {
    pub fn new(inner: Arc<dyn ObjectStorage>) -> Self {
        Self {
            inner,
            exists: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            signs: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.exists.load(Ordering::SeqCst)
            + self.reads()
            + self.writes()
            + self.deletes()
            + self.signs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for CountingStorage {
    async fn exists(&self, path: &ObjectPath) -> StoreResult<bool> {
        self.exists.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(path).await
    }

    async fn read(&self, path: &ObjectPath) -> StoreResult<ObjectStream> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(path).await
    }

    async fn metadata(&self, path: &ObjectPath) -> StoreResult<ObjectInfo> {
        self.inner.metadata(path).await
    }

    async fn write(
        &self,
        path: &ObjectPath,
        bytes: Bytes,
        content_type: &str,
        mode: WriteMode,
    ) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(path, bytes, content_type, mode).await
    }

    async fn delete(&self, path: &ObjectPath) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(path).await
    }

    async fn signed_url(
        &self,
        path: &ObjectPath,
        operation: SignedOperation,
        expires_in: Duration,
    ) -> StoreResult<SignedUrl> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        self.inner.signed_url(path, operation, expires_in).await
    }

    fn public_url(&self, path: &ObjectPath) -> Option<Url> {
        self.inner.public_url(path)
    }
}

/// Store that misbehaves on purpose. `unreachable` fails every call with a
/// backend error naming an internal host; `truncating` reports every object
/// present and breaks its read stream after the first chunk.
pub struct FaultyStorage {
    reachable: bool,
}

pub const FAULTY_HOST: &str = "internal-store.corp:8443";

impl FaultyStorage {
    pub fn unreachable() -> Self {
        Self { reachable: false }
    }

    pub fn truncating() -> Self {
        Self { reachable: true }
    }

    fn backend_error() -> StoreError {
        StoreError::Backend(object_store::Error::Generic {
            store: "faulty",
            source: format!("connection refused by {FAULTY_HOST}").into(),
        })
    }

    fn check(&self) -> StoreResult<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(Self::backend_error())
        }
    }
}

#[async_trait]
impl ObjectStorage for FaultyStorage {
    async fn exists(&self, _path: &ObjectPath) -> StoreResult<bool> {
        self.check()?;
        Ok(true)
    }

    async fn read(&self, path: &ObjectPath) -> StoreResult<ObjectStream> {
        self.check()?;
        let chunks: Vec<StoreResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"first chunk")),
            Err(Self::backend_error()),
        ];
        Ok(ObjectStream {
            info: self.metadata(path).await?,
            body: Box::pin(stream::iter(chunks)),
        })
    }

    async fn metadata(&self, _path: &ObjectPath) -> StoreResult<ObjectInfo> {
        self.check()?;
        Ok(ObjectInfo {
            content_type: "application/pdf".into(),
            size: None,
        })
    }

    async fn write(
        &self,
        _path: &ObjectPath,
        _bytes: Bytes,
        _content_type: &str,
        _mode: WriteMode,
    ) -> StoreResult<()> {
        Err(Self::backend_error())
    }

    async fn delete(&self, _path: &ObjectPath) -> StoreResult<()> {
        Err(Self::backend_error())
    }

    async fn signed_url(
        &self,
        _path: &ObjectPath,
        _operation: SignedOperation,
        _expires_in: Duration,
    ) -> StoreResult<SignedUrl> {
        Err(StoreError::SigningUnsupported)
    }

    fn public_url(&self, _path: &ObjectPath) -> Option<Url> {
        None
    }
}

/// Signs by appending the method and lifetime to `base/{path}`.
#[derive(Debug)]
pub struct LoopbackSigner {
    base: Url,
}

impl LoopbackSigner {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Signer for LoopbackSigner {
    async fn signed_url(
        &self,
        method: Method,
        path: &Path,
        expires_in: Duration,
    ) -> object_store::Result<Url> {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(path.as_ref().split('/'));
        }
        url.query_pairs_mut()
            .append_pair("method", method.as_str())
            .append_pair("expires", &expires_in.as_secs().to_string());
        Ok(url)
    }
}

/// Serves GET/PUT/DELETE for `/bucket/{*path}` out of `store`, standing in
/// for the bucket endpoint a signed URL points at. Returns the bucket base URL.
pub async fn spawn_upstream(store: Arc<dyn ObjectStorage>) -> Url {
    let app = Router::new()
        .route(
            "/bucket/{*path}",
            get(upstream_get).put(upstream_put).delete(upstream_delete),
        )
        .with_state(store);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/bucket")).unwrap()
}

fn upstream_status(err: StoreError) -> StatusCode {
    match err {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn upstream_get(
    State(store): State<Arc<dyn ObjectStorage>>,
    UrlPath(path): UrlPath<String>,
) -> Response {
    match store.read(&object_path(&path)).await {
        Ok(object) => (
            [(header::CONTENT_TYPE, object.info.content_type.clone())],
            Body::from_stream(object.body),
        )
            .into_response(),
        Err(err) => upstream_status(err).into_response(),
    }
}

async fn upstream_put(
    State(store): State<Arc<dyn ObjectStorage>>,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    match store
        .write(&object_path(&path), body, &content_type, WriteMode::Overwrite)
        .await
    {
        Ok(()) => StatusCode::OK,
        Err(err) => upstream_status(err),
    }
}

async fn upstream_delete(
    State(store): State<Arc<dyn ObjectStorage>>,
    UrlPath(path): UrlPath<String>,
) -> StatusCode {
    match store.delete(&object_path(&path)).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(err) => upstream_status(err),
    }
}
