//! Derivative resolution.
//!
//! Decides which object satisfies a fetch: the original, a cached derivative,
//! or a derivative built on the spot from the original.

use crate::{
    errors::{GatewayError, GatewayResult},
    models::{
        object::{MAX_OBJECT_PATH_LEN, ObjectPath},
        transform::{RasterFormat, TransformRequest},
    },
    services::{
        codec::{derivative_name, split_name_extension},
        storage::{ObjectStorage, WriteMode},
        transcode::transcode,
    },
};
use anyhow::Context as _;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a resolved path came about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedFrom {
    /// No transform applies; the requested path itself.
    Original,
    /// The derivative already existed.
    CacheHit,
    /// The derivative was built and stored by this call.
    Built,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub path: ObjectPath,
    pub from: ResolvedFrom,
}

#[derive(Clone)]
pub struct DerivativeResolver {
    store: Arc<dyn ObjectStorage>,
}

impl DerivativeResolver {
    pub fn new(store: Arc<dyn ObjectStorage>) -> Self {
        Self { store }
    }

    /// Resolve `path` under `transform` to the object that should be served.
    ///
    /// Store calls run strictly in sequence. Concurrent misses on the same
    /// derivative each build and upload it; the last write wins. When the
    /// derivative name would exceed the path limit the original is served.
    pub async fn resolve(
        &self,
        path: &ObjectPath,
        transform: TransformRequest,
    ) -> GatewayResult<Resolved> {
        let (stem, extension) = split_name_extension(path.as_str());
        let format = extension.and_then(RasterFormat::from_extension);

        let format = match format {
            Some(format) if !transform.is_empty() => format,
            _ => return self.original(path).await,
        };

        let name = derivative_name(stem, extension, transform.width(), transform.quality());
        if name.len() > MAX_OBJECT_PATH_LEN {
            warn!(%path, len = name.len(), "derivative name too long, serving original");
            return self.original(path).await;
        }
        let derivative = ObjectPath::new(name)?;

        if self.store.exists(&derivative).await? {
            debug!(%path, %derivative, "derivative cache hit");
            return Ok(Resolved {
                path: derivative,
                from: ResolvedFrom::CacheHit,
            });
        }

        if !self.store.exists(path).await? {
            return Err(GatewayError::NotFound(path.to_string()));
        }

        let source = self.store.read_bytes(path).await?;
        let encoded = self.build(source, format, transform).await?;

        info!(
            %path,
            %derivative,
            width = ?transform.width(),
            quality = ?transform.quality(),
            size = encoded.len(),
            "built derivative"
        );
        self.store
            .write(
                &derivative,
                Bytes::from(encoded),
                format.content_type(),
                WriteMode::Overwrite,
            )
            .await?;

        Ok(Resolved {
            path: derivative,
            from: ResolvedFrom::Built,
        })
    }

    async fn original(&self, path: &ObjectPath) -> GatewayResult<Resolved> {
        if !self.store.exists(path).await? {
            return Err(GatewayError::NotFound(path.to_string()));
        }
        Ok(Resolved {
            path: path.clone(),
            from: ResolvedFrom::Original,
        })
    }

    async fn build(
        &self,
        source: Bytes,
        format: RasterFormat,
        transform: TransformRequest,
    ) -> GatewayResult<Vec<u8>> {
        let encoded = tokio::task::spawn_blocking(move || {
            transcode(&source, format, transform.width(), transform.quality())
        })
        .await
        .context("transcode task failed")??;
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::transcode::TransformError,
        testing::{CountingStorage, memory_storage, object_path, sample_jpeg, sample_png},
    };
    use image::{GenericImageView, ImageFormat};

    fn setup() -> (Arc<CountingStorage>, DerivativeResolver) {
        let counting = Arc::new(CountingStorage::new(Arc::new(memory_storage())));
        let resolver = DerivativeResolver::new(counting.clone());
        (counting, resolver)
    }

    async fn put(store: &CountingStorage, path: &str, bytes: Vec<u8>, content_type: &str) {
        store
            .write(&object_path(path), Bytes::from(bytes), content_type, WriteMode::Create)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn untransformed_request_serves_the_original() {
        let (store, resolver) = setup();
        put(&store, "photo.jpg", sample_jpeg(8, 8), "image/jpeg").await;

        let resolved = resolver
            .resolve(&object_path("photo.jpg"), TransformRequest::default())
            .await
            .unwrap();
        assert_eq!(resolved.path, object_path("photo.jpg"));
        assert_eq!(resolved.from, ResolvedFrom::Original);
    }

    #[tokio::test]
    async fn non_image_ignores_the_transform() {
        let (store, resolver) = setup();
        put(&store, "a.pdf", b"%PDF-1.4".to_vec(), "application/pdf").await;
        let writes_before = store.writes();

        let transform = TransformRequest::new(Some(200), None).unwrap();
        let resolved = resolver.resolve(&object_path("a.pdf"), transform).await.unwrap();
        assert_eq!(resolved.path, object_path("a.pdf"));
        assert_eq!(resolved.from, ResolvedFrom::Original);
        assert_eq!(store.reads(), 0);
        assert_eq!(store.writes(), writes_before);

        let err = resolver
            .resolve(&object_path("missing.pdf"), transform)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn extensionless_paths_pass_through() {
        let (store, resolver) = setup();
        put(&store, "docs/LICENSE", b"MIT".to_vec(), "application/zip").await;
        let transform = TransformRequest::new(Some(10), Some(10)).unwrap();
        let resolved = resolver
            .resolve(&object_path("docs/LICENSE"), transform)
            .await
            .unwrap();
        assert_eq!(resolved.from, ResolvedFrom::Original);
    }

    #[tokio::test]
    async fn miss_builds_once_then_hits() {
        let (store, resolver) = setup();
        put(&store, "photo.jpg", sample_jpeg(200, 100), "image/jpeg").await;
        let writes_before = store.writes();
        let transform = TransformRequest::new(Some(100), Some(80)).unwrap();

        let first = resolver.resolve(&object_path("photo.jpg"), transform).await.unwrap();
        assert_eq!(first.path, object_path("photo_w=100&q=80.jpg"));
        assert_eq!(first.from, ResolvedFrom::Built);
        assert_eq!(store.reads(), 1);
        assert_eq!(store.writes(), writes_before + 1);

        let built = store.read_bytes(&first.path).await.unwrap();
        assert_eq!(image::guess_format(&built).unwrap(), ImageFormat::Jpeg);
        assert_eq!(image::load_from_memory(&built).unwrap().dimensions(), (100, 50));
        let info = store.metadata(&first.path).await.unwrap();
        assert_eq!(info.content_type, "image/jpeg");

        let reads_before = store.reads();
        let second = resolver.resolve(&object_path("photo.jpg"), transform).await.unwrap();
        assert_eq!(second.path, first.path);
        assert_eq!(second.from, ResolvedFrom::CacheHit);
        assert_eq!(store.reads(), reads_before);
        assert_eq!(store.writes(), writes_before + 1);
    }

    #[tokio::test]
    async fn missing_original_never_produces_a_derivative() {
        let (store, resolver) = setup();
        let transform = TransformRequest::new(Some(50), None).unwrap();
        let err = resolver
            .resolve(&object_path("ghost.png"), transform)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(p) if p == "ghost.png"));
        assert_eq!(store.writes(), 0);
        assert!(!store.exists(&object_path("ghost_w=50.png")).await.unwrap());
    }

    #[tokio::test]
    async fn undecodable_original_is_a_transform_error() {
        let (store, resolver) = setup();
        put(&store, "broken.png", b"not a png".to_vec(), "image/png").await;
        let transform = TransformRequest::new(Some(50), None).unwrap();
        let err = resolver
            .resolve(&object_path("broken.png"), transform)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transform(TransformError::Decode(_))));
    }

    #[tokio::test]
    async fn jpg_and_jpeg_both_encode_as_jpeg() {
        let (store, resolver) = setup();
        put(&store, "a.jpeg", sample_jpeg(40, 40), "image/jpeg").await;
        let transform = TransformRequest::new(None, Some(50)).unwrap();
        let resolved = resolver.resolve(&object_path("a.jpeg"), transform).await.unwrap();
        assert_eq!(resolved.path, object_path("a_q=50.jpeg"));
        let info = store.metadata(&resolved.path).await.unwrap();
        assert_eq!(info.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn png_derivative_keeps_png() {
        let (store, resolver) = setup();
        put(&store, "icons/logo.PNG", sample_png(64, 32), "image/png").await;
        let transform = TransformRequest::new(Some(32), None).unwrap();
        let resolved = resolver
            .resolve(&object_path("icons/logo.PNG"), transform)
            .await
            .unwrap();
        assert_eq!(resolved.path, object_path("icons/logo_w=32.PNG"));
        let built = store.read_bytes(&resolved.path).await.unwrap();
        assert_eq!(image::guess_format(&built).unwrap(), ImageFormat::Png);
        assert_eq!(image::load_from_memory(&built).unwrap().dimensions(), (32, 16));
    }

    #[tokio::test]
    async fn overlong_derivative_name_serves_the_original() {
        let (store, resolver) = setup();
        let long = format!("{}.jpg", "a".repeat(MAX_OBJECT_PATH_LEN - 4));
        put(&store, &long, sample_jpeg(20, 20), "image/jpeg").await;
        let writes_before = store.writes();

        let transform = TransformRequest::new(Some(10), None).unwrap();
        let resolved = resolver.resolve(&object_path(&long), transform).await.unwrap();
        assert_eq!(resolved.path, object_path(&long));
        assert_eq!(resolved.from, ResolvedFrom::Original);
        assert_eq!(store.reads(), 0);
        assert_eq!(store.writes(), writes_before);

        let err = resolver
            .resolve(&object_path(&format!("{}.png", "b".repeat(1020))), transform)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_misses_both_resolve_to_the_derivative() {
        let (store, resolver) = setup();
        put(&store, "race.jpg", sample_jpeg(120, 60), "image/jpeg").await;
        let writes_before = store.writes();
        let transform = TransformRequest::new(Some(60), None).unwrap();
        let path = object_path("race.jpg");

        let (a, b) = tokio::join!(
            resolver.resolve(&path, transform),
            resolver.resolve(&path, transform)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.path, object_path("race_w=60.jpg"));
        assert_eq!(b.path, a.path);
        for resolved in [&a, &b] {
            assert!(matches!(resolved.from, ResolvedFrom::Built | ResolvedFrom::CacheHit));
        }
        let writes = store.writes() - writes_before;
        assert!((1..=2).contains(&writes), "{writes} writes");

        let built = store.read_bytes(&a.path).await.unwrap();
        assert_eq!(image::load_from_memory(&built).unwrap().dimensions(), (60, 30));
    }
}
