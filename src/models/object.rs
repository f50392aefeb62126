//! Represents objects (files) addressed inside the backing bucket.

use std::fmt;

use crate::errors::GatewayError;

pub const MAX_OBJECT_PATH_LEN: usize = 1024;

/// MIME types accepted by the upload endpoint.
pub const ALLOWED_UPLOAD_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/svg+xml",
    "application/pdf",
    "application/zip",
];

/// Content type used when neither the store nor the extension tells us better.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A slash-separated path identifying a blob in the bucket.
///
/// Construction validates the path so nothing built from it can escape the
/// bucket namespace: no leading slash, no empty, `.` or `..` segments, no
/// control characters or backslashes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Result<Self, GatewayError> {
        let path = path.into();
        if path.is_empty() {
            return Err(GatewayError::Validation("object path must not be empty".into()));
        }
        if path.len() > MAX_OBJECT_PATH_LEN {
            return Err(GatewayError::Validation(format!(
                "object path exceeds {MAX_OBJECT_PATH_LEN} bytes"
            )));
        }
        if path
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\')
        {
            return Err(GatewayError::Validation(
                "object path contains forbidden characters".into(),
            ));
        }
        if path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(GatewayError::Validation(format!(
                "object path `{path}` has an empty or relative segment"
            )));
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Metadata read alongside an object's bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Content type (MIME type) recorded when the object was written.
    pub content_type: String,

    /// Size in bytes, when the source reports it.
    pub size: Option<u64>,
}

/// Strip parameters (`; charset=...`) and normalise case of a MIME type.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_allowed_upload_type(content_type: &str) -> bool {
    let essence = essence(content_type);
    ALLOWED_UPLOAD_TYPES.contains(&essence.as_str())
}

/// Best-effort content type from a path's extension, for backends that cannot
/// persist content-type metadata.
pub fn content_type_for_path(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
