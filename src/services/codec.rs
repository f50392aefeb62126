//! Derivative naming.
//!
//! A derivative lives at `{stem}_{w=..&q=..}.{ext}` next to its original.
//! The name is the cache key: there is no other index.

use url::form_urlencoded;

/// Split `path` on its final `.` into `(stem, extension)`.
///
/// The split looks at the whole path, so `a.b/c` yields extension `b/c`,
/// which never names a raster format and therefore never transforms.
pub fn split_name_extension(path: &str) -> (&str, Option<&str>) {
    match path.rsplit_once('.') {
        Some((stem, extension)) => (stem, Some(extension)),
        None => (path, None),
    }
}

/// Build the derivative path for `(stem, extension, width, quality)`.
///
/// With neither `width` nor `quality` this returns the original's own name;
/// callers short-circuit before that happens.
pub fn derivative_name(
    stem: &str,
    extension: Option<&str>,
    width: Option<u32>,
    quality: Option<u8>,
) -> String {
    let mut suffix = form_urlencoded::Serializer::new(String::new());
    if let Some(width) = width {
        suffix.append_pair("w", &width.to_string());
    }
    if let Some(quality) = quality {
        suffix.append_pair("q", &quality.to_string());
    }
    let suffix = suffix.finish();

    let mut name = String::with_capacity(stem.len() + suffix.len() + 8);
    name.push_str(stem);
    if !suffix.is_empty() {
        name.push('_');
        name.push_str(&suffix);
    }
    if let Some(extension) = extension {
        name.push('.');
        name.push_str(extension);
    }
    name
}
