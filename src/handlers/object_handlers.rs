//! HTTP handlers for fetch, upload and delete on `/{*filepath}`.
//! Fetch bodies are streamed from the transport without buffering.

use crate::{
    errors::{AppError, GatewayError},
    models::{
        object::{ObjectPath, essence, is_allowed_upload_type},
        transform::TransformRequest,
    },
    services::{auth::Authorized, transport::Delivery},
    state::AppState,
};
use axum::{
    Extension,
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;

/// Transform parameters of a fetch. Kept as strings so malformed values
/// surface as a validation error with our own message.
#[derive(Debug, Default, Deserialize)]
pub struct FetchQuery {
    pub w: Option<String>,
    pub q: Option<String>,
}

/// `GET /{*filepath}`
pub async fn fetch_object(
    State(state): State<AppState>,
    Path(filepath): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Result<Response, AppError> {
    let transform = TransformRequest::from_query(query.w.as_deref(), query.q.as_deref())?;
    let path = ObjectPath::new(filepath)?;

    let delivery = state.gateway.fetch(&path, transform).await?;
    Ok(delivery_response(delivery))
}

fn delivery_response(delivery: Delivery) -> Response {
    match delivery {
        Delivery::Redirect {
            location,
            permanent: true,
        } => Redirect::permanent(location.as_str()).into_response(),
        Delivery::Redirect { location, .. } => {
            Redirect::temporary(location.as_str()).into_response()
        }
        Delivery::Stream(object) => {
            let mut response = Response::new(Body::from_stream(object.body));
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&object.info.content_type) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            if let Some(size) = object.info.size {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            }
            response
        }
    }
}

/// `PUT /{*filepath}` (behind rate limit and API key check)
pub async fn upload_object(
    State(state): State<AppState>,
    Extension(auth): Extension<Authorized>,
    Path(filepath): Path<String>,
    file: UploadedFile,
) -> Result<StatusCode, AppError> {
    let path = ObjectPath::new(filepath)?;
    state
        .gateway
        .upload(&auth, &path, file.bytes, &file.content_type)
        .await?;
    Ok(StatusCode::OK)
}

/// `DELETE /{*filepath}` (behind rate limit and API key check)
pub async fn delete_object(
    State(state): State<AppState>,
    Extension(auth): Extension<Authorized>,
    Path(filepath): Path<String>,
) -> Result<StatusCode, AppError> {
    let path = ObjectPath::new(filepath)?;
    state.gateway.delete(&auth, &path).await?;
    Ok(StatusCode::OK)
}

/// An upload body that passed validation: non-empty, with an allowed type.
///
/// Accepts either a raw body described by `Content-Type`, or a
/// `multipart/form-data` body whose `file` field carries the upload.
#[derive(Debug)]
pub struct UploadedFile {
    pub bytes: Bytes,
    pub content_type: String,
}

impl<S> FromRequest<S> for UploadedFile
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let declared = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let file = if essence(&declared) == "multipart/form-data" {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|rej| AppError::new(rej.status(), rej.body_text()))?;
            file_field(multipart).await?
        } else {
            let bytes = Bytes::from_request(req, state)
                .await
                .map_err(|rej| AppError::new(rej.status(), rej.body_text()))?;
            Self {
                bytes,
                content_type: declared,
            }
        };

        if file.content_type.is_empty() {
            return Err(GatewayError::Validation("missing content type".into()).into());
        }
        if !is_allowed_upload_type(&file.content_type) {
            return Err(GatewayError::Validation(format!(
                "content type `{}` is not allowed",
                file.content_type
            ))
            .into());
        }
        if file.bytes.is_empty() {
            return Err(GatewayError::Validation("upload body is empty".into()).into());
        }
        Ok(file)
    }
}

async fn file_field(mut multipart: Multipart) -> Result<UploadedFile, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::new(err.status(), err.body_text()))?;
        return Ok(UploadedFile {
            bytes,
            content_type,
        });
    }
    Err(GatewayError::Validation("multipart body has no `file` field".into()).into())
}
