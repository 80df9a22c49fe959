//! Request handlers.
//!
//! Handlers only translate between HTTP and the library: they read
//! multipart/JSON fields, build a request value, call one core operation and
//! shape the result. All conversion logic lives in [`crate::pipeline`].

use super::error::ApiError;
use super::AppState;
use crate::config::{Orientation, PageSizePolicy};
use crate::error::DocConvError;
use crate::pipeline::compose::{images_to_pdf, ImagesToPdfRequest};
use crate::pipeline::rasterize::PdfToImagesRequest;
use crate::pipeline::source::SourceRef;
use crate::pipeline::ConvertedOutput;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use exec_probe::Availability;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

// ── Upload ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub upload_id: String,
    pub index: String,
    pub size: usize,
}

/// Store one chunk.
///
/// # Multipart Fields
/// - `uploadId`: session id (optional; generated when absent)
/// - `index`: ordering key of this chunk (required)
/// - `chunk`: chunk bytes (required)
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkResponse>, ApiError> {
    let mut upload_id: Option<String> = None;
    let mut index: Option<String> = None;
    let mut chunk: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("uploadId") => upload_id = non_empty(field.text().await?),
            Some("index") => index = non_empty(field.text().await?),
            Some("chunk") => chunk = Some(field.bytes().await?.to_vec()),
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let index = index.ok_or_else(|| missing_field("index"))?;
    let chunk = chunk.ok_or_else(|| missing_field("chunk"))?;
    let upload_id = upload_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    state.chunks.put_chunk(&upload_id, &index, &chunk).await?;
    Ok(Json(ChunkResponse {
        upload_id,
        index,
        size: chunk.len(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembleBody {
    pub upload_id: String,
    pub filename: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembleResponse {
    pub registry_key: String,
    pub size: u64,
    pub chunk_count: usize,
}

/// Assemble an upload session into a registered artifact.
pub async fn assemble(
    State(state): State<AppState>,
    body: Result<Json<AssembleBody>, JsonRejection>,
) -> Result<Json<AssembleResponse>, ApiError> {
    let Json(body) = body?;
    let artifact = state
        .assembler
        .assemble(&body.upload_id, &body.filename)
        .await?;
    Ok(Json(AssembleResponse {
        registry_key: artifact.registry_key,
        size: artifact.size,
        chunk_count: artifact.chunk_count,
    }))
}

// ── Convert ──────────────────────────────────────────────────────────────

/// Compose images into a PDF.
///
/// # Multipart Fields
/// - `images`: image file, repeatable
/// - `tempKey`: registry key of an assembled image, repeatable; interleaves
///   with `images` in order of appearance
/// - `pageSize`: `auto` (default), `a4` or `letter`
/// - `orientation`: `portrait` (default) or `landscape`
/// - `margin`: points, ≥ 0 (default 0)
/// - `quality`: JPEG quality 1–100 (default 80)
/// - `outputName`: attachment name (default `converted.pdf`)
pub async fn images_to_pdf_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut request = ImagesToPdfRequest::new(Vec::new());

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("images") => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("image-{}", request.sources.len() + 1));
                let data = field.bytes().await?.to_vec();
                request.sources.push(SourceRef::upload(name, data));
            }
            Some("tempKey") => {
                if let Some(key) = non_empty(field.text().await?) {
                    request.sources.push(SourceRef::key(key));
                }
            }
            Some("pageSize") => request.page_size = field.text().await?.parse::<PageSizePolicy>()?,
            Some("orientation") => {
                request.orientation = field.text().await?.parse::<Orientation>()?
            }
            Some("margin") => {
                if let Some(raw) = non_empty(field.text().await?) {
                    request.margin = parse_number("margin", &raw)?;
                }
            }
            Some("quality") => {
                if let Some(raw) = non_empty(field.text().await?) {
                    // Parsed wide so 150 or -5 get the range message, not "not a number".
                    let quality: i64 = parse_number("quality", &raw)?;
                    request.quality = u8::try_from(quality).map_err(|_| {
                        DocConvError::Validation(format!("quality must be 1–100, got {quality}"))
                    })?;
                }
            }
            Some("outputName") => request.output_name = field.text().await?,
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let output = images_to_pdf(&state.registry, request).await?;
    attachment(output)
}

/// Rasterise a PDF into a ZIP of PNG pages.
///
/// # Multipart Fields
/// - `file`: the PDF, or
/// - `tempKey`: registry key of an assembled PDF
/// - `outputName`: attachment name (default `pages.zip`)
pub async fn pdf_to_images_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut file: Option<SourceRef> = None;
    let mut key: Option<String> = None;
    let mut output_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload.pdf").to_string();
                file = Some(SourceRef::upload(name, field.bytes().await?.to_vec()));
            }
            Some("tempKey") => key = non_empty(field.text().await?),
            Some("outputName") => output_name = Some(field.text().await?),
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let source = match (file, key) {
        (Some(file), _) => file,
        (None, Some(key)) => SourceRef::key(key),
        (None, None) => {
            return Err(DocConvError::Validation(
                "Provide a PDF as 'file' or a 'tempKey' from /api/upload/assemble".into(),
            )
            .into())
        }
    };

    let mut request = PdfToImagesRequest::new(source);
    if let Some(name) = output_name {
        request = request.output_name(name);
    }
    let output = state
        .rasterizer
        .pdf_to_images(&state.registry, request)
        .await?;
    attachment(output)
}

fn attachment(output: ConvertedOutput) -> Result<Response, ApiError> {
    info!(
        "Streaming '{}' ({}, {} page(s))",
        output.filename, output.content_type, output.page_count
    );
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        output.filename
    ))
    .map_err(|e| DocConvError::Internal(format!("invalid filename header: {e}")))?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(output.content_type),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(output.body),
    )
        .into_response())
}

// ── Hints & health ───────────────────────────────────────────────────────

pub async fn chunk_hint() -> Json<serde_json::Value> {
    hint("POST multipart/form-data with fields uploadId (optional), index and chunk")
}

pub async fn assemble_hint() -> Json<serde_json::Value> {
    hint("POST JSON {\"uploadId\": \"...\", \"filename\": \"...\"} after uploading all chunks")
}

pub async fn images_to_pdf_hint() -> Json<serde_json::Value> {
    hint(
        "POST multipart/form-data with images files and/or tempKey values, \
         plus optional pageSize, orientation, margin, quality and outputName",
    )
}

pub async fn pdf_to_images_hint() -> Json<serde_json::Value> {
    hint("POST multipart/form-data with a PDF as file (or a tempKey) and optional outputName")
}

fn hint(message: &str) -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "message": message }))
}

/// Liveness plus rasteriser availability.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let capability = state.rasterizer.capability();
    if capability.availability() == Availability::Unknown {
        capability.ensure().await;
    }
    let rasterizer = match capability.availability() {
        Availability::Available => "available",
        Availability::Unavailable => "unavailable",
        Availability::Unknown => "unknown",
    };
    Json(json!({ "status": "ok", "rasterizer": rasterizer }))
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn missing_field(name: &str) -> ApiError {
    DocConvError::Validation(format!("Missing multipart field '{name}'")).into()
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, DocConvError> {
    raw.parse::<T>()
        .map_err(|_| DocConvError::Validation(format!("{name} must be a number, got '{raw}'")))
}
