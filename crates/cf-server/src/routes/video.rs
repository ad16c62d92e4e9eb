//! Video processing and download route handlers.
//!
//! Every processing route takes a multipart form, hands the uploads to the
//! [`VideoPipeline`](cf_pipeline::VideoPipeline) and answers with the name
//! under which the result can be downloaded.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;
use tokio_util::io::ReaderStream;

use cf_av::stages::{Position, TextOverlay};
use cf_av::AssetHandle;
use cf_core::Error;
use cf_pipeline::Upload;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Form fields carrying file content; everything else is read as text.
const FILE_FIELDS: &[&str] = &["video", "image", "videos"];

/// Successful processing response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedVideo {
    pub filename: String,
    pub download_url: String,
    pub file_size: u64,
    pub message: String,
}

impl ProcessedVideo {
    fn new(handle: &AssetHandle, message: &str) -> Self {
        Self {
            filename: handle.name().to_string(),
            download_url: format!("/api/video/download/{}", handle.name()),
            file_size: handle.byte_len().unwrap_or(0),
            message: message.to_string(),
        }
    }
}

/// A parsed multipart form.
#[derive(Debug, Default)]
struct Form {
    files: HashMap<String, Vec<Upload>>,
    fields: HashMap<String, String>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> cf_core::Result<Self> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| Error::validation(format!("invalid multipart body: {e}")))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if FILE_FIELDS.contains(&name.as_str()) {
                let filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::validation(format!("failed to read field '{name}': {e}")))?;
                form.files
                    .entry(name)
                    .or_default()
                    .push(Upload::new(bytes, filename));
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::validation(format!("failed to read field '{name}': {e}")))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    fn file(&mut self, name: &str) -> cf_core::Result<Upload> {
        self.files
            .get_mut(name)
            .and_then(|files| (!files.is_empty()).then(|| files.remove(0)))
            .ok_or_else(|| Error::validation(format!("missing file field '{name}'")))
    }

    fn files(&mut self, name: &str) -> Vec<Upload> {
        self.files.remove(name).unwrap_or_default()
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    fn required_text(&self, name: &str) -> cf_core::Result<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::validation(format!("missing field '{name}'")))
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str, default: T) -> cf_core::Result<T> {
        match self.text(name) {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::validation(format!("invalid value for '{name}': {raw:?}"))),
            None => Ok(default),
        }
    }
}

/// POST /api/video/add-text
pub async fn add_text(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    multipart: Multipart,
) -> Result<Json<ProcessedVideo>, AppError> {
    let result = async {
        let mut form = Form::read(multipart).await?;
        let video = form.file("video")?;
        let overlay = TextOverlay::new(
            form.required_text("text")?,
            Position::for_text(form.text("position")),
            form.parsed("fontSize", TextOverlay::DEFAULT_FONT_SIZE)?,
            form.text("color").unwrap_or(TextOverlay::DEFAULT_COLOR),
        )?;
        ctx.pipeline.add_text(video, &overlay).await
    }
    .await;

    respond(result, "Text added to video successfully", &request_id)
}

/// POST /api/video/add-image
pub async fn add_image(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    multipart: Multipart,
) -> Result<Json<ProcessedVideo>, AppError> {
    let result = async {
        let mut form = Form::read(multipart).await?;
        let video = form.file("video")?;
        let image = form.file("image")?;
        let position = Position::for_overlay(form.text("position"));
        ctx.pipeline.add_image(video, image, position).await
    }
    .await;

    respond(result, "Image added to video successfully", &request_id)
}

/// POST /api/video/change-speed
pub async fn change_speed(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    multipart: Multipart,
) -> Result<Json<ProcessedVideo>, AppError> {
    let result = async {
        let mut form = Form::read(multipart).await?;
        let video = form.file("video")?;
        let raw = form.required_text("speed")?;
        let speed: f64 = raw
            .trim()
            .parse()
            .map_err(|_| Error::validation(format!("invalid value for 'speed': {raw:?}")))?;
        ctx.pipeline.change_speed(video, speed).await
    }
    .await;

    respond(result, "Video speed changed successfully", &request_id)
}

/// POST /api/video/merge
pub async fn merge(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    multipart: Multipart,
) -> Result<Json<ProcessedVideo>, AppError> {
    let result = async {
        let mut form = Form::read(multipart).await?;
        let clips = form.files("videos");
        tracing::info!("Merge requested for {} videos", clips.len());
        ctx.pipeline.merge(clips).await
    }
    .await;

    respond(result, "Videos merged successfully", &request_id)
}

/// GET /api/video/download/{filename}
pub async fn download(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let fail = |e: Error| AppError::new(e).with_request_id(&request_id);

    let handle = ctx.pipeline.scratch().resolve(&filename).map_err(fail)?;
    let file = tokio::fs::File::open(handle.path())
        .await
        .map_err(|e| fail(e.into()))?;
    let len = file.metadata().await.map_err(|e| fail(e.into()))?.len();

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, handle.content_type().to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", handle.name()),
            ),
        ],
        body,
    )
        .into_response())
}

fn respond(
    result: cf_core::Result<AssetHandle>,
    message: &str,
    request_id: &RequestId,
) -> Result<Json<ProcessedVideo>, AppError> {
    match result {
        Ok(handle) => Ok(Json(ProcessedVideo::new(&handle, message))),
        Err(e) => Err(AppError::new(e).with_request_id(request_id)),
    }
}
