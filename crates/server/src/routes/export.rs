use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use pageshot_core::Error;

use crate::error::ApiError;
use crate::offline::build_gallery;
use crate::pdf::{PdfImage, build_pdf};
use crate::state::AppState;

/// `GET /export/pdf`: every image of the current session, one per page.
pub async fn export_pdf(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let session = state.store.current().await;
    let images = state.store.list(&session).await?;
    if images.is_empty() {
        return Err(Error::InvalidInput(format!("session {session} has no images")).into());
    }

    let mut frames = Vec::with_capacity(images.len());
    for image in &images {
        let bytes = state.store.read_image(image).await?;
        match PdfImage::from_encoded(&bytes) {
            Ok(frame) => frames.push(frame),
            Err(e) => tracing::warn!(image = %image.image_id, "skipping image in export: {e}"),
        }
    }

    let pdf = build_pdf(&frames)?;
    tracing::info!(session = %session, pages = frames.len(), bytes = pdf.len(), "exported session pdf");

    let disposition = format!("attachment; filename=\"pageshot-{session}.pdf\"");
    Ok(([(header::CONTENT_TYPE, "application/pdf".to_string()), (header::CONTENT_DISPOSITION, disposition)], pdf)
        .into_response())
}

/// `GET /export/offline`: the current session as one self-contained HTML gallery.
pub async fn export_offline(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let session = state.store.current().await;
    let images = state.store.list(&session).await?;
    if images.is_empty() {
        return Err(Error::InvalidInput(format!("session {session} has no images")).into());
    }

    let mut embedded = Vec::with_capacity(images.len());
    for image in images {
        match state.store.read_image(&image).await {
            Ok(bytes) => embedded.push((image, bytes)),
            Err(e) => tracing::warn!(image = %image.image_id, "skipping image in offline export: {e}"),
        }
    }
    if embedded.is_empty() {
        return Err(Error::Store(format!("no readable images in session {session}")).into());
    }

    let html = build_gallery(&session, &embedded);
    tracing::info!(session = %session, images = embedded.len(), bytes = html.len(), "exported offline gallery");

    let disposition = format!("attachment; filename=\"pageshot-{session}.html\"");
    Ok((
        [(header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()), (header::CONTENT_DISPOSITION, disposition)],
        html,
    )
        .into_response())
}
