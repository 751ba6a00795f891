use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, header},
    response::{Html, Response},
    routing::get,
};
use gallery_core::{Bucket, ListOptions};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::{templates, upload};

pub struct AppState {
    pub bucket: Bucket,
    pub max_upload_bytes: u64,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index).post(upload_image))
        .route("/healthz", get(healthz))
        .route("/{*key}", get(serve_object))
        .with_state(state)
        // Uploads are capped by the streaming guard instead.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
}

async fn render_index(bucket: &Bucket) -> Result<Html<String>> {
    let keys: Vec<String> = bucket
        .list(ListOptions::new())
        .collect_all()
        .await?
        .into_iter()
        .map(|object| object.key)
        .collect();
    debug!(count = keys.len(), "rendering gallery");
    Ok(Html(templates::render_gallery(&keys)?))
}

async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>> {
    render_index(&state.bucket).await
}

async fn upload_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Html<String>> {
    upload::check_declared_length(&headers, state.max_upload_bytes)?;
    upload::store_upload(&state.bucket, &mut multipart, state.max_upload_bytes).await?;
    render_index(&state.bucket).await
}

async fn serve_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response> {
    let reader = state.bucket.open_reader(&key).await?;

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, gallery_core::content_type_for(&key));
    if let Some(length) = reader.content_length() {
        response = response.header(header::CONTENT_LENGTH, length);
    }
    response
        .body(Body::from_stream(reader.into_stream()))
        .map_err(|e| AppError::Internal(format!("building response for {key}: {e}")))
}

async fn healthz() -> &'static str {
    "ok"
}
