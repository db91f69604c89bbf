use std::path::Path as FsPath;

use axum::{
    body::Body,
    extract::{Extension, Path},
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::error::ApiError;
use crate::services::images::is_stored_file_name;
use crate::state::AppState;

pub fn uploads_router(state: AppState) -> Router {
    Router::new()
        .route("/uploads/:file", get(serve_upload))
        .layer(Extension(state))
}

pub async fn serve_upload(
    Path(file_name): Path<String>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_stored_file_name(&file_name) {
        return Err(ApiError::NotFound("Not found".to_owned()));
    }

    let path = FsPath::new(&state.config.uploads.dir).join(&file_name);
    let file = tokio::fs::File::open(&path).await.map_err(|err| {
        warn!(path = %path.display(), "Upload not readable: {err}");
        ApiError::NotFound("Not found".to_owned())
    })?;

    let content_type = mime_guess::from_path(&path)
        .first_raw()
        .unwrap_or("application/octet-stream");

    let body = Body::from_stream(ReaderStream::new(file));

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("inline"),
    );

    Ok((headers, body))
}
