//! Serving stored artifacts inline or as downloads.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;

use crate::application::delivery::FetchOutcome;
use crate::presentation::views::render_not_found_response;

use super::HttpState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchQuery {
    fallback_url: Option<String>,
}

pub async fn serve_resource(
    State(state): State<HttpState>,
    Path(name): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Response {
    match state.delivery.fetch(&name, query.fallback_url).await {
        FetchOutcome::Hit {
            bytes,
            content_type,
        } => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        FetchOutcome::NotFound { fallback_url } => not_found(fallback_url),
    }
}

pub async fn serve_download(
    State(state): State<HttpState>,
    Path(name): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Response {
    match state.delivery.fetch(&name, query.fallback_url).await {
        FetchOutcome::Hit {
            bytes,
            content_type,
        } => {
            // A short download name beats the full token.
            let extension = name.rsplit('.').next().unwrap_or("bin");
            (
                [
                    (header::CONTENT_TYPE, content_type),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"artifact.{extension}\""),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        FetchOutcome::NotFound { fallback_url } => not_found(fallback_url),
    }
}

fn not_found(fallback_url: Option<String>) -> Response {
    match fallback_url.filter(|url| !url.is_empty()) {
        Some(url) => Redirect::to(&url).into_response(),
        None => render_not_found_response(),
    }
}
