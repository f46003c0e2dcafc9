//! The generate endpoint: parameters in, artifact out.

use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

use crate::application::delivery::FetchOutcome;
use crate::application::error::AppError;
use crate::domain::request::{ImageOptions, RenderRequest};
use crate::domain::types::{OutputType, ResponseKind};
use crate::util::naming::{append_query_string, build_query_string};

use super::HttpState;

/// Wire shape shared by the query-string and JSON-body variants.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateParams {
    url: Option<String>,
    html: Option<String>,
    #[serde(rename = "type")]
    output: Option<String>,
    selector: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    auto_regenerate: Option<bool>,
    fallback_url: Option<String>,
    response_kind: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    success: bool,
    message: &'static str,
    resource_link: String,
    download_link: String,
}

pub async fn generate_query(
    State(state): State<HttpState>,
    Query(params): Query<GenerateParams>,
) -> Result<Response, AppError> {
    respond(state, params).await
}

pub async fn generate_json(
    State(state): State<HttpState>,
    Json(params): Json<GenerateParams>,
) -> Result<Response, AppError> {
    respond(state, params).await
}

async fn respond(state: HttpState, params: GenerateParams) -> Result<Response, AppError> {
    let output = match params.output.as_deref() {
        Some(raw) => raw.parse::<OutputType>()?,
        None => OutputType::default(),
    };
    let response_kind = match params.response_kind.as_deref() {
        Some(raw) => raw.parse::<ResponseKind>()?,
        None => ResponseKind::default(),
    };

    let request = RenderRequest::new(
        params.url,
        params.html,
        output,
        ImageOptions {
            selector: params.selector,
            width: params.width,
            height: params.height,
        },
        params.auto_regenerate.unwrap_or(true),
        params.fallback_url,
    )?;
    let fallback_url = request.fallback_url.clone();

    let artifact = state.generate.generate(request).await?;

    let query = build_query_string(&[("fallbackUrl", fallback_url.as_deref().unwrap_or(""))]);
    let resource_path = append_query_string(&format!("/resources/{}", artifact.file_name), &query);
    let download_path = append_query_string(&format!("/downloads/{}", artifact.file_name), &query);

    match response_kind {
        ResponseKind::Json => {
            let body = GenerateResponse {
                success: true,
                message: "File successfully generated!",
                resource_link: format!("{}{resource_path}", state.public_url),
                download_link: format!("{}{download_path}", state.public_url),
            };
            Ok(Json(body).into_response())
        }
        ResponseKind::Resource => Ok(Redirect::to(&resource_path).into_response()),
        ResponseKind::Download => Ok(Redirect::to(&download_path).into_response()),
        ResponseKind::Buffer => {
            match state.delivery.fetch(&artifact.file_name, fallback_url).await {
                FetchOutcome::Hit {
                    bytes,
                    content_type,
                } => Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response()),
                FetchOutcome::NotFound { .. } => Err(AppError::unexpected(
                    "freshly generated artifact disappeared before buffering",
                )),
            }
        }
    }
}
