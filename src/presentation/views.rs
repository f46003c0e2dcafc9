//! HTML views for the small set of pages this service renders itself.

use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::application::error::ErrorReport;

#[derive(Debug, Error)]
#[error("template rendering failed")]
pub struct TemplateRenderError {
    #[source]
    error: AskamaError,
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, TemplateRenderError> {
    template
        .render()
        .map(Html)
        .map_err(|error| TemplateRenderError { error })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => {
            let mut response =
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
            ErrorReport::from_error(
                "presentation::views::render_template_response",
                StatusCode::INTERNAL_SERVER_ERROR,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

pub fn render_not_found_response() -> Response {
    let mut response = render_template_response(NotFoundTemplate {}, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Artifact not found and not regenerable",
    )
    .attach(&mut response);
    response
}

#[derive(Template)]
#[template(path = "not_found.html")]
pub struct NotFoundTemplate {}
