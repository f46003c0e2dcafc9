//! Application error taxonomy and HTTP error surface.

use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::application::pool::PoolError;
use crate::application::store::StoreError;
use crate::domain::error::DomainError;
use crate::infra::error::InfraError;

/// Diagnostic attached to error responses so the logging middleware can
/// report the full cause chain without leaking it to the client.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(DomainError::Validation { .. }) => StatusCode::BAD_REQUEST,
            AppError::Pool(PoolError::BackendUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Pool(
                PoolError::Load(_) | PoolError::SelectorNotFound(_) | PoolError::Capture(_),
            ) => StatusCode::BAD_REQUEST,
            AppError::Store(_) | AppError::Infra(_) | AppError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn presentation_message(&self) -> String {
        match self {
            AppError::Domain(err) => err.to_string(),
            AppError::Pool(err) => err.to_string(),
            AppError::Store(_) | AppError::Infra(_) | AppError::Unexpected(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct FailurePayload {
    success: bool,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let report = ErrorReport::from_error("application::error", status, &self);
        let payload = FailurePayload {
            success: false,
            message: self.presentation_message(),
        };
        let mut response = (status, Json(payload)).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = AppError::from(DomainError::validation("missing source"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn backend_unavailable_maps_to_service_unavailable() {
        let err = AppError::from(PoolError::BackendUnavailable("no chrome".into()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn internal_failures_hide_their_detail() {
        let err = AppError::unexpected("secret detail");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.presentation_message(), "Internal server error");
    }

    #[test]
    fn configuration_failures_are_internal_and_hidden() {
        let err = AppError::from(InfraError::configuration("bad secret key"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.presentation_message(), "Internal server error");
    }

    #[test]
    fn report_collects_the_cause_chain() {
        let io = std::io::Error::other("disk gone");
        let err = AppError::from(StoreError::from(io));
        let report =
            ErrorReport::from_error("test", StatusCode::INTERNAL_SERVER_ERROR, &err);
        assert!(report.messages.iter().any(|m| m.contains("disk gone")));
    }
}
