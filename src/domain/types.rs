//! Shared enums for artifact formats and response shaping.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Artifact format produced by a generation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Image,
    Pdf,
}

impl OutputType {
    /// File extension appended to the artifact token.
    pub fn extension(self) -> &'static str {
        match self {
            OutputType::Image => "png",
            OutputType::Pdf => "pdf",
        }
    }
}

impl FromStr for OutputType {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "image" => Ok(OutputType::Image),
            "pdf" => Ok(OutputType::Pdf),
            other => Err(DomainError::validation(format!(
                "unrecognized type `{other}`; expected `image` or `pdf`"
            ))),
        }
    }
}

/// How the generate endpoint answers a successful call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseKind {
    /// JSON body carrying resource and download links.
    #[default]
    Json,
    /// Redirect to the inline resource path.
    Resource,
    /// Redirect to the attachment download path.
    Download,
    /// Artifact bytes inline in the response body.
    Buffer,
}

impl FromStr for ResponseKind {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "json" => Ok(ResponseKind::Json),
            "resource" => Ok(ResponseKind::Resource),
            "download" => Ok(ResponseKind::Download),
            "buffer" => Ok(ResponseKind::Buffer),
            other => Err(DomainError::validation(format!(
                "unrecognized responseKind `{other}`; expected `json`, `resource`, `download` or `buffer`"
            ))),
        }
    }
}
