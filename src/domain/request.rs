//! Rendering request model and canonicalization.
//!
//! A [`RenderRequest`] is the normalized set of parameters a generation call
//! runs from, and the record the token codec encrypts into artifact names.
//! Canonicalization guarantees that logically equal requests serialize
//! identically: empty optional fields are dropped, image options are dropped
//! for PDF output, and literal-markup bodies are blanked before encoding.

use url::Url;

use super::error::DomainError;
use super::types::OutputType;

/// Where the rendered content comes from: a navigable address or raw markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url(String),
    Html(String),
}

impl Source {
    /// Whether the source still carries enough content to render from.
    ///
    /// A canonical markup source has a blanked body and cannot be re-rendered.
    pub fn is_renderable(&self) -> bool {
        match self {
            Source::Url(url) => !url.is_empty(),
            Source::Html(markup) => !markup.is_empty(),
        }
    }
}

/// Capture options honoured for image output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOptions {
    /// Confine the capture to the bounding box of the first matching element.
    pub selector: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Normalized rendering parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub source: Source,
    pub output: OutputType,
    pub image: ImageOptions,
    /// Whether a store miss may silently re-render this artifact.
    pub auto_regenerate: bool,
    /// Where to send the user when the artifact is gone and cannot be rebuilt.
    pub fallback_url: Option<String>,
}

impl RenderRequest {
    /// Build a request from loosely-typed endpoint parameters.
    ///
    /// Exactly one of `url` and `html` must carry content; blank values are
    /// treated as absent. URLs must use the http or https scheme.
    pub fn new(
        url: Option<String>,
        html: Option<String>,
        output: OutputType,
        image: ImageOptions,
        auto_regenerate: bool,
        fallback_url: Option<String>,
    ) -> Result<Self, DomainError> {
        let url = url.filter(|value| !value.trim().is_empty());
        let html = html.filter(|value| !value.trim().is_empty());

        let source = match (url, html) {
            (Some(_), Some(_)) => {
                return Err(DomainError::validation(
                    "`url` and `html` are mutually exclusive; provide exactly one",
                ));
            }
            (Some(url), None) => {
                validate_url(&url)?;
                Source::Url(url)
            }
            (None, Some(html)) => Source::Html(html),
            (None, None) => {
                return Err(DomainError::validation(
                    "a source is required; provide `url` or `html`",
                ));
            }
        };

        Ok(Self {
            source,
            output,
            image,
            auto_regenerate,
            fallback_url,
        })
    }

    /// Reduce the request to its canonical encoding form.
    pub fn canonical(&self) -> Self {
        let mut canonical = self.clone();

        canonical.fallback_url = canonical.fallback_url.filter(|value| !value.is_empty());
        canonical.image.selector = canonical.image.selector.filter(|value| !value.is_empty());

        if canonical.output == OutputType::Pdf {
            canonical.image = ImageOptions::default();
        }

        if let Source::Html(markup) = &mut canonical.source {
            // Raw markup is not economical to re-embed in a token and is not
            // guaranteed reproducible; blank it and never regenerate.
            markup.clear();
            canonical.auto_regenerate = false;
        }

        canonical
    }
}

fn validate_url(raw: &str) -> Result<(), DomainError> {
    let parsed = Url::parse(raw)
        .map_err(|err| DomainError::validation(format!("invalid url `{raw}`: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(DomainError::validation(format!(
            "unsupported url scheme `{scheme}`; expected http or https"
        ))),
    }
}
