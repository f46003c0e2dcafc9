//! Self-describing artifact tokens.
//!
//! A token is `vdt_<iv>_<ciphertext>`: the canonical JSON form of a
//! [`RenderRequest`], encrypted with AES-256-CTR under the process key and
//! hex-encoded. The storage key therefore doubles as the only durable record
//! of how to reproduce an artifact; decoding it anywhere with the same key
//! reconstructs the request. The IV is randomized per encode, so tokens are
//! a regeneration mechanism, never a content address.

use aes::Aes256;
use cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::{ImageOptions, RenderRequest, Source};
use crate::domain::types::OutputType;

type Aes256Ctr = Ctr128BE<Aes256>;

pub const TOKEN_PREFIX: &str = "vdt";
const SEGMENT_SEPARATOR: char = '_';
const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("request did not serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("token prefix missing or unrecognized")]
    BadPrefix,
    #[error("token segment layout invalid")]
    BadLayout,
    #[error("token segment is not valid hex")]
    BadHex(#[from] hex::FromHexError),
    #[error("token payload does not deserialize")]
    BadPayload(#[from] serde_json::Error),
    #[error("token payload lacks a source")]
    MissingSource,
}

/// Encrypting codec between rendering requests and artifact tokens.
#[derive(Clone)]
pub struct TokenCodec {
    key: [u8; 32],
}

impl TokenCodec {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Canonicalize and encrypt a request into an artifact token.
    pub fn encode(&self, request: &RenderRequest) -> Result<String, EncodeError> {
        let wire = WireRequest::from(&request.canonical());
        let mut buffer = serde_json::to_vec(&wire)?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut cipher = Aes256Ctr::new(&self.key.into(), &iv.into());
        cipher.apply_keystream(&mut buffer);

        Ok(format!(
            "{TOKEN_PREFIX}{SEGMENT_SEPARATOR}{}{SEGMENT_SEPARATOR}{}",
            hex::encode(iv),
            hex::encode(buffer)
        ))
    }

    /// Decrypt a token back into the request it was encoded from.
    pub fn decode(&self, token: &str) -> Result<RenderRequest, DecodeError> {
        let mut segments = token.split(SEGMENT_SEPARATOR);

        match segments.next() {
            Some(TOKEN_PREFIX) => {}
            _ => return Err(DecodeError::BadPrefix),
        }
        let iv_hex = segments.next().ok_or(DecodeError::BadLayout)?;
        let ciphertext_hex = segments.next().ok_or(DecodeError::BadLayout)?;
        if segments.next().is_some() {
            return Err(DecodeError::BadLayout);
        }

        let iv: [u8; IV_LEN] = hex::decode(iv_hex)?
            .try_into()
            .map_err(|_| DecodeError::BadLayout)?;
        let mut buffer = hex::decode(ciphertext_hex)?;

        let mut cipher = Aes256Ctr::new(&self.key.into(), &iv.into());
        cipher.apply_keystream(&mut buffer);

        let wire: WireRequest = serde_json::from_slice(&buffer)?;
        RenderRequest::try_from(wire)
    }
}

/// Compact serialization record; optional fields are never encoded when empty.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
    #[serde(rename = "type")]
    output: OutputType,
    #[serde(skip_serializing_if = "Option::is_none")]
    selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    auto_regenerate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_url: Option<String>,
}

impl From<&RenderRequest> for WireRequest {
    fn from(request: &RenderRequest) -> Self {
        let (url, html) = match &request.source {
            Source::Url(url) => (Some(url.clone()), None),
            Source::Html(markup) => (None, Some(markup.clone())),
        };
        Self {
            url,
            html,
            output: request.output,
            selector: request.image.selector.clone(),
            width: request.image.width,
            height: request.image.height,
            auto_regenerate: request.auto_regenerate,
            fallback_url: request.fallback_url.clone(),
        }
    }
}

impl TryFrom<WireRequest> for RenderRequest {
    type Error = DecodeError;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let source = match (wire.url, wire.html) {
            (Some(url), _) => Source::Url(url),
            (None, Some(html)) => Source::Html(html),
            (None, None) => return Err(DecodeError::MissingSource),
        };
        Ok(RenderRequest {
            source,
            output: wire.output,
            image: ImageOptions {
                selector: wire.selector,
                width: wire.width,
                height: wire.height,
            },
            auto_regenerate: wire.auto_regenerate,
            fallback_url: wire.fallback_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(*b"0123456789abcdef0123456789abcdef")
    }

    fn url_request() -> RenderRequest {
        RenderRequest::new(
            Some("https://example.com/page".into()),
            None,
            OutputType::Image,
            ImageOptions {
                selector: Some("#main".into()),
                width: Some(1024),
                height: Some(768),
            },
            true,
            Some("https://example.com/fallback".into()),
        )
        .unwrap()
    }

    #[test]
    fn round_trip_is_exact_against_canonical_form() {
        let codec = codec();
        let request = url_request();
        let token = codec.encode(&request).unwrap();
        assert!(token.starts_with("vdt_"));
        assert_eq!(codec.decode(&token).unwrap(), request.canonical());
    }

    #[test]
    fn encoding_is_randomized_but_decodes_identically() {
        let codec = codec();
        let request = url_request();
        let first = codec.encode(&request).unwrap();
        let second = codec.encode(&request).unwrap();
        assert_ne!(first, second);
        assert_eq!(codec.decode(&first).unwrap(), codec.decode(&second).unwrap());
    }

    #[test]
    fn empty_optionals_encode_like_absent_ones() {
        let codec = codec();
        let mut padded = url_request();
        padded.image.selector = Some(String::new());
        padded.fallback_url = Some(String::new());

        let mut bare = url_request();
        bare.image.selector = None;
        bare.fallback_url = None;

        let decoded_padded = codec.decode(&codec.encode(&padded).unwrap()).unwrap();
        let decoded_bare = codec.decode(&codec.encode(&bare).unwrap()).unwrap();
        assert_eq!(decoded_padded, decoded_bare);
    }

    #[test]
    fn markup_tokens_carry_no_body_and_never_regenerate() {
        let codec = codec();
        let request = RenderRequest::new(
            None,
            Some("<h1>hello</h1>".into()),
            OutputType::Pdf,
            ImageOptions::default(),
            true,
            None,
        )
        .unwrap();

        let decoded = codec.decode(&codec.encode(&request).unwrap()).unwrap();
        assert_eq!(decoded.source, Source::Html(String::new()));
        assert!(!decoded.auto_regenerate);
    }

    #[test]
    fn rejects_foreign_and_malformed_tokens() {
        let codec = codec();
        assert!(matches!(
            codec.decode("abc_00_11"),
            Err(DecodeError::BadPrefix)
        ));
        assert!(matches!(codec.decode("vdt_0011"), Err(DecodeError::BadLayout)));
        assert!(matches!(
            codec.decode("vdt_00_11_22"),
            Err(DecodeError::BadLayout)
        ));
        assert!(matches!(
            codec.decode("vdt_zz_11"),
            Err(DecodeError::BadHex(_))
        ));
        // Valid hex but an IV of the wrong length.
        assert!(matches!(
            codec.decode("vdt_0011_2233"),
            Err(DecodeError::BadLayout)
        ));
    }

    #[test]
    fn decoding_with_a_different_key_fails() {
        let token = codec().encode(&url_request()).unwrap();
        let other = TokenCodec::new(*b"fedcba9876543210fedcba9876543210");
        assert!(other.decode(&token).is_err());
    }
}
