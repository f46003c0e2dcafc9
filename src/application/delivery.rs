//! Serving artifacts by name, with regeneration on miss.
//!
//! A fetch either finds the file (fast path) or decodes the requested name
//! back into the request it was generated from and, when that request
//! authorized regeneration, transparently re-runs the pipeline. Tokens are
//! therefore self-healing: a bookmarked link keeps working after the file
//! it named was evicted, at the cost of a second rendering pass.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::application::codec::TokenCodec;
use crate::application::pipeline::GenerateService;
use crate::application::store::ArtifactStore;
use crate::util::naming::token_stem;

/// Result of a fetch-by-name call.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Artifact bytes, served either from the store or a fresh regeneration.
    Hit {
        bytes: Bytes,
        content_type: String,
    },
    /// The artifact is gone and could not be rebuilt.
    NotFound { fallback_url: Option<String> },
}

pub struct DeliveryService {
    store: Arc<ArtifactStore>,
    codec: TokenCodec,
    pipeline: Arc<GenerateService>,
    serve_ttl: Duration,
}

impl DeliveryService {
    pub fn new(
        store: Arc<ArtifactStore>,
        codec: TokenCodec,
        pipeline: Arc<GenerateService>,
        serve_ttl: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            pipeline,
            serve_ttl,
        }
    }

    /// Fetch an artifact by stored name. Never errors: every failure mode
    /// degrades to [`FetchOutcome::NotFound`].
    pub async fn fetch(&self, file_name: &str, fallback_url: Option<String>) -> FetchOutcome {
        match self.store.read(file_name).await {
            Ok(Some(bytes)) => {
                // Served once; reclaim the file quickly.
                self.store.schedule_removal(file_name, self.serve_ttl);
                FetchOutcome::Hit {
                    bytes,
                    content_type: content_type_for(file_name),
                }
            }
            Ok(None) => self.regenerate_or_fall_back(file_name, fallback_url).await,
            Err(err) => {
                warn!(
                    target: "veduta::delivery",
                    file = file_name,
                    error = %err,
                    "artifact read failed"
                );
                FetchOutcome::NotFound { fallback_url }
            }
        }
    }

    async fn regenerate_or_fall_back(
        &self,
        file_name: &str,
        fallback_url: Option<String>,
    ) -> FetchOutcome {
        let decoded = match self.codec.decode(token_stem(file_name)) {
            Ok(request) => request,
            Err(err) => {
                debug!(
                    target: "veduta::delivery",
                    file = file_name,
                    error = %err,
                    "requested name is not a decodable token"
                );
                return FetchOutcome::NotFound { fallback_url };
            }
        };

        // The caller's fallback wins over the one baked into the token.
        let fallback_url = fallback_url.or_else(|| decoded.fallback_url.clone());

        if !decoded.auto_regenerate || !decoded.source.is_renderable() {
            return FetchOutcome::NotFound { fallback_url };
        }

        metrics::counter!("veduta_regeneration_total").increment(1);
        match self.pipeline.generate(decoded).await {
            Ok(artifact) => match self.store.read(&artifact.file_name).await {
                Ok(Some(bytes)) => {
                    self.store.schedule_removal(&artifact.file_name, self.serve_ttl);
                    FetchOutcome::Hit {
                        bytes,
                        content_type: content_type_for(&artifact.file_name),
                    }
                }
                // The fresh file raced its own eviction timer; accepted.
                _ => FetchOutcome::NotFound { fallback_url },
            },
            Err(err) => {
                warn!(
                    target: "veduta::delivery",
                    file = file_name,
                    error = %err,
                    "regeneration failed"
                );
                FetchOutcome::NotFound { fallback_url }
            }
        }
    }
}

fn content_type_for(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .to_string()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::pool::{Backend, BackendLauncher, PoolError, Session, SessionPool};
    use crate::domain::request::{ImageOptions, RenderRequest, Source};
    use crate::domain::types::OutputType;

    struct StaticLauncher;

    #[async_trait]
    impl BackendLauncher for StaticLauncher {
        async fn launch(&self) -> Result<Arc<dyn Backend>, PoolError> {
            Ok(Arc::new(StaticBackend))
        }
    }

    struct StaticBackend;

    #[async_trait]
    impl Backend for StaticBackend {
        async fn open_session(&self, _source: &Source) -> Result<Box<dyn Session>, PoolError> {
            Ok(Box::new(StaticSession))
        }

        async fn shutdown(&self) {}
    }

    struct StaticSession;

    #[async_trait]
    impl Session for StaticSession {
        async fn capture_image(&mut self, _options: &ImageOptions) -> Result<Bytes, PoolError> {
            Ok(Bytes::from_static(b"regenerated-bytes"))
        }

        async fn capture_pdf(&mut self) -> Result<Bytes, PoolError> {
            Ok(Bytes::from_static(b"regenerated-pdf"))
        }

        async fn close(&mut self) {}
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(*b"0123456789abcdef0123456789abcdef")
    }

    fn fixture() -> (tempfile::TempDir, Arc<ArtifactStore>, DeliveryService) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().join("dump")).unwrap());
        let pool = SessionPool::new(Arc::new(StaticLauncher));
        let pipeline = Arc::new(GenerateService::new(
            pool,
            Arc::clone(&store),
            codec(),
            Duration::from_secs(30),
            Duration::from_secs(5),
            Duration::from_secs(5),
        ));
        let delivery = DeliveryService::new(
            Arc::clone(&store),
            codec(),
            pipeline,
            Duration::from_secs(30),
        );
        (dir, store, delivery)
    }

    fn request(auto_regenerate: bool) -> RenderRequest {
        RenderRequest::new(
            Some("https://example.com".into()),
            None,
            OutputType::Image,
            ImageOptions::default(),
            auto_regenerate,
            Some("https://example.com/sorry".into()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stored_artifacts_are_served_directly() {
        let (_dir, store, delivery) = fixture();
        store.put("anything.png", b"stored-bytes").await.unwrap();

        match delivery.fetch("anything.png", None).await {
            FetchOutcome::Hit {
                bytes,
                content_type,
            } => {
                assert_eq!(&bytes[..], b"stored-bytes");
                assert_eq!(content_type, "image/png");
            }
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbled_names_resolve_to_not_found() {
        let (_dir, _store, delivery) = fixture();
        let outcome = delivery
            .fetch("not-a-token.png", Some("https://example.com/back".into()))
            .await;
        match outcome {
            FetchOutcome::NotFound { fallback_url } => {
                assert_eq!(fallback_url.as_deref(), Some("https://example.com/back"));
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn misses_regenerate_when_authorized() {
        let (_dir, store, delivery) = fixture();
        let token = codec().encode(&request(true)).unwrap();

        match delivery.fetch(&format!("{token}.png"), None).await {
            FetchOutcome::Hit { bytes, .. } => assert_eq!(&bytes[..], b"regenerated-bytes"),
            other => panic!("expected regenerated hit, got {other:?}"),
        }

        // The regenerated artifact was stored under a fresh token.
        let entries = std::fs::read_dir(store.root()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn misses_fall_back_when_regeneration_is_not_authorized() {
        let (_dir, _store, delivery) = fixture();
        let token = codec().encode(&request(false)).unwrap();

        match delivery.fetch(&format!("{token}.png"), None).await {
            FetchOutcome::NotFound { fallback_url } => {
                // The fallback baked into the token is surfaced.
                assert_eq!(fallback_url.as_deref(), Some("https://example.com/sorry"));
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn markup_tokens_never_regenerate() {
        let (_dir, _store, delivery) = fixture();
        let markup = RenderRequest::new(
            None,
            Some("<h1>hi</h1>".into()),
            OutputType::Image,
            ImageOptions::default(),
            true,
            None,
        )
        .unwrap();
        let token = codec().encode(&markup).unwrap();

        assert!(matches!(
            delivery.fetch(&format!("{token}.png"), None).await,
            FetchOutcome::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn caller_fallback_wins_over_token_fallback() {
        let (_dir, _store, delivery) = fixture();
        let token = codec().encode(&request(false)).unwrap();

        match delivery
            .fetch(&format!("{token}.png"), Some("https://caller.example".into()))
            .await
        {
            FetchOutcome::NotFound { fallback_url } => {
                assert_eq!(fallback_url.as_deref(), Some("https://caller.example"));
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }
}
