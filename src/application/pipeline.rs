//! Artifact generation pipeline.
//!
//! Orchestrates codec, pool and store: a request becomes a token, the token
//! names the output file, a pooled session renders the bytes, and the store
//! arms the post-generation eviction timer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::application::codec::TokenCodec;
use crate::application::error::AppError;
use crate::application::pool::{PoolError, SessionPool};
use crate::application::store::ArtifactStore;
use crate::domain::request::RenderRequest;
use crate::domain::types::OutputType;
use crate::util::naming::ensure_extension;

/// A freshly generated, stored artifact.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub token: String,
    pub file_name: String,
    pub path: PathBuf,
}

pub struct GenerateService {
    pool: Arc<SessionPool>,
    store: Arc<ArtifactStore>,
    codec: TokenCodec,
    generate_ttl: Duration,
    navigation_timeout: Duration,
    capture_timeout: Duration,
}

impl GenerateService {
    pub fn new(
        pool: Arc<SessionPool>,
        store: Arc<ArtifactStore>,
        codec: TokenCodec,
        generate_ttl: Duration,
        navigation_timeout: Duration,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            store,
            codec,
            generate_ttl,
            navigation_timeout,
            capture_timeout,
        }
    }

    /// Render the request into a stored artifact named by its token.
    ///
    /// The session is closed on every exit path once it has been opened;
    /// capture yields bytes, so a failed capture leaves no partial file.
    pub async fn generate(&self, request: RenderRequest) -> Result<GeneratedArtifact, AppError> {
        let request = request.canonical();
        let token = self
            .codec
            .encode(&request)
            .map_err(|err| AppError::unexpected(format!("token encoding failed: {err}")))?;
        let file_name = ensure_extension(&token, request.output.extension());

        let opened = tokio::time::timeout(self.navigation_timeout, self.pool.open(&request.source))
            .await;
        let mut session = match opened {
            Ok(result) => result?,
            Err(_) => {
                return Err(PoolError::Load(format!(
                    "load timed out after {}s",
                    self.navigation_timeout.as_secs()
                ))
                .into());
            }
        };

        let captured = tokio::time::timeout(self.capture_timeout, async {
            match request.output {
                OutputType::Image => session.capture_image(&request.image).await,
                OutputType::Pdf => session.capture_pdf().await,
            }
        })
        .await
        .unwrap_or_else(|_| {
            Err(PoolError::Capture(format!(
                "capture timed out after {}s",
                self.capture_timeout.as_secs()
            )))
        });

        session.close().await;

        let bytes = captured?;
        let path = self.store.put(&file_name, &bytes).await?;
        self.store.schedule_removal(&file_name, self.generate_ttl);

        metrics::counter!("veduta_artifacts_generated_total").increment(1);
        info!(
            target: "veduta::pipeline",
            file = file_name,
            size = bytes.len(),
            "artifact generated"
        );

        Ok(GeneratedArtifact {
            token,
            file_name,
            path,
        })
    }
}
