//! Shared rendering-session pool.
//!
//! One expensive browser backend is shared by every in-flight generation
//! call. The backend is launched lazily when the first session opens and
//! torn down when the last session closes; both the launch decision and the
//! teardown decision are taken under a single lock, so a launch can never
//! race a teardown and concurrent opens always observe one backend.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::request::{ImageOptions, Source};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("rendering backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("content failed to load: {0}")]
    Load(String),
    #[error("no element matches selector `{0}`")]
    SelectorNotFound(String),
    #[error("capture failed: {0}")]
    Capture(String),
}

/// Starts the shared backend. Injected so the pool can be exercised with fakes.
#[async_trait]
pub trait BackendLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Backend>, PoolError>;
}

/// A running rendering backend shared by all active sessions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open an isolated session and load `source` into it.
    async fn open_session(&self, source: &Source) -> Result<Box<dyn Session>, PoolError>;

    /// Tear the backend down. Called exactly once, after the last session closed.
    async fn shutdown(&self);
}

/// An isolated rendering context, exclusively owned by one generation call.
#[async_trait]
pub trait Session: Send {
    async fn capture_image(&mut self, options: &ImageOptions) -> Result<Bytes, PoolError>;
    async fn capture_pdf(&mut self) -> Result<Bytes, PoolError>;
    async fn close(&mut self);
}

enum Slot {
    Stopped,
    Running {
        backend: Arc<dyn Backend>,
        active: usize,
    },
}

/// Reference-counted owner of the shared backend.
pub struct SessionPool {
    launcher: Arc<dyn BackendLauncher>,
    slot: Mutex<Slot>,
}

impl SessionPool {
    pub fn new(launcher: Arc<dyn BackendLauncher>) -> Arc<Self> {
        Arc::new(Self {
            launcher,
            slot: Mutex::new(Slot::Stopped),
        })
    }

    /// Open a session against the shared backend, launching it if stopped.
    ///
    /// The launch happens while the slot lock is held: concurrent opens wait
    /// here and then observe the launched backend instead of starting a
    /// second one. Once the claim is counted it is guarded until the lease
    /// takes ownership, so neither an open failure nor cancellation of this
    /// future mid-open can wedge the teardown.
    pub async fn open(self: &Arc<Self>, source: &Source) -> Result<LeasedSession, PoolError> {
        let backend = {
            let mut slot = self.slot.lock().await;
            match &mut *slot {
                Slot::Running { backend, active } => {
                    *active += 1;
                    Arc::clone(backend)
                }
                Slot::Stopped => {
                    let backend = self.launcher.launch().await?;
                    debug!(target: "veduta::pool", "backend started");
                    *slot = Slot::Running {
                        backend: Arc::clone(&backend),
                        active: 1,
                    };
                    backend
                }
            }
        };
        let mut claim = OpenClaim::new(Arc::clone(self));

        match backend.open_session(source).await {
            Ok(session) => {
                claim.disarm();
                Ok(LeasedSession {
                    pool: Arc::clone(self),
                    session: Some(session),
                })
            }
            Err(err) => {
                claim.disarm();
                self.release().await;
                Err(err)
            }
        }
    }

    /// Drop one session's claim on the backend; stop it when none remain.
    ///
    /// The shutdown runs while the slot lock is still held, so an open
    /// arriving mid-teardown waits and then relaunches from `Stopped`.
    async fn release(&self) {
        let mut slot = self.slot.lock().await;
        if let Slot::Running { backend, active } = &mut *slot {
            *active -= 1;
            if *active == 0 {
                let backend = Arc::clone(backend);
                *slot = Slot::Stopped;
                backend.shutdown().await;
                debug!(target: "veduta::pool", "backend stopped");
            }
        }
    }

    #[cfg(test)]
    async fn active_sessions(&self) -> Option<usize> {
        match &*self.slot.lock().await {
            Slot::Stopped => None,
            Slot::Running { active, .. } => Some(*active),
        }
    }
}

/// Holds a counted backend claim between the slot increment and the moment a
/// [`LeasedSession`] takes ownership of it. `open` awaits the backend while
/// this guard is armed; if the caller's future is dropped at that await (a
/// timeout cancelling the open), the claim is released from the guard's drop
/// instead of leaking.
struct OpenClaim {
    pool: Option<Arc<SessionPool>>,
}

impl OpenClaim {
    fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool: Some(pool) }
    }

    fn disarm(&mut self) {
        self.pool = None;
    }
}

impl Drop for OpenClaim {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            tokio::spawn(async move {
                pool.release().await;
            });
        }
    }
}

/// Scoped session lease; closing releases the backend claim on every path.
pub struct LeasedSession {
    pool: Arc<SessionPool>,
    session: Option<Box<dyn Session>>,
}

impl LeasedSession {
    pub async fn capture_image(&mut self, options: &ImageOptions) -> Result<Bytes, PoolError> {
        match self.session.as_mut() {
            Some(session) => session.capture_image(options).await,
            None => Err(PoolError::Capture("session already closed".into())),
        }
    }

    pub async fn capture_pdf(&mut self) -> Result<Bytes, PoolError> {
        match self.session.as_mut() {
            Some(session) => session.capture_pdf().await,
            None => Err(PoolError::Capture("session already closed".into())),
        }
    }

    /// Close the session and release its backend claim.
    pub async fn close(mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            self.pool.release().await;
        }
    }
}

impl Drop for LeasedSession {
    fn drop(&mut self) {
        // Fallback for early-return paths that skipped the explicit close;
        // the release must still happen or the count would leak.
        if let Some(mut session) = self.session.take() {
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                session.close().await;
                pool.release().await;
            });
        }
    }
}
