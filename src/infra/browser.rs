//! Headless-Chromium adapter for the session pool.
//!
//! Implements the pool's launcher/backend/session traits over the
//! `headless_chrome` crate. All CDP calls are blocking, so each one runs
//! inside `tokio::task::spawn_blocking` with clones of the underlying
//! `Browser`/`Tab` handles.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::task;
use tracing::{debug, warn};

use crate::application::pool::{Backend, BackendLauncher, PoolError, Session};
use crate::domain::request::{ImageOptions, Source};

/// Launch settings for the shared browser process.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    browser_path: Option<PathBuf>,
    sandbox: bool,
    navigation_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(
        browser_path: Option<PathBuf>,
        sandbox: bool,
        navigation_timeout: Duration,
    ) -> Self {
        Self {
            browser_path,
            sandbox,
            navigation_timeout,
        }
    }
}

#[async_trait]
impl BackendLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn Backend>, PoolError> {
        let path = self.browser_path.clone();
        let sandbox = self.sandbox;

        let browser = task::spawn_blocking(move || {
            let options = LaunchOptions::default_builder()
                .headless(true)
                .sandbox(sandbox)
                .path(path)
                .build()
                .map_err(|err| PoolError::BackendUnavailable(err.to_string()))?;
            Browser::new(options).map_err(|err| PoolError::BackendUnavailable(err.to_string()))
        })
        .await
        .map_err(|err| PoolError::BackendUnavailable(err.to_string()))??;

        debug!(target: "veduta::browser", "chromium launched");
        Ok(Arc::new(ChromiumBackend {
            browser: Mutex::new(Some(browser)),
            navigation_timeout: self.navigation_timeout,
        }))
    }
}

struct ChromiumBackend {
    // Taken out on shutdown so the process teardown runs on a blocking thread.
    browser: Mutex<Option<Browser>>,
    navigation_timeout: Duration,
}

impl ChromiumBackend {
    fn browser(&self) -> Result<Browser, PoolError> {
        let slot = self
            .browser
            .lock()
            .map_err(|_| PoolError::BackendUnavailable("browser handle poisoned".into()))?;
        slot.clone()
            .ok_or_else(|| PoolError::BackendUnavailable("browser already shut down".into()))
    }
}

#[async_trait]
impl Backend for ChromiumBackend {
    async fn open_session(&self, source: &Source) -> Result<Box<dyn Session>, PoolError> {
        let browser = self.browser()?;
        let source = source.clone();
        let timeout = self.navigation_timeout;

        let tab = task::spawn_blocking(move || -> Result<Arc<Tab>, PoolError> {
            let tab = browser
                .new_tab()
                .map_err(|err| PoolError::BackendUnavailable(err.to_string()))?;
            tab.set_default_timeout(timeout);

            match source {
                Source::Url(url) => {
                    tab.navigate_to(&url).map_err(load_failure)?;
                    tab.wait_until_navigated().map_err(load_failure)?;
                }
                Source::Html(markup) => {
                    tab.navigate_to("about:blank").map_err(load_failure)?;
                    tab.wait_until_navigated().map_err(load_failure)?;
                    let literal = serde_json::to_string(&markup)
                        .map_err(|err| PoolError::Load(err.to_string()))?;
                    tab.evaluate(
                        &format!("document.open(); document.write({literal}); document.close();"),
                        false,
                    )
                    .map_err(load_failure)?;
                }
            }
            Ok(tab)
        })
        .await
        .map_err(|err| PoolError::Load(err.to_string()))??;

        Ok(Box::new(ChromiumSession { tab }))
    }

    async fn shutdown(&self) {
        let browser = match self.browser.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(browser) = browser {
            // Dropping the last Browser handle kills the child process.
            let _ = task::spawn_blocking(move || drop(browser)).await;
            debug!(target: "veduta::browser", "chromium closed");
        }
    }
}

struct ChromiumSession {
    tab: Arc<Tab>,
}

#[async_trait]
impl Session for ChromiumSession {
    async fn capture_image(&mut self, options: &ImageOptions) -> Result<Bytes, PoolError> {
        let tab = Arc::clone(&self.tab);
        let options = options.clone();

        let data = task::spawn_blocking(move || -> Result<Vec<u8>, PoolError> {
            if options.width.is_some() || options.height.is_some() {
                tab.set_bounds(Bounds::Normal {
                    left: None,
                    top: None,
                    width: options.width.map(f64::from),
                    height: options.height.map(f64::from),
                })
                .map_err(capture_failure)?;
            }

            match options.selector.as_deref() {
                Some(selector) => {
                    let element = tab
                        .wait_for_element(selector)
                        .map_err(|_| PoolError::SelectorNotFound(selector.to_string()))?;
                    element
                        .capture_screenshot(CaptureScreenshotFormatOption::Png)
                        .map_err(capture_failure)
                }
                None => tab
                    .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                    .map_err(capture_failure),
            }
        })
        .await
        .map_err(|err| PoolError::Capture(err.to_string()))??;

        Ok(Bytes::from(data))
    }

    async fn capture_pdf(&mut self) -> Result<Bytes, PoolError> {
        let tab = Arc::clone(&self.tab);
        let data = task::spawn_blocking(move || {
            tab.print_to_pdf(None)
                .map_err(|err| PoolError::Capture(err.to_string()))
        })
        .await
        .map_err(|err| PoolError::Capture(err.to_string()))??;

        Ok(Bytes::from(data))
    }

    async fn close(&mut self) {
        let tab = Arc::clone(&self.tab);
        match task::spawn_blocking(move || tab.close(true)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(target: "veduta::browser", error = %err, "tab close failed");
            }
            Err(err) => {
                warn!(target: "veduta::browser", error = %err, "tab close task failed");
            }
        }
    }
}

fn load_failure(err: impl std::fmt::Display) -> PoolError {
    PoolError::Load(err.to_string())
}

fn capture_failure(err: impl std::fmt::Display) -> PoolError {
    PoolError::Capture(err.to_string())
}
