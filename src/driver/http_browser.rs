//! Browser resource backed by an HTTP automation sidecar.
//!
//! ## Protocol
//!
//! All paths are relative to the configured endpoint:
//!
//! ```text
//! POST   /sessions                      {"session_id", "options"}  -> 200
//! GET    /sessions/{id}/perception      -> Perception
//! GET    /sessions/{id}/frame           -> {"ack_id", "data" (base64), "url"}
//! POST   /sessions/{id}/frame/ack       {"ack_id"}
//! POST   /sessions/{id}/action          Action -> ActionOutcome
//! POST   /sessions/{id}/input           ViewerInput
//! GET    /sessions/{id}/url             -> {"url"}
//! DELETE /sessions/{id}
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::config::BrowserConfig;
use crate::driver::{BrowserResource, ResourceLauncher};
use crate::models::action::{Action, ActionOutcome, Perception, ViewerInput};
use crate::models::frame::CapturedFrame;
use crate::models::session::BehaviorOptions;
use crate::{AppError, Result};

#[derive(Debug, Serialize)]
struct LaunchBody<'a> {
    session_id: &'a str,
    options: &'a BehaviorOptions,
}

#[derive(Debug, Deserialize)]
struct FrameBody {
    ack_id: u64,
    data: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct AckBody {
    ack_id: u64,
}

#[derive(Debug, Deserialize)]
struct UrlBody {
    url: String,
}

/// Shared blocking HTTP plumbing for launcher and resource.
#[derive(Clone)]
struct Sidecar {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
    runtime: Handle,
}

impl Sidecar {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base.trim_end_matches('/'))
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.client.get(self.url(path)).timeout(self.timeout);
        self.runtime
            .block_on(async move { request.send().await?.error_for_status()?.json::<T>().await })
            .map_err(|err| AppError::Resource(format!("GET {path} failed: {err}")))
    }

    fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let request = self.client.post(self.url(path)).timeout(self.timeout).json(body);
        self.runtime
            .block_on(async move { request.send().await?.error_for_status()?.json::<T>().await })
            .map_err(|err| AppError::Resource(format!("POST {path} failed: {err}")))
    }

    fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let request = self.client.post(self.url(path)).timeout(self.timeout).json(body);
        self.runtime
            .block_on(async move { request.send().await?.error_for_status().map(|_| ()) })
            .map_err(|err| AppError::Resource(format!("POST {path} failed: {err}")))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let request = self.client.delete(self.url(path)).timeout(self.timeout);
        self.runtime
            .block_on(async move { request.send().await?.error_for_status().map(|_| ()) })
            .map_err(|err| AppError::Resource(format!("DELETE {path} failed: {err}")))
    }
}

/// Launches [`HttpBrowser`] resources on the sidecar.
pub struct HttpBrowserLauncher {
    sidecar: Sidecar,
}

impl HttpBrowserLauncher {
    /// Create a launcher for `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no tokio runtime is active.
    pub fn new(config: &BrowserConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|err| AppError::Config(format!("http browser needs a tokio runtime: {err}")))?;
        Ok(Self {
            sidecar: Sidecar {
                client: reqwest::Client::new(),
                base: config.endpoint.clone(),
                timeout: Duration::from_secs(config.timeout_seconds),
                runtime,
            },
        })
    }
}

impl ResourceLauncher for HttpBrowserLauncher {
    fn launch(
        &self,
        session_id: &str,
        options: &BehaviorOptions,
    ) -> Result<Arc<dyn BrowserResource>> {
        self.sidecar.post_unit(
            "/sessions",
            &LaunchBody {
                session_id,
                options,
            },
        )?;
        info!(session_id, headless = options.headless, "browser launched on sidecar");
        Ok(Arc::new(HttpBrowser {
            sidecar: self.sidecar.clone(),
            prefix: format!("/sessions/{session_id}"),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One sidecar-hosted browser page.
pub struct HttpBrowser {
    sidecar: Sidecar,
    prefix: String,
    closed: AtomicBool,
}

impl HttpBrowser {
    fn path(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.prefix)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(AppError::Resource("browser already closed".into()))
        } else {
            Ok(())
        }
    }
}

impl BrowserResource for HttpBrowser {
    fn perceive(&self) -> Result<Perception> {
        self.ensure_open()?;
        self.sidecar.get(&self.path("/perception"))
    }

    fn capture_frame(&self) -> Result<CapturedFrame> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Streaming("browser closed".into()));
        }
        let body: FrameBody = self
            .sidecar
            .get(&self.path("/frame"))
            .map_err(|err| AppError::Streaming(err.to_string()))?;
        let data = STANDARD
            .decode(body.data.as_bytes())
            .map_err(|err| AppError::Streaming(format!("frame is not base64: {err}")))?;
        Ok(CapturedFrame {
            ack_id: body.ack_id,
            data: Bytes::from(data),
            url: body.url,
        })
    }

    fn acknowledge_frame(&self, ack_id: u64) -> Result<()> {
        self.sidecar
            .post_unit(&self.path("/frame/ack"), &AckBody { ack_id })
    }

    fn apply_action(&self, action: &Action) -> Result<ActionOutcome> {
        self.ensure_open()?;
        self.sidecar.post(&self.path("/action"), action)
    }

    fn apply_input(&self, input: &ViewerInput) -> Result<()> {
        self.ensure_open()?;
        self.sidecar.post_unit(&self.path("/input"), input)
    }

    fn current_url(&self) -> Result<String> {
        self.ensure_open()?;
        let body: UrlBody = self.sidecar.get(&self.path("/url"))?;
        Ok(body.url)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.sidecar.delete(&self.prefix) {
            warn!(%err, "sidecar browser teardown failed");
            return Err(err);
        }
        Ok(())
    }
}
