//! Decision oracle backed by an HTTP sidecar.
//!
//! Each decision is one `POST` of the [`DecisionInput`] as JSON; the
//! sidecar answers with a [`Decision`]. Calls are made from the worker's
//! blocking thread by driving the async `reqwest` client on the runtime
//! handle captured at construction.

use std::time::Duration;

use tokio::runtime::Handle;
use tracing::debug;

use crate::config::OracleConfig;
use crate::driver::DecisionOracle;
use crate::models::action::{Decision, DecisionInput};
use crate::{AppError, Result};

/// HTTP implementation of [`DecisionOracle`].
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    runtime: Handle,
}

impl HttpOracle {
    /// Create an oracle client for `config`.
    ///
    /// Must be called from within a tokio runtime; the handle is kept so
    /// that blocking callers can drive requests later.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no runtime is active.
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|err| AppError::Config(format!("http oracle needs a tokio runtime: {err}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            runtime,
        })
    }
}

impl DecisionOracle for HttpOracle {
    fn decide(&self, input: &DecisionInput) -> Result<Decision> {
        debug!(step = input.step, endpoint = %self.endpoint, "consulting http oracle");
        let request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(input);

        let decision = self
            .runtime
            .block_on(async move {
                request
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<Decision>()
                    .await
            })
            .map_err(|err| AppError::Oracle(format!("decision request failed: {err}")))?;

        if decision.confidence > 10 {
            return Err(AppError::Oracle(format!(
                "confidence {} outside 0-10",
                decision.confidence
            )));
        }

        Ok(decision)
    }
}
