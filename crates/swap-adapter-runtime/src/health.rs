//! Health polling for serving endpoints

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::{Result, RuntimeError};

/// Health status of a serving endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Ready to serve requests
    Healthy,
    /// Reachable but still loading weights (HTTP 503)
    Starting,
    /// Unreachable or failing
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health checker for one endpoint
#[derive(Debug, Clone)]
pub struct HealthCheck {
    client: Client,
    url: String,
    interval: Duration,
}

impl HealthCheck {
    pub fn new(client: Client, base: &str, path: &str, interval: Duration) -> Self {
        Self {
            client,
            url: format!("{}{}", base.trim_end_matches('/'), path),
            interval,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One probe of the health endpoint
    pub async fn check(&self) -> HealthStatus {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => HealthStatus::Healthy,
            Ok(response) if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE => {
                HealthStatus::Starting
            }
            Ok(response) => HealthStatus::Unhealthy(format!("status {}", response.status())),
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        }
    }

    /// Poll until healthy, the deadline passes, or `alive` reports the
    /// serving process has gone away
    pub async fn wait_until_healthy<F>(&self, deadline: Duration, mut alive: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let started = Instant::now();
        loop {
            let status = self.check().await;
            if status.is_healthy() {
                debug!("{} healthy after {:?}", self.url, started.elapsed());
                return Ok(());
            }
            if !alive() {
                return Err(RuntimeError::Process(format!(
                    "serving process exited before {} became healthy",
                    self.url
                )));
            }
            if started.elapsed() >= deadline {
                return Err(RuntimeError::HealthCheck(format!(
                    "{} not healthy after {:?}: {:?}",
                    self.url, deadline, status
                )));
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
