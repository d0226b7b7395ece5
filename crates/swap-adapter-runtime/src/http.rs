//! JSON-over-HTTP call shared by every adapter

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::{looks_like_oom, Result, RuntimeError};

/// POST `body` to `url` and decode the JSON reply
///
/// Non-2xx replies become `OutOfMemory` when the body reads like an
/// allocator failure and `Model` otherwise.
pub(crate) async fn post_json<B, R>(
    client: &Client,
    url: &str,
    body: &B,
    bearer: Option<&str>,
    transport_timeout: Duration,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    debug!("POST {}", url);
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            RuntimeError::Timeout(transport_timeout)
        } else if e.is_connect() {
            RuntimeError::Connection(format!("{}: {}", url, e))
        } else {
            RuntimeError::Http(e)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if looks_like_oom(&text) {
            return Err(RuntimeError::OutOfMemory(format!("{} - {}", status, text)));
        }
        return Err(RuntimeError::Model(format!("{} - {}", status, text)));
    }

    response
        .json::<R>()
        .await
        .map_err(|e| RuntimeError::InvalidResponse(format!("{}: {}", url, e)))
}
