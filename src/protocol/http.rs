//! reqwest-backed [`DeviceTransport`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::{AdapterError, DeviceTransport, ProtocolKind, StatusReport};
use crate::registry::ServiceDescriptor;

/// Talks to device services over plain HTTP with a fixed per-call timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("i2s-arbiter/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeviceTransport for HttpTransport {
    async fn fetch_status(&self, service: &ServiceDescriptor) -> Result<StatusReport, AdapterError> {
        let url = service.url(service.protocol.status_path());
        let resp = self.client.get(&url).send().await.map_err(transport_error)?;
        let resp = expect_ok(resp).await?;
        let body = resp.bytes().await.map_err(transport_error)?;
        StatusReport::parse(service.protocol, &body)
    }

    async fn set_lock(&self, service: &ServiceDescriptor, locked: bool) -> Result<(), AdapterError> {
        let url = service.url(service.protocol.lock_path());
        let request = match service.protocol {
            ProtocolKind::PlayerApi if locked => self.client.post(&url),
            ProtocolKind::PlayerApi => self.client.delete(&url),
            ProtocolKind::LockApi | ProtocolKind::Generic => self
                .client
                .post(&url)
                .json(&serde_json::json!({ "locked": locked })),
        };

        let resp = request.send().await.map_err(transport_error)?;
        expect_ok(resp).await?;
        debug!(service = %service.id, locked, "lock call accepted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Anything but 200 is a rejection carrying the response body.
async fn expect_ok(resp: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    let status = resp.status();
    if status == StatusCode::OK {
        return Ok(resp);
    }
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| String::from("<unreadable>"));
    Err(AdapterError::Rejected {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

fn transport_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Transport(format!("timed out: {e}"))
    } else {
        AdapterError::Transport(e.to_string())
    }
}
