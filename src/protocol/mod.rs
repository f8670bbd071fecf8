//! Device protocol adapters.
//!
//! Provides the [`DeviceTransport`] trait through which the arbiter talks to
//! managed services, and the closed set of call conventions
//! ([`ProtocolKind`]) a service may speak.  No URL construction or payload
//! parsing leaks outside this module.

pub mod http;
pub mod status;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ServiceDescriptor;

pub use self::http::HttpTransport;
pub use self::status::StatusReport;

// ---------------------------------------------------------------------------
// Protocol kind
// ---------------------------------------------------------------------------

/// Lock/status call convention spoken by a device service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    /// USB media player: `GET /api/v1/player/status` (payload wrapped in
    /// `data`), `POST`/`DELETE /api/v1/lock`.
    PlayerApi,
    /// USB audio bridge: `GET /api/v1/status`, `POST /api/v1/lock` with a
    /// `{"locked": bool}` body.
    LockApi,
    /// Anything unrecognised.  Speaks the lock-api convention.
    Generic,
}

impl ProtocolKind {
    /// Resolve the convention from a service identifier.
    pub fn for_service(id: &str) -> Self {
        match id {
            "usboveri2s" => Self::PlayerApi,
            "usbaudio" => Self::LockApi,
            _ => Self::Generic,
        }
    }

    pub fn status_path(self) -> &'static str {
        match self {
            Self::PlayerApi => "/api/v1/player/status",
            Self::LockApi | Self::Generic => "/api/v1/status",
        }
    }

    pub fn lock_path(self) -> &'static str {
        "/api/v1/lock"
    }

    /// Whether status payloads may be wrapped as `{"success":..,"data":{..}}`.
    pub fn unwraps_data(self) -> bool {
        matches!(self, Self::PlayerApi)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a single downstream call.  Never retried inline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Connection failure, timeout, or unreadable body.
    #[error("request failed: {0}")]
    Transport(String),
    /// The device answered with something other than 200.
    #[error("device returned {status}: {body}")]
    Rejected { status: u16, body: String },
    /// 200 with a payload that is not a JSON object.
    #[error("malformed status payload: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over the wire calls made to a device service.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Fetch and interpret the service's current status.
    async fn fetch_status(&self, service: &ServiceDescriptor) -> Result<StatusReport, AdapterError>;

    /// Ask the service to enter (`true`) or leave (`false`) the locked state.
    async fn set_lock(&self, service: &ServiceDescriptor, locked: bool) -> Result<(), AdapterError>;
}
