//! Static service registry built once from configuration.
//!
//! Each entry carries the protocol kind resolved at load time, so the
//! arbiter never re-matches identifiers on the hot path.

use crate::config::ServiceConfig;
use crate::protocol::ProtocolKind;

/// Immutable description of one managed device service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: String,
    pub display_name: String,
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Lower number = higher precedence.
    pub priority: i32,
    pub protocol: ProtocolKind,
}

impl ServiceDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        base_url: impl Into<String>,
        priority: i32,
    ) -> Self {
        let id = id.into();
        let protocol = ProtocolKind::for_service(&id);
        Self {
            display_name: display_name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            priority,
            protocol,
            id,
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolKind) -> Self {
        self.protocol = protocol;
        self
    }

    /// Join `path` (which must start with `/`) onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl From<&ServiceConfig> for ServiceDescriptor {
    fn from(cfg: &ServiceConfig) -> Self {
        let display_name = if cfg.display_name.is_empty() {
            cfg.name.clone()
        } else {
            cfg.display_name.clone()
        };
        let desc = ServiceDescriptor::new(&cfg.name, display_name, &cfg.base_url, cfg.priority);
        match cfg.protocol {
            Some(kind) => desc.with_protocol(kind),
            None => desc,
        }
    }
}

/// The full set of managed services, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    services: Vec<ServiceDescriptor>,
}

impl Registry {
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self { services }
    }

    pub fn from_config(services: &[ServiceConfig]) -> Self {
        Self::new(services.iter().map(ServiceDescriptor::from).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter()
    }

    pub fn get(&self, id: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }
}
