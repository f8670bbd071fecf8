use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::ServiceDescriptor;

/// Last known state of one managed service.
///
/// `locked` and `active` are only authoritative while `online` is true; an
/// offline service keeps its stale values for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    #[serde(rename = "name")]
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub online: bool,
    pub locked: bool,
    pub active: bool,
    pub priority: i32,
    pub last_check: Option<DateTime<Utc>>,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ServiceStatus {
    pub fn new(desc: &ServiceDescriptor) -> Self {
        Self {
            id: desc.id.clone(),
            display_name: desc.display_name.clone(),
            base_url: desc.base_url.clone(),
            online: false,
            locked: false,
            active: false,
            priority: desc.priority,
            last_check: None,
            last_error: None,
        }
    }

    /// Online and not locked: counts against the single-unlocked rule.
    pub fn is_unlocked(&self) -> bool {
        self.online && !self.locked
    }

    /// Self-reports as producing output while unlocked.
    pub fn is_playing(&self) -> bool {
        self.online && self.active && !self.locked
    }
}

/// Everything guarded by the arbiter's lock.
#[derive(Debug, Clone, Default)]
pub struct ArbiterState {
    /// Keyed by identifier; iteration order is the identifier order.
    pub services: BTreeMap<String, ServiceStatus>,
    pub active: Option<String>,
}

impl ArbiterState {
    pub fn new<'a>(descriptors: impl IntoIterator<Item = &'a ServiceDescriptor>) -> Self {
        let services = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), ServiceStatus::new(d)))
            .collect();
        Self {
            services,
            active: None,
        }
    }

    /// Value copy of every status, ordered by priority then identifier.
    pub fn snapshot(&self) -> Vec<ServiceStatus> {
        let mut out: Vec<ServiceStatus> = self.services.values().cloned().collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Identifiers of online services other than `except`, optionally only
    /// those currently unlocked.
    pub fn online_peers(&self, except: &str, only_unlocked: bool) -> Vec<String> {
        self.services
            .values()
            .filter(|s| s.id != except && s.online && (!only_unlocked || !s.locked))
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn online_ids(&self) -> Vec<String> {
        self.services
            .values()
            .filter(|s| s.online)
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn unlocked_count(&self) -> usize {
        self.services.values().filter(|s| s.is_unlocked()).count()
    }

    pub fn online_count(&self) -> usize {
        self.services.values().filter(|s| s.online).count()
    }

    /// Bring `active` in line with freshly polled flags.
    ///
    /// A designation whose service stopped playing, went offline or got
    /// locked is dropped.  If some service is playing unlocked it becomes
    /// the active one; the current designation wins when it still
    /// qualifies, otherwise the first by priority then identifier.
    pub fn reconcile_active(&mut self) {
        let current_qualifies = self
            .active
            .as_deref()
            .and_then(|id| self.services.get(id))
            .is_some_and(ServiceStatus::is_playing);
        if current_qualifies {
            return;
        }
        self.active = None;

        if let Some(candidate) = self
            .services
            .values()
            .filter(|s| s.is_playing())
            .min_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)))
        {
            self.active = Some(candidate.id.clone());
        }
    }
}
