//! Arbitration engine.
//!
//! Owns the per-service status map and the active-service designation,
//! runs the poll loop, and keeps at most one online service unlocked.
//!
//! Every mutation, including the poll cycle, holds the exclusive side of a
//! single [`RwLock`] for its whole duration, downstream calls included.
//! Reads take the shared side and never touch the network.  Per-call
//! timeouts in the transport bound how long the lock can be held.
//!
//! Failures come in two tiers:
//! - [`Arbiter::apply_lock`] is the critical path and returns its error.
//! - [`Arbiter::lock_best_effort`] logs and moves on; it returns a count,
//!   never a `Result`, so it cannot be `?`-propagated by accident.

mod enforce;
mod error;
mod poller;
mod state;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::metrics::Metrics;
use crate::protocol::DeviceTransport;
use crate::registry::Registry;

pub use self::error::ArbiterError;
pub use self::state::{ArbiterState, ServiceStatus};

use self::poller::Poller;

pub struct Arbiter {
    registry: Registry,
    transport: Arc<dyn DeviceTransport>,
    state: RwLock<ArbiterState>,
    metrics: Arc<Metrics>,
    poller: Mutex<Option<Poller>>,
}

impl Arbiter {
    pub fn new(registry: Registry, transport: Arc<dyn DeviceTransport>, metrics: Arc<Metrics>) -> Self {
        let state = ArbiterState::new(registry.iter());
        Self {
            registry,
            transport,
            state: RwLock::new(state),
            metrics,
            poller: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Point-in-time copy of every service status.
    pub async fn list_statuses(&self) -> Vec<ServiceStatus> {
        self.state.read().await.snapshot()
    }

    pub async fn status(&self, id: &str) -> Result<ServiceStatus, ArbiterError> {
        self.state
            .read()
            .await
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| ArbiterError::NotFound(id.to_string()))
    }

    pub async fn active_service(&self) -> Option<String> {
        self.state.read().await.active.clone()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Lock every other online service, then unlock `id` and make it active.
    ///
    /// Peers that cannot be locked are logged and skipped.  Only the unlock
    /// of the target itself can fail the operation.
    #[instrument(skip(self))]
    pub async fn activate(&self, id: &str) -> Result<(), ArbiterError> {
        let mut state = self.state.write().await;

        let target = state
            .services
            .get(id)
            .ok_or_else(|| ArbiterError::NotFound(id.to_string()))?;
        if !target.online {
            return Err(ArbiterError::ServiceOffline(id.to_string()));
        }

        info!(service = %id, "activating service");

        let peers = state.online_peers(id, false);
        self.lock_best_effort(&mut state, &peers).await;

        self.apply_lock(&mut state, id, false).await?;
        state.active = Some(id.to_string());

        info!(service = %id, "service activated");
        Ok(())
    }

    /// Lock or unlock a single service.
    ///
    /// Unlocking first locks every other online unlocked service so the
    /// single-unlocked rule holds before the target opens up.
    #[instrument(skip(self))]
    pub async fn set_lock(&self, id: &str, locked: bool) -> Result<(), ArbiterError> {
        let mut state = self.state.write().await;

        if !state.services.contains_key(id) {
            return Err(ArbiterError::NotFound(id.to_string()));
        }

        if !locked {
            let peers = state.online_peers(id, true);
            self.lock_best_effort(&mut state, &peers).await;
        }

        self.apply_lock(&mut state, id, locked).await
    }

    /// Lock every online service and clear the active designation.
    ///
    /// Keeps going past individual failures; the last one is reported.
    #[instrument(skip(self))]
    pub async fn deactivate_all(&self) -> Result<(), ArbiterError> {
        let mut state = self.state.write().await;

        info!("deactivating all services");

        let mut failed = 0;
        let mut last_error = None;
        for id in state.online_ids() {
            if let Err(e) = self.apply_lock(&mut state, &id, true).await {
                warn!(service = %id, error = %e, "failed to lock service");
                failed += 1;
                last_error = Some(e);
            }
        }

        state.active = None;

        match last_error {
            None => Ok(()),
            Some(e) => Err(ArbiterError::PartialFailure {
                failed,
                last: e.to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    /// Start the background poll loop.  Ignored if already running.
    pub async fn start_polling(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.poller.lock().await;
        if slot.is_some() {
            warn!("service monitoring already running");
            return;
        }
        *slot = Some(Poller::spawn(Arc::clone(self), interval));
        info!(interval_ms = interval.as_millis() as u64, "service monitoring started");
    }

    /// Stop the poll loop, waiting for an in-flight cycle to finish.
    pub async fn stop_polling(&self) {
        let poller = self.poller.lock().await.take();
        match poller {
            Some(poller) => {
                poller.stop().await;
                info!("service monitoring stopped");
            }
            None => debug!("service monitoring not running"),
        }
    }

    /// One poll cycle: refresh every service, update the active designation,
    /// then enforce the single-unlocked rule.
    pub async fn poll_once(&self) {
        let mut state = self.state.write().await;

        for desc in self.registry.iter() {
            let result = self.transport.fetch_status(desc).await;
            let Some(status) = state.services.get_mut(&desc.id) else {
                continue;
            };
            status.last_check = Some(Utc::now());

            match result {
                Ok(report) => {
                    if !status.online {
                        info!(service = %desc.id, "service online");
                    }
                    status.online = true;
                    status.last_error = None;
                    report.apply_to(&mut status.locked, &mut status.active);
                }
                Err(e) => {
                    if status.online {
                        warn!(service = %desc.id, error = %e, "service went offline");
                    } else {
                        debug!(service = %desc.id, error = %e, "service still offline");
                    }
                    // `locked` keeps its last known value.
                    status.online = false;
                    status.active = false;
                    status.last_error = Some(e.to_string());
                }
            }
        }

        state.reconcile_active();
        self.enforce_single_unlocked(&mut state).await;
        self.metrics.observe_cycle(&state);
    }

    async fn enforce_single_unlocked(&self, state: &mut ArbiterState) {
        let Some(plan) = enforce::plan(state) else {
            return;
        };

        warn!(
            count = plan.lock.len() + 1,
            keep = %plan.keep,
            "multiple services unlocked, enforcing constraint"
        );
        for id in &plan.lock {
            info!(service = %id, "auto-locking service to enforce single unlock constraint");
        }

        let locked = self.lock_best_effort(state, &plan.lock).await;
        self.metrics.enforced_locks.inc_by(locked as u64);
    }

    // -----------------------------------------------------------------------
    // Lock application
    // -----------------------------------------------------------------------

    /// Housekeeping tier: lock each of `ids`, logging failures.
    ///
    /// Returns how many were locked.
    async fn lock_best_effort(&self, state: &mut ArbiterState, ids: &[String]) -> usize {
        let mut locked = 0;
        for id in ids {
            match self.apply_lock(state, id, true).await {
                Ok(()) => locked += 1,
                Err(e) => warn!(service = %id, error = %e, "failed to lock service"),
            }
        }
        locked
    }

    /// Critical tier: one lock call whose failure belongs to the caller.
    ///
    /// Must be called with the exclusive lock held.
    async fn apply_lock(
        &self,
        state: &mut ArbiterState,
        id: &str,
        locked: bool,
    ) -> Result<(), ArbiterError> {
        let desc = self
            .registry
            .get(id)
            .ok_or_else(|| ArbiterError::NotFound(id.to_string()))?;

        let result = self.transport.set_lock(desc, locked).await;
        self.metrics.record_lock_call(result.is_ok());

        let status = state
            .services
            .get_mut(id)
            .ok_or_else(|| ArbiterError::NotFound(id.to_string()))?;

        match result {
            Ok(()) => {
                status.locked = locked;
                status.last_error = None;
                if locked && state.active.as_deref() == Some(id) {
                    state.active = None;
                }
                Ok(())
            }
            Err(source) => {
                status.last_error = Some(source.to_string());
                Err(ArbiterError::LockCallFailed {
                    service: id.to_string(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{arbiter_with, FakeDevice};
    use super::*;

    fn unlocked_online(statuses: &[ServiceStatus]) -> Vec<String> {
        statuses
            .iter()
            .filter(|s| s.online && !s.locked)
            .map(|s| s.id.clone())
            .collect()
    }

    #[tokio::test]
    async fn starts_offline_with_no_active_service() {
        let (arbiter, _) = arbiter_with(&[("a", 1, FakeDevice::default())]);
        let status = arbiter.status("a").await.unwrap();
        assert!(!status.online && !status.locked && !status.active);
        assert_eq!(arbiter.active_service().await, None);
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let (arbiter, _) = arbiter_with(&[("a", 1, FakeDevice::default())]);
        assert_eq!(
            arbiter.status("nope").await,
            Err(ArbiterError::NotFound("nope".into()))
        );
        assert!(matches!(
            arbiter.activate("nope").await,
            Err(ArbiterError::NotFound(_))
        ));
        assert!(matches!(
            arbiter.set_lock("nope", true).await,
            Err(ArbiterError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn poll_refreshes_flags() {
        let (arbiter, _) = arbiter_with(&[
            ("a", 1, FakeDevice::default()),
            ("b", 2, FakeDevice::playing()),
        ]);
        arbiter.poll_once().await;

        let a = arbiter.status("a").await.unwrap();
        assert!(a.online && a.locked && !a.active);
        assert!(a.last_check.is_some());
        let b = arbiter.status("b").await.unwrap();
        assert!(b.online && !b.locked && b.active);
        assert_eq!(arbiter.active_service().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn unreachable_service_goes_offline_and_keeps_lock_flag() {
        let (arbiter, fake) = arbiter_with(&[("a", 1, FakeDevice::default())]);
        arbiter.poll_once().await;
        assert!(arbiter.status("a").await.unwrap().locked);

        fake.set("a", |d| d.reachable = false);
        arbiter.poll_once().await;
        let a = arbiter.status("a").await.unwrap();
        assert!(!a.online && !a.active);
        assert!(a.locked);
        assert!(!a.last_error.unwrap_or_default().is_empty());

        fake.set("a", |d| d.reachable = true);
        arbiter.poll_once().await;
        let a = arbiter.status("a").await.unwrap();
        assert!(a.online);
        assert_eq!(a.last_error, None);
    }

    #[tokio::test]
    async fn malformed_status_marks_offline() {
        let (arbiter, fake) = arbiter_with(&[("a", 1, FakeDevice::playing())]);
        arbiter.poll_once().await;
        assert_eq!(arbiter.active_service().await.as_deref(), Some("a"));

        fake.set("a", |d| d.malformed = true);
        arbiter.poll_once().await;
        let a = arbiter.status("a").await.unwrap();
        assert!(!a.online && !a.active && !a.locked);
        assert!(a.last_error.is_some());
        assert_eq!(arbiter.active_service().await, None);
    }

    #[tokio::test]
    async fn poll_keeps_lowest_priority_unlocked() {
        let (arbiter, fake) = arbiter_with(&[
            ("a", 2, FakeDevice::unlocked()),
            ("b", 1, FakeDevice::unlocked()),
        ]);
        arbiter.poll_once().await;

        let statuses = arbiter.list_statuses().await;
        assert_eq!(unlocked_online(&statuses), vec!["b"]);
        assert!(fake.device("a").locked);
        assert_eq!(fake.lock_calls(), vec![("a".to_string(), true)]);
    }

    #[tokio::test]
    async fn poll_keeps_active_service_unlocked() {
        let (arbiter, fake) = arbiter_with(&[
            ("a", 1, FakeDevice::unlocked()),
            ("b", 5, FakeDevice::playing()),
        ]);
        arbiter.poll_once().await;

        let statuses = arbiter.list_statuses().await;
        assert_eq!(unlocked_online(&statuses), vec!["b"]);
        assert_eq!(arbiter.active_service().await.as_deref(), Some("b"));
        assert!(fake.device("a").locked);
    }

    #[tokio::test]
    async fn poll_leaves_at_most_one_unlocked() {
        let (arbiter, _) = arbiter_with(&[
            ("a", 3, FakeDevice::unlocked()),
            ("b", 3, FakeDevice::unlocked()),
            ("c", 3, FakeDevice::unlocked()),
            ("d", 4, FakeDevice::default()),
        ]);
        arbiter.poll_once().await;

        let statuses = arbiter.list_statuses().await;
        assert_eq!(unlocked_online(&statuses), vec!["a"]);
    }

    #[tokio::test]
    async fn locked_service_loses_designation_even_while_playing() {
        let (arbiter, fake) = arbiter_with(&[("a", 1, FakeDevice::playing())]);
        arbiter.poll_once().await;
        assert_eq!(arbiter.active_service().await.as_deref(), Some("a"));

        fake.set("a", |d| {
            d.locked = true;
            d.active = true;
        });
        arbiter.poll_once().await;

        let a = arbiter.status("a").await.unwrap();
        assert!(a.locked && a.active);
        assert_eq!(arbiter.active_service().await, None);
    }

    #[tokio::test]
    async fn enforcement_failure_is_recorded_and_retried_next_cycle() {
        let (arbiter, fake) = arbiter_with(&[
            ("a", 1, FakeDevice::unlocked()),
            ("b", 2, FakeDevice::unlocked()),
        ]);
        fake.set("b", |d| d.reject_lock = true);
        arbiter.poll_once().await;
        let b = arbiter.status("b").await.unwrap();
        assert!(!b.locked);
        assert!(b.last_error.is_some());

        fake.set("b", |d| d.reject_lock = false);
        arbiter.poll_once().await;
        assert!(arbiter.status("b").await.unwrap().locked);
    }

    #[tokio::test]
    async fn activate_unlocks_target_and_locks_peers() {
        let (arbiter, fake) = arbiter_with(&[
            ("a", 1, FakeDevice::default()),
            ("b", 2, FakeDevice::unlocked()),
        ]);
        arbiter.poll_once().await;
        assert_eq!(unlocked_online(&arbiter.list_statuses().await), vec!["b"]);

        arbiter.activate("a").await.unwrap();

        let a = arbiter.status("a").await.unwrap();
        assert!(!a.locked);
        assert!(arbiter.status("b").await.unwrap().locked);
        assert_eq!(arbiter.active_service().await.as_deref(), Some("a"));
        assert!(fake.device("b").locked);
        assert!(!fake.device("a").locked);
    }

    #[tokio::test]
    async fn activate_offline_service_changes_nothing() {
        let (arbiter, fake) = arbiter_with(&[
            ("a", 1, FakeDevice::default()),
            ("b", 2, FakeDevice::playing()),
        ]);
        fake.set("a", |d| d.reachable = false);
        arbiter.poll_once().await;
        fake.clear_calls();
        let before = arbiter.list_statuses().await;

        assert_eq!(
            arbiter.activate("a").await,
            Err(ArbiterError::ServiceOffline("a".into()))
        );

        assert_eq!(arbiter.list_statuses().await, before);
        assert_eq!(arbiter.active_service().await.as_deref(), Some("b"));
        assert!(fake.lock_calls().is_empty());
    }

    #[tokio::test]
    async fn activate_tolerates_unreachable_peer() {
        let (arbiter, fake) = arbiter_with(&[
            ("a", 1, FakeDevice::default()),
            ("b", 2, FakeDevice::default()),
        ]);
        arbiter.poll_once().await;
        fake.set("b", |d| d.reachable = false);

        arbiter.activate("a").await.unwrap();

        assert_eq!(arbiter.active_service().await.as_deref(), Some("a"));
        assert!(arbiter.status("b").await.unwrap().last_error.is_some());
    }

    #[tokio::test]
    async fn activate_fails_when_target_refuses_unlock() {
        let (arbiter, fake) = arbiter_with(&[
            ("a", 1, FakeDevice::default()),
            ("b", 2, FakeDevice::default()),
        ]);
        arbiter.poll_once().await;
        fake.set("a", |d| d.reject_lock = true);

        let err = arbiter.activate("a").await.unwrap_err();
        assert!(matches!(err, ArbiterError::LockCallFailed { ref service, .. } if service == "a"));
        assert_eq!(arbiter.active_service().await, None);
        let a = arbiter.status("a").await.unwrap();
        assert!(a.locked);
        assert!(a.last_error.is_some());
    }

    #[tokio::test]
    async fn unlock_locks_other_unlocked_service_first() {
        let (arbiter, fake) = arbiter_with(&[
            ("x", 1, FakeDevice::default()),
            ("y", 2, FakeDevice::unlocked()),
        ]);
        arbiter.poll_once().await;
        fake.clear_calls();

        arbiter.set_lock("x", false).await.unwrap();

        assert_eq!(
            fake.lock_calls(),
            vec![("y".to_string(), true), ("x".to_string(), false)]
        );
        assert_eq!(unlocked_online(&arbiter.list_statuses().await), vec!["x"]);
    }

    #[tokio::test]
    async fn lock_does_not_touch_peers() {
        let (arbiter, fake) = arbiter_with(&[
            ("x", 1, FakeDevice::unlocked()),
            ("y", 2, FakeDevice::default()),
        ]);
        arbiter.poll_once().await;
        fake.clear_calls();

        arbiter.set_lock("x", true).await.unwrap();
        assert_eq!(fake.lock_calls(), vec![("x".to_string(), true)]);
    }

    #[tokio::test]
    async fn repeated_lock_is_idempotent() {
        let (arbiter, _) = arbiter_with(&[("x", 1, FakeDevice::unlocked())]);
        arbiter.poll_once().await;

        arbiter.set_lock("x", true).await.unwrap();
        let once = arbiter.status("x").await.unwrap();
        arbiter.set_lock("x", true).await.unwrap();
        let twice = arbiter.status("x").await.unwrap();

        assert_eq!(once, twice);
        assert!(twice.locked);
        assert_eq!(twice.last_error, None);
    }

    #[tokio::test]
    async fn set_lock_surfaces_adapter_failure() {
        let (arbiter, fake) = arbiter_with(&[("x", 1, FakeDevice::default())]);
        arbiter.poll_once().await;
        fake.set("x", |d| d.reject_lock = true);

        let err = arbiter.set_lock("x", false).await.unwrap_err();
        assert!(matches!(err, ArbiterError::LockCallFailed { .. }));
        assert!(err.to_string().contains("lock refused"));
    }

    #[tokio::test]
    async fn locking_active_service_clears_designation() {
        let (arbiter, _) = arbiter_with(&[("x", 1, FakeDevice::playing())]);
        arbiter.poll_once().await;
        assert_eq!(arbiter.active_service().await.as_deref(), Some("x"));

        arbiter.set_lock("x", true).await.unwrap();
        assert_eq!(arbiter.active_service().await, None);
    }

    #[tokio::test]
    async fn deactivate_all_locks_everything() {
        let (arbiter, fake) = arbiter_with(&[
            ("a", 1, FakeDevice::playing()),
            ("b", 2, FakeDevice::default()),
        ]);
        arbiter.poll_once().await;

        arbiter.deactivate_all().await.unwrap();

        assert!(fake.device("a").locked && fake.device("b").locked);
        assert!(unlocked_online(&arbiter.list_statuses().await).is_empty());
        assert_eq!(arbiter.active_service().await, None);
    }

    #[tokio::test]
    async fn deactivate_all_clears_active_despite_failures() {
        let (arbiter, fake) = arbiter_with(&[
            ("a", 1, FakeDevice::playing()),
            ("b", 2, FakeDevice::default()),
            ("c", 3, FakeDevice::default()),
        ]);
        arbiter.poll_once().await;
        fake.set("a", |d| d.reject_lock = true);
        fake.set("b", |d| d.reachable = false);

        let err = arbiter.deactivate_all().await.unwrap_err();
        assert!(matches!(err, ArbiterError::PartialFailure { failed: 2, .. }));
        assert_eq!(arbiter.active_service().await, None);
        assert!(fake.device("c").locked);
        assert!(fake.lock_calls().iter().any(|(id, _)| id == "c"));
    }

    #[tokio::test]
    async fn polling_lifecycle() {
        let (arbiter, _) = arbiter_with(&[("a", 1, FakeDevice::default())]);

        arbiter.start_polling(Duration::from_millis(10)).await;
        arbiter.start_polling(Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        arbiter.stop_polling().await;
        arbiter.stop_polling().await;

        assert!(arbiter.status("a").await.unwrap().online);
        assert!(arbiter.metrics.poll_cycles.get() >= 1);
    }
}
