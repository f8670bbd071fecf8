use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::arbiter::ArbiterState;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LockCallLabels {
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Ok,
    Failed,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the arbiter.
pub struct Metrics {
    pub poll_cycles: Counter,
    pub lock_calls: Family<LockCallLabels, Counter>,
    /// Lock calls issued by the single-unlocked enforcement pass.
    pub enforced_locks: Counter,
    pub services_online: Gauge,
    pub services_unlocked: Gauge,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let poll_cycles = Counter::default();
        registry.register(
            "arbiter_poll_cycles",
            "Completed poll cycles",
            poll_cycles.clone(),
        );

        let lock_calls = Family::<LockCallLabels, Counter>::default();
        registry.register(
            "arbiter_lock_calls",
            "Lock and unlock calls sent to devices, by outcome",
            lock_calls.clone(),
        );

        let enforced_locks = Counter::default();
        registry.register(
            "arbiter_enforced_locks",
            "Services locked to restore the single-unlocked invariant",
            enforced_locks.clone(),
        );

        let services_online: Gauge = Gauge::default();
        registry.register(
            "arbiter_services_online",
            "Services that answered the last poll",
            services_online.clone(),
        );

        let services_unlocked: Gauge = Gauge::default();
        registry.register(
            "arbiter_services_unlocked",
            "Online services currently unlocked",
            services_unlocked.clone(),
        );

        Self {
            poll_cycles,
            lock_calls,
            enforced_locks,
            services_online,
            services_unlocked,
        }
    }

    pub fn record_lock_call(&self, ok: bool) {
        let outcome = if ok { Outcome::Ok } else { Outcome::Failed };
        self.lock_calls.get_or_create(&LockCallLabels { outcome }).inc();
    }

    /// Called at the end of every poll cycle.
    pub fn observe_cycle(&self, state: &ArbiterState) {
        self.poll_cycles.inc();
        self.services_online.set(state.online_count() as i64);
        self.services_unlocked.set(state.unlocked_count() as i64);
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`crate::AppState`].
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all arbiter metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)
            .map_err(|e| anyhow::anyhow!("metrics encoding failed: {e}"))?;
        Ok(buf)
    }
}
