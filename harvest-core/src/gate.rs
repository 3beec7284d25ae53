//! Per-site admission control for browser instances. Each site gets a
//! fixed-capacity gate; jobs queue on it in arrival order and hold their
//! slot for the whole browser lifetime, including cleanup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Admission gate for one site. Capacity never changes after construction.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    site: String,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    pub fn new(site: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            site: site.into(),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a slot. Waiters are admitted in the order they arrived.
    pub async fn admit(&self) -> GateSlot {
        debug!(site = %self.site, available = self.available(), "waiting for browser slot");
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");
        debug!(site = %self.site, "browser slot acquired");
        GateSlot {
            site: self.site.clone(),
            _permit: permit,
        }
    }
}

/// Holds one slot of a site's gate; dropping it releases the slot.
pub struct GateSlot {
    site: String,
    _permit: OwnedSemaphorePermit,
}

impl GateSlot {
    pub fn site(&self) -> &str {
        &self.site
    }
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        debug!(site = %self.site, "browser slot released");
    }
}

/// Lazily builds one gate per site. Sites without an explicit capacity
/// share the global `max_browser_instances` default.
pub struct GateRegistry {
    default_capacity: usize,
    gates: Mutex<HashMap<String, ConcurrencyGate>>,
}

impl GateRegistry {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            default_capacity: default_capacity.max(1),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub async fn gate(&self, site: &str, capacity: Option<usize>) -> ConcurrencyGate {
        let mut gates = self.gates.lock().await;
        gates
            .entry(site.to_string())
            .or_insert_with(|| {
                ConcurrencyGate::new(site, capacity.unwrap_or(self.default_capacity))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capacity_is_at_least_one() {
        let gate = ConcurrencyGate::new("example", 0);
        assert_eq!(gate.capacity(), 1);
        let slot = gate.admit().await;
        assert_eq!(gate.available(), 0);
        drop(slot);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn registry_reuses_the_gate_per_site() {
        let registry = GateRegistry::new(3);
        let first = registry.gate("example", Some(1)).await;
        let _held = first.admit().await;

        // The second lookup must observe the held slot, not a fresh gate.
        let second = registry.gate("example", Some(1)).await;
        assert_eq!(second.available(), 0);

        let other = registry.gate("other", None).await;
        assert_eq!(other.capacity(), 3);
    }
}
