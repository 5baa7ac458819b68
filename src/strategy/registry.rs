//! Strategy registry: name-unique entries with dispatch priority.

use super::contract::Strategy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::info;

/// Registry failures.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A strategy with the same name is already registered
    #[error("duplicate strategy name: {0}")]
    DuplicateName(String),

    /// No strategy registered under the name
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
}

#[derive(Clone)]
struct Entry {
    strategy: Arc<dyn Strategy>,
    priority: i32,
    /// Registration order; stabilizes equal-priority dispatch
    seq: u64,
}

/// Read-mostly map of strategies; writes are admin events.
#[derive(Default)]
pub struct StrategyRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl StrategyRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a strategy under its own name.
    ///
    /// Lower priority values dispatch earlier.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateName`] when the name is taken.
    pub fn register(
        &self,
        strategy: Arc<dyn Strategy>,
        priority: i32,
    ) -> Result<(), RegistryError> {
        let name = strategy.name().to_string();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        let seq = self
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        info!(strategy = %name, priority, "strategy registered");
        entries.insert(
            name,
            Entry {
                strategy,
                priority,
                seq,
            },
        );
        Ok(())
    }

    /// Removes a strategy.
    ///
    /// # Errors
    /// [`RegistryError::UnknownStrategy`] when the name is not present.
    pub fn deregister(&self, name: &str) -> Result<Arc<dyn Strategy>, RegistryError> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        match entries.remove(name) {
            Some(entry) => {
                info!(strategy = %name, "strategy deregistered");
                Ok(entry.strategy)
            }
            None => Err(RegistryError::UnknownStrategy(name.to_string())),
        }
    }

    /// Looks up a strategy by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .map(|entry| Arc::clone(&entry.strategy))
    }

    /// The priority registered for a strategy.
    #[must_use]
    pub fn priority(&self, name: &str) -> Option<i32> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .map(|entry| entry.priority)
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of all registered strategies.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of the currently running strategies in dispatch order:
    /// priority ascending, registration order breaking ties.
    #[must_use]
    pub fn running_snapshot(&self) -> Vec<(i32, Arc<dyn Strategy>)> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let mut running: Vec<&Entry> = entries
            .values()
            .filter(|entry| entry.strategy.is_running())
            .collect();
        running.sort_by_key(|entry| (entry.priority, entry.seq));
        running
            .iter()
            .map(|entry| (entry.priority, Arc::clone(&entry.strategy)))
            .collect()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}
