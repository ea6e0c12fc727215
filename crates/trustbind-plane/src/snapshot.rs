//! Published binding set
//!
//! Readers clone the current `Arc` and keep evaluating against it even if a
//! newer set is published meanwhile. Publication swaps the pointer under a
//! short write lock.

use std::sync::{Arc, RwLock};
use tracing::{info, warn};
use trustbind_core::BindingSet;

use crate::error::{PlaneError, Result};

/// Atomically replaceable pointer to the published [`BindingSet`]
pub struct SnapshotHandle {
    current: RwLock<Arc<BindingSet>>,
}

impl SnapshotHandle {
    pub fn new(initial: BindingSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The set new evaluations should use
    pub fn current(&self) -> Arc<BindingSet> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn revision(&self) -> u64 {
        self.current().revision()
    }

    /// Replace the published set
    ///
    /// Refused unless `next` carries a higher revision than the current set.
    pub fn publish(&self, next: BindingSet) -> Result<Arc<BindingSet>> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if next.revision() <= current.revision() {
            warn!(
                current = current.revision(),
                offered = next.revision(),
                "Refused to publish stale binding set"
            );
            return Err(PlaneError::StaleRevision {
                current: current.revision(),
                offered: next.revision(),
            });
        }

        let next = Arc::new(next);
        info!(
            revision = next.revision(),
            previous = current.revision(),
            bindings = next.len(),
            "Published binding set"
        );
        *current = next.clone();
        Ok(next)
    }
}
