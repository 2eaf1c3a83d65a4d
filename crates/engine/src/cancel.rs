//! Process-wide set of playgrounds with a pending cancellation request.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

#[derive(Clone, Default)]
pub struct CancellationRegistry {
    requested: Arc<RwLock<HashSet<Uuid>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a request was already pending.
    pub fn request(&self, playground_id: Uuid) -> bool {
        self.requested
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(playground_id)
    }

    pub fn is_requested(&self, playground_id: Uuid) -> bool {
        self.requested
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&playground_id)
    }

    /// Drop the pending request. Only the run that owns the playground calls this.
    pub fn clear(&self, playground_id: Uuid) {
        self.requested
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&playground_id);
    }

    pub fn pending(&self) -> usize {
        self.requested
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
