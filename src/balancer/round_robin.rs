//! Round-robin selection in registry order.

use std::sync::{Mutex, PoisonError};

use crate::error::NoHealthyBackends;
use crate::registry::Backend;

#[derive(Debug, Default)]
struct Cursor {
    /// Index of the last pick; `None` until the first pick after a reset.
    last: Option<usize>,
    /// Sorted ids of the healthy set seen on the previous call.
    seen: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: Mutex<Cursor>,
}

impl RoundRobin {
    /// Pick the next backend. A change in the healthy id set restarts the
    /// rotation at position 0.
    pub fn select(&self, healthy: &[Backend]) -> Result<Backend, NoHealthyBackends> {
        if healthy.is_empty() {
            return Err(NoHealthyBackends);
        }

        let mut ids: Vec<String> = healthy.iter().map(|b| b.id.clone()).collect();
        ids.sort_unstable();

        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if cursor.seen != ids {
            tracing::debug!(backends = ids.len(), "healthy set changed, resetting rotation");
            cursor.seen = ids;
            cursor.last = None;
        }

        let next = cursor.last.map_or(0, |i| (i + 1) % healthy.len());
        cursor.last = Some(next);
        Ok(healthy[next].clone())
    }
}
