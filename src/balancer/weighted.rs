//! Weighted random selection.
//!
//! Each backend owns `max(weight, 1)` consecutive slots in registry order
//! and a uniform slot is drawn. Slots are never materialized: the cache
//! holds running weight totals and a draw is a binary search over them,
//! so memory and rebuild cost grow with the number of backends, not with
//! the size of their weights. The totals are rebuilt only when the
//! `(id, weight)` sequence of the input changes.

use std::sync::{Mutex, PoisonError};

use rand::Rng;

use crate::error::NoHealthyBackends;
use crate::registry::Backend;

#[derive(Debug, Default)]
struct Cumulative {
    key: Vec<(String, u32)>,
    /// `totals[i]` is the number of slots owned by `healthy[..=i]`.
    totals: Vec<u64>,
}

impl Cumulative {
    fn total(&self) -> u64 {
        self.totals.last().copied().unwrap_or(0)
    }

    /// Index into the healthy slice owning `slot`.
    fn owner(&self, slot: u64) -> usize {
        self.totals.partition_point(|&t| t <= slot)
    }
}

#[derive(Debug, Default)]
pub struct Weighted {
    cache: Mutex<Cumulative>,
}

fn cache_key(healthy: &[Backend]) -> Vec<(String, u32)> {
    healthy.iter().map(|b| (b.id.clone(), b.weight)).collect()
}

fn running_totals(healthy: &[Backend]) -> Vec<u64> {
    healthy
        .iter()
        .scan(0u64, |sum, b| {
            *sum += u64::from(b.weight.max(1));
            Some(*sum)
        })
        .collect()
}

impl Weighted {
    pub fn select(&self, healthy: &[Backend]) -> Result<Backend, NoHealthyBackends> {
        if healthy.is_empty() {
            return Err(NoHealthyBackends);
        }

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if !cache
            .key
            .iter()
            .map(|(id, w)| (id.as_str(), *w))
            .eq(healthy.iter().map(|b| (b.id.as_str(), b.weight)))
        {
            cache.totals = running_totals(healthy);
            cache.key = cache_key(healthy);
            tracing::debug!(
                backends = healthy.len(),
                slots = cache.total(),
                "rebuilt weighted selection totals"
            );
        }

        let slot = rand::thread_rng().gen_range(0..cache.total());
        let index = cache.owner(slot);
        drop(cache);
        Ok(healthy[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::balancer::backends;

    fn frequencies(weighted: &Weighted, pool: &[Backend], calls: u32) -> HashMap<String, f64> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..calls {
            *counts.entry(weighted.select(pool).unwrap().id).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(id, c)| (id, f64::from(c) / f64::from(calls)))
            .collect()
    }

    fn assert_tracks_weights(spec: &[(&str, u32)]) {
        let weighted = Weighted::default();
        let pool = backends(spec);
        let freq = frequencies(&weighted, &pool, 20_000);
        let sum: u32 = spec.iter().map(|(_, w)| w.max(&1)).sum();

        for (id, weight) in spec {
            let expected = f64::from(*weight.max(&1)) / f64::from(sum);
            let actual = freq.get(*id).copied().unwrap_or_default();
            assert!(
                (actual - expected).abs() < 0.02,
                "{id}: expected {expected:.3}, got {actual:.3}"
            );
        }
    }

    #[test]
    fn slots_follow_weights_in_order() {
        let cache = Cumulative {
            key: Vec::new(),
            totals: running_totals(&backends(&[("a", 2), ("b", 1), ("c", 3)])),
        };
        let owners: Vec<usize> = (0..cache.total()).map(|s| cache.owner(s)).collect();
        assert_eq!(owners, [0, 0, 1, 2, 2, 2]);
    }

    #[test]
    fn zero_weight_counts_as_one() {
        assert_eq!(running_totals(&backends(&[("a", 0), ("b", 1)])), [1, 2]);
    }

    #[test]
    fn huge_weights_do_not_allocate_slots() {
        let weighted = Weighted::default();
        let pool = backends(&[("a", u32::MAX), ("b", u32::MAX), ("c", 1)]);
        for _ in 0..100 {
            weighted.select(&pool).unwrap();
        }
        let cache = weighted.cache.lock().unwrap();
        assert_eq!(cache.totals.len(), 3);
        assert_eq!(cache.total(), 2 * u64::from(u32::MAX) + 1);
    }

    #[test]
    fn frequencies_track_weights() {
        assert_tracks_weights(&[("a", 5), ("b", 1), ("c", 1)]);
    }

    #[test]
    fn frequencies_track_equal_weights() {
        assert_tracks_weights(&[("a", 3), ("b", 3), ("c", 3), ("d", 3)]);
    }

    #[test]
    fn frequencies_track_one_dominant_backend() {
        assert_tracks_weights(&[("a", 50), ("b", 1)]);
    }

    #[test]
    fn frequencies_track_many_backends() {
        let ids: Vec<String> = (0..12).map(|i| format!("s{i}")).collect();
        let spec: Vec<(&str, u32)> = ids
            .iter()
            .zip([1, 2, 3, 4, 1, 2, 3, 4, 8, 1, 1, 10])
            .map(|(id, w)| (id.as_str(), w))
            .collect();
        assert_tracks_weights(&spec);
    }

    #[test]
    fn rebuilds_when_a_backend_leaves() {
        let weighted = Weighted::default();
        let pool = backends(&[("a", 5), ("b", 1)]);
        weighted.select(&pool).unwrap();

        let only_b: Vec<Backend> = pool.iter().filter(|b| b.id == "b").cloned().collect();
        for _ in 0..50 {
            assert_eq!(weighted.select(&only_b).unwrap().id, "b");
        }
    }

    #[test]
    fn reordered_input_still_picks_by_weight() {
        let weighted = Weighted::default();
        let forward = backends(&[("a", 1), ("b", 1_000_000)]);
        let mut reversed = forward.clone();
        reversed.reverse();

        weighted.select(&forward).unwrap();
        let picks: Vec<String> = (0..200)
            .map(|_| weighted.select(&reversed).unwrap().id)
            .collect();
        assert!(picks.iter().filter(|id| *id == "b").count() > 190);
    }

    #[test]
    fn concurrent_callers_pick_from_their_own_set() {
        let weighted = Arc::new(Weighted::default());
        let full = backends(&[("a", 3), ("b", 1), ("c", 2)]);
        let partial: Vec<Backend> = full.iter().filter(|b| b.id != "a").cloned().collect();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let weighted = Arc::clone(&weighted);
                let pool = if t % 2 == 0 { full.clone() } else { partial.clone() };
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let picked = weighted.select(&pool).unwrap();
                        assert!(
                            pool.iter().any(|b| b.id == picked.id),
                            "{} not in the set passed in",
                            picked.id
                        );
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
