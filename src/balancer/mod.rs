//! Backend selection strategies.
//!
//! [`Balancer`] is a closed set of strategies chosen once at startup.
//! Every variant picks from the healthy snapshot it is handed and fails
//! with [`NoHealthyBackends`] on an empty slice; none ever falls back to
//! an unhealthy backend.
//!
//! - [`random`] -- uniform pick, stateless.
//! - [`round_robin`] -- cursor over registry order, reset when the healthy
//!   set changes.
//! - [`weighted`] -- uniform pick over `weight` slots per backend, found by
//!   binary search over running totals rebuilt when the `(id, weight)` set
//!   changes.

pub mod random;
pub mod round_robin;
pub mod weighted;

use serde::{Deserialize, Serialize};

use crate::error::NoHealthyBackends;
use crate::registry::Backend;

pub use random::Random;
pub use round_robin::RoundRobin;
pub use weighted::Weighted;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Random,
    #[value(name = "roundrobin")]
    RoundRobin,
    #[default]
    Weighted,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Random => "random",
            Self::RoundRobin => "roundrobin",
            Self::Weighted => "weighted",
        })
    }
}

#[derive(Debug)]
pub enum Balancer {
    Random(Random),
    RoundRobin(RoundRobin),
    Weighted(Weighted),
}

impl Balancer {
    #[must_use]
    pub fn new(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Random => Self::Random(Random),
            StrategyKind::RoundRobin => Self::RoundRobin(RoundRobin::default()),
            StrategyKind::Weighted => Self::Weighted(Weighted::default()),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::Random(_) => StrategyKind::Random,
            Self::RoundRobin(_) => StrategyKind::RoundRobin,
            Self::Weighted(_) => StrategyKind::Weighted,
        }
    }

    pub fn select_server(&self, healthy: &[Backend]) -> Result<Backend, NoHealthyBackends> {
        match self {
            Self::Random(s) => s.select(healthy),
            Self::RoundRobin(s) => s.select(healthy),
            Self::Weighted(s) => s.select(healthy),
        }
    }
}

#[cfg(test)]
pub(crate) fn backends(spec: &[(&str, u32)]) -> Vec<Backend> {
    spec.iter()
        .zip(3001u16..)
        .map(|(&(id, weight), port)| Backend::new(id, "localhost", port, weight))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_strategy_rejects_empty_set() {
        for kind in [
            StrategyKind::Random,
            StrategyKind::RoundRobin,
            StrategyKind::Weighted,
        ] {
            let balancer = Balancer::new(kind);
            assert_eq!(balancer.kind(), kind);
            assert_eq!(balancer.select_server(&[]), Err(NoHealthyBackends));
        }
    }

    #[test]
    fn every_strategy_returns_member_of_input() {
        let pool = backends(&[("a", 1), ("b", 2)]);
        for kind in [
            StrategyKind::Random,
            StrategyKind::RoundRobin,
            StrategyKind::Weighted,
        ] {
            let balancer = Balancer::new(kind);
            for _ in 0..20 {
                let picked = balancer.select_server(&pool).unwrap();
                assert!(pool.contains(&picked));
            }
        }
    }

    #[test]
    fn strategy_kind_display_matches_config_names() {
        assert_eq!(StrategyKind::RoundRobin.to_string(), "roundrobin");
        assert_eq!(StrategyKind::default(), StrategyKind::Weighted);
    }
}
