//! Uniform random selection.

use rand::Rng;

use crate::error::NoHealthyBackends;
use crate::registry::Backend;

#[derive(Debug, Default, Clone, Copy)]
pub struct Random;

impl Random {
    pub fn select(&self, healthy: &[Backend]) -> Result<Backend, NoHealthyBackends> {
        if healthy.is_empty() {
            return Err(NoHealthyBackends);
        }
        let index = rand::thread_rng().gen_range(0..healthy.len());
        Ok(healthy[index].clone())
    }
}
