//! src/latency.rs
//!
//! The latency oracle: a symmetric matrix of
//! distributions, one per location pair, sampled (and cached) on demand.
//! Grounded in `p2psimpy/utils.get_latency_delay`, which indexes a
//! `locations[origin][destination]` dict of distributions.

use indexmap::IndexMap;
use rand::rngs::StdRng;

use crate::distribution::Distribution;
use crate::error::{Error, Result};
use crate::time::SimTime;

/// Unordered pair of location names, used as the oracle's cache key so a
/// symmetric `(a, b)` / `(b, a)` pair share one cached draw.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct LocationPair(String, String);

impl LocationPair {
    fn new(a: &str, b: &str) -> Self {
        if a <= b {
            LocationPair(a.to_string(), b.to_string())
        } else {
            LocationPair(b.to_string(), a.to_string())
        }
    }
}

/// Maps every ordered location pair to the distribution its delay is
/// sampled from, plus a small cache of already-drawn values (`cache_n`:
/// a pair's pool is filled with `cache_n` fresh draws at once, then drained
/// one at a time; once empty, the next query refills it with `cache_n` more
/// fresh draws rather than sampling one value per call).
pub struct LatencyOracle {
    distributions: IndexMap<LocationPair, Distribution>,
    cache: IndexMap<LocationPair, Vec<f64>>,
    cache_n: usize,
}

impl LatencyOracle {
    /// `locations` is the symmetric latency matrix from configuration:
    /// for every unordered pair of location names that peers may be
    /// assigned, a distribution of one-way link delay in milliseconds.
    pub fn new(locations: IndexMap<(String, String), Distribution>, cache_n: usize) -> Self {
        let mut distributions = IndexMap::new();
        for ((a, b), dist) in locations {
            distributions.insert(LocationPair::new(&a, &b), dist);
        }
        LatencyOracle { distributions, cache: IndexMap::new(), cache_n: cache_n.max(1) }
    }

    /// Same location to itself always has zero delay, regardless of
    /// whether the configuration names a self-pair.
    pub fn get_delay(&mut self, rng: &mut StdRng, origin: &str, destination: &str) -> Result<SimTime> {
        if origin == destination {
            return Ok(SimTime::ZERO);
        }
        let key = LocationPair::new(origin, destination);
        let dist = self
            .distributions
            .get(&key)
            .ok_or_else(|| Error::LatencyUnknown(origin.to_string(), destination.to_string()))?;

        let pool = self.cache.entry(key).or_insert_with(Vec::new);
        if pool.is_empty() {
            for _ in 0..self.cache_n {
                pool.push(dist.sample(rng).max(0.0));
            }
        }
        let ms = pool.pop().expect("pool was just refilled");

        Ok(SimTime::from_millis(ms))
    }

    /// Every configured location pair and the distribution its delay is
    /// drawn from, for `Simulation::save_experiment`. Iteration order
    /// follows `LocationPair`'s alphabetical normalization, not the
    /// original configuration's: the pair `(a, b)` round-trips as one
    /// entry regardless of which order it was originally named in.
    pub(crate) fn pairs(&self) -> impl Iterator<Item = (&str, &str, &Distribution)> {
        self.distributions.iter().map(|(pair, dist)| (pair.0.as_str(), pair.1.as_str(), dist))
    }

    pub(crate) fn cache_n(&self) -> usize {
        self.cache_n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn oracle(n: usize) -> LatencyOracle {
        let mut locations = IndexMap::new();
        locations.insert(
            ("eu".to_string(), "us".to_string()),
            Distribution::Scalar(7.0),
        );
        LatencyOracle::new(locations, n)
    }

    #[test]
    fn same_location_is_zero_delay() {
        let mut o = oracle(1);
        let mut rng = StdRng::seed_from_u64(1);
        let d = o.get_delay(&mut rng, "eu", "eu").unwrap();
        assert_eq!(d.as_secs(), 0.0);
    }

    #[test]
    fn lookup_is_symmetric() {
        let mut o = oracle(1);
        let mut rng = StdRng::seed_from_u64(1);
        let a = o.get_delay(&mut rng, "eu", "us").unwrap();
        let b = o.get_delay(&mut rng, "us", "eu").unwrap();
        assert_eq!(a.as_millis(), 7.0);
        assert_eq!(b.as_millis(), 7.0);
    }

    #[test]
    fn unknown_pair_errors() {
        let mut o = oracle(1);
        let mut rng = StdRng::seed_from_u64(1);
        let err = o.get_delay(&mut rng, "eu", "asia").unwrap_err();
        assert!(matches!(err, Error::LatencyUnknown(_, _)));
    }
}
