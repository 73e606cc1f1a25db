//! Session identifier generation
//!
//! Identifiers are the insert time in RFC 3339 with nanoseconds followed by a random
//! five-digit suffix. Nodes can mint them without coordination and rows still sort
//! roughly by creation time.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::{Mutex, PoisonError};

const SUFFIX_MIN: u32 = 10_000;
const SUFFIX_MAX: u32 = 99_999;

/// Identifier source with an injectable random generator
pub struct IdGenerator {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl IdGenerator {
    /// Generator seeded from OS entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Generator drawing suffixes from `rng`
    pub fn with_rng<R: RngCore + Send + 'static>(rng: R) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Deterministic generator for tests and replay
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn suffix(&self) -> u32 {
        let mut guard = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let rng = &mut *guard;
        rng.gen_range(SUFFIX_MIN..=SUFFIX_MAX)
    }

    /// Mint an identifier for a row created at `now`
    pub fn generate(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}{}",
            now.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.suffix()
        )
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}
