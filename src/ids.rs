//! Identifier Source
//!
//! TigerStyle: randomness is injected and seeded. The seed is logged so any
//! run can be replayed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::slot::RecordId;

/// Source of 32-bit record identifiers.
///
/// Identifiers are random and may collide; the registry never assumes
/// uniqueness.
pub trait IdSource: Send {
    /// Draw the next identifier.
    fn next_id(&mut self) -> RecordId;
}

/// ChaCha-backed identifier source.
#[derive(Debug, Clone)]
pub struct SeededIds {
    seed: u64,
    rng: ChaCha20Rng,
}

impl SeededIds {
    /// Create a source with an explicit seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    /// Create a source seeded from entropy. The chosen seed is logged.
    #[must_use]
    pub fn from_entropy() -> Self {
        let seed: u64 = rand::random();
        tracing::info!(seed = seed, "Identifier seed chosen (replay with STEAM_SEED)");
        Self::with_seed(seed)
    }

    /// Seed in use.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl IdSource for SeededIds {
    fn next_id(&mut self) -> RecordId {
        self.rng.gen()
    }
}

/// Replays a fixed list of identifiers, cycling when exhausted.
///
/// Used to force collisions and predictable ids in scenarios and tests.
#[derive(Debug, Clone)]
pub struct FixedIds {
    ids: Vec<RecordId>,
    cursor: usize,
}

impl FixedIds {
    /// Create a source over `ids`.
    ///
    /// # Panics
    /// Panics if `ids` is empty.
    #[must_use]
    pub fn new(ids: Vec<RecordId>) -> Self {
        assert!(!ids.is_empty(), "fixed id list must not be empty");
        Self { ids, cursor: 0 }
    }
}

impl IdSource for FixedIds {
    fn next_id(&mut self) -> RecordId {
        let id = self.ids[self.cursor % self.ids.len()];
        self.cursor = self.cursor.wrapping_add(1);
        id
    }
}
