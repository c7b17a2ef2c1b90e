//! Pseudo-random index assignment for oracle registration

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::models::oracle::{IndexSet, OracleIdentity, INDEX_SLOTS};

/// Draw three indexes uniformly from `[0, max_index)`.
///
/// Same seed, same set. Slots are independent draws and may repeat.
pub fn assign_indexes(seed: u64, max_index: u8) -> IndexSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indexes = [0u8; INDEX_SLOTS];
    for slot in indexes.iter_mut() {
        *slot = rng.gen_range(0..max_index);
    }
    IndexSet::new(indexes)
}

/// Assigns index sets keyed on the oracle identity, so the result does not
/// depend on the order oracles register in.
#[derive(Debug, Clone)]
pub struct IndexAssigner {
    base_seed: u64,
    max_index: u8,
}

impl IndexAssigner {
    /// A `max_index` of zero is clamped to one; `gen_range` needs a non-empty range.
    pub fn new(base_seed: u64, max_index: u8) -> Self {
        Self {
            base_seed,
            max_index: max_index.max(1),
        }
    }

    pub fn max_index(&self) -> u8 {
        self.max_index
    }

    pub fn assign(&self, identity: &OracleIdentity) -> IndexSet {
        assign_indexes(self.seed_for(identity), self.max_index)
    }

    fn seed_for(&self, identity: &OracleIdentity) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.base_seed.to_be_bytes());
        hasher.update(identity.as_str().as_bytes());
        let digest = hasher.finalize();
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(seed)
    }
}
