//! Utility functions

use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::entity::Entity;

/// Align value to power of 2
pub fn align_to(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Deterministic digest of a sorted id list.
///
/// Hashes are an accelerator only; archetype identity is always the id lists
/// themselves.
pub fn hash_ids(ids: &[Entity]) -> u64 {
    let mut hasher = FxHasher::default();
    for id in ids {
        hasher.write_u64(id.raw());
    }
    hasher.finish()
}

/// Combine two digests into one.
pub fn hash_combine(a: u64, b: u64) -> u64 {
    a ^ (b
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(a << 6)
        .wrapping_add(a >> 2))
}

/// Per-id splat mask for the matcher fast path.
///
/// Three bits derived from the id's digest. OR-folding these per archetype
/// gives a small Bloom-style filter: a query mask not fully contained in the
/// archetype mask can never match.
pub fn splat_mask(id: Entity) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(id.raw());
    let h = hasher.finish();
    (1u64 << (h & 63)) | (1u64 << ((h >> 8) & 63)) | (1u64 << ((h >> 16) & 63))
}
