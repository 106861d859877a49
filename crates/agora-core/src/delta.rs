//! Invertible sketch codec for set reconciliation.
//!
//! ## Overview
//!
//! A [`DeltaSet`] summarizes a set of content hashes in a fixed number of
//! cells, independent of set size. Two sketches built with the same
//! profile and salt can be subtracted cell-wise; decoding the result
//! recovers exactly the hashes present on one side but not the other, as
//! long as the symmetric difference fits the profile's capacity. When it
//! does not, [`DeltaSet::decode`] returns `None` rather than a partial or
//! wrong answer, and the caller falls back to another strategy.
//!
//! Each hash lands in one cell per subtable (three subtables), so the
//! three slots of an item are always distinct. A cell tracks a signed
//! count, the XOR of all keys in it, and the XOR of a per-key checksum;
//! decoding peels cells that hold exactly one item until the table is
//! empty or no progress can be made.
//!
//! ## Usage
//!
//! ```
//! use agora_core::delta::{DeltaProfile, DeltaSet};
//! use agora_core::types::ContentHash;
//!
//! let ours: Vec<ContentHash> = (0u8..10).map(|i| ContentHash::hash(&[i])).collect();
//! let theirs: Vec<ContentHash> = (5u8..15).map(|i| ContentHash::hash(&[i])).collect();
//!
//! let salt = 7;
//! let local = DeltaSet::encode(DeltaProfile::Compact, salt, &ours);
//! let remote = DeltaSet::encode(DeltaProfile::Compact, salt, &theirs);
//!
//! let diff = local.subtract(&remote).expect("profiles and salts match");
//! let decoded = diff.decode().expect("well within capacity");
//! assert_eq!(decoded.local_only.len(), 5);
//! assert_eq!(decoded.remote_only.len(), 5);
//! ```

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::ContentHash;

/// Domain context for deriving cell slots and checksums from a hash.
const DELTA_INDEX_CONTEXT: &str = "agora-delta-v1-index";

/// Sizing profile for a sketch.
///
/// Capacity is the largest symmetric difference a profile is rated to
/// decode reliably; it is kept well under the theoretical peeling
/// threshold of roughly `cells / 1.22`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaProfile {
    /// Small sketch for steady-state refreshes.
    Compact,
    /// Large sketch for nodes returning after a long gap.
    Wide,
}

impl DeltaProfile {
    /// Number of cells. Always divisible by three (one slot per subtable).
    pub fn cells(self) -> usize {
        match self {
            DeltaProfile::Compact => 510,
            DeltaProfile::Wide => 4_095,
        }
    }

    /// Rated decode capacity in items.
    pub fn capacity(self) -> usize {
        self.cells() * 5 / 7
    }

    /// The smallest profile rated for a difference of `n` items, or `None`
    /// if even the widest profile cannot hold it.
    pub fn for_difference(n: usize) -> Option<Self> {
        [DeltaProfile::Compact, DeltaProfile::Wide]
            .into_iter()
            .find(|profile| profile.capacity() >= n)
    }
}

/// The height window a sketch's key snapshot covers.
///
/// An annotation stamped by the caller and carried on the wire; the
/// codec includes it in structural equality but never interprets it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeightRange {
    pub from: u64,
    pub to: u64,
}

impl HeightRange {
    pub const fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }
}

/// One sketch cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct DeltaCell {
    count: i32,
    key_xor: [u8; 32],
    check_xor: u64,
}

impl DeltaCell {
    const EMPTY: DeltaCell = DeltaCell {
        count: 0,
        key_xor: [0; 32],
        check_xor: 0,
    };

    fn is_empty(&self) -> bool {
        self.count == 0 && self.check_xor == 0 && self.key_xor == [0; 32]
    }
}

/// The two sides of a decoded difference, named from the perspective of
/// the sketch `subtract` was called on.
#[derive(Debug, Clone, Default)]
pub struct DeltaDecode {
    /// Hashes present locally but absent on the remote side.
    pub local_only: Vec<ContentHash>,
    /// Hashes present remotely but absent locally.
    pub remote_only: Vec<ContentHash>,
}

/// A fixed-size invertible summary of a hash set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSet {
    profile: DeltaProfile,
    salt: u64,
    range: HeightRange,
    cells: Vec<DeltaCell>,
}

impl DeltaSet {
    /// Build a sketch of the given hashes.
    ///
    /// Both sides of a reconciliation must use the same profile and salt
    /// for their sketches to be comparable; the requester picks the salt
    /// and the responder copies it from the request.
    pub fn encode<'a, I>(profile: DeltaProfile, salt: u64, hashes: I) -> Self
    where
        I: IntoIterator<Item = &'a ContentHash>,
    {
        let mut set = Self {
            profile,
            salt,
            range: HeightRange::default(),
            cells: vec![DeltaCell::EMPTY; profile.cells()],
        };
        for hash in hashes {
            set.insert(hash);
        }
        set
    }

    /// Annotate the sketch with the height window its keys cover.
    pub fn with_range(mut self, range: HeightRange) -> Self {
        self.range = range;
        self
    }

    pub fn profile(&self) -> DeltaProfile {
        self.profile
    }

    pub fn salt(&self) -> u64 {
        self.salt
    }

    pub fn range(&self) -> HeightRange {
        self.range
    }

    fn insert(&mut self, hash: &ContentHash) {
        let cells_per_subtable = self.cells.len() / 3;
        let (slots, check) = cell_slots(hash, self.salt, cells_per_subtable);
        for slot in slots {
            let cell = &mut self.cells[slot];
            cell.count += 1;
            xor_in_place(&mut cell.key_xor, hash.as_bytes());
            cell.check_xor ^= check;
        }
    }

    /// Cell-wise difference of two sketches.
    ///
    /// Returns `None` when the sketches were not built with the same
    /// profile and salt, including a peer-supplied sketch whose cell
    /// count does not match its declared profile.
    pub fn subtract(&self, other: &DeltaSet) -> Option<DeltaSet> {
        if self.profile != other.profile || self.salt != other.salt {
            return None;
        }
        if self.cells.len() != self.profile.cells() || other.cells.len() != self.cells.len() {
            return None;
        }

        let cells = self
            .cells
            .iter()
            .zip(&other.cells)
            .map(|(a, b)| DeltaCell {
                count: a.count - b.count,
                key_xor: {
                    let mut xor = a.key_xor;
                    xor_in_place(&mut xor, &b.key_xor);
                    xor
                },
                check_xor: a.check_xor ^ b.check_xor,
            })
            .collect();

        Some(DeltaSet {
            profile: self.profile,
            salt: self.salt,
            range: self.range,
            cells,
        })
    }

    /// Estimated number of items summarized by this sketch.
    ///
    /// Exact for a freshly encoded sketch; after subtraction it is a
    /// lower bound on the symmetric difference, used to judge whether a
    /// decode attempt is worth making or a wider profile is needed.
    pub fn estimate_size(&self) -> usize {
        let total: u64 = self
            .cells
            .iter()
            .map(|cell| u64::from(cell.count.unsigned_abs()))
            .sum();
        (total / 3) as usize
    }

    /// Recover the full difference, or `None` if the sketch holds more
    /// items than peeling can resolve.
    pub fn decode(&self) -> Option<DeltaDecode> {
        if self.cells.len() != self.profile.cells() {
            return None;
        }
        let cells_per_subtable = self.cells.len() / 3;
        let mut cells = self.cells.clone();
        let mut decoded = DeltaDecode::default();

        let mut queue: VecDeque<usize> = (0..cells.len())
            .filter(|&i| is_pure(&cells[i], self.salt, cells_per_subtable))
            .collect();

        // A valid sketch never yields more items than it has cells; past
        // that point the peel is extracting phantoms.
        let mut budget = cells.len();

        while let Some(idx) = queue.pop_front() {
            let cell = cells[idx];
            if !is_pure(&cell, self.salt, cells_per_subtable) {
                continue;
            }
            if budget == 0 {
                return None;
            }
            budget -= 1;

            let key = ContentHash::from_bytes(cell.key_xor);
            let side = cell.count;
            if side > 0 {
                decoded.local_only.push(key);
            } else {
                decoded.remote_only.push(key);
            }

            let (slots, check) = cell_slots(&key, self.salt, cells_per_subtable);
            for slot in slots {
                let target = &mut cells[slot];
                target.count -= side;
                xor_in_place(&mut target.key_xor, key.as_bytes());
                target.check_xor ^= check;
                if is_pure(target, self.salt, cells_per_subtable) {
                    queue.push_back(slot);
                }
            }
        }

        if cells.iter().all(DeltaCell::is_empty) {
            Some(decoded)
        } else {
            None
        }
    }
}

/// The three cell slots and the checksum for a hash.
///
/// One slot per subtable, so the slots of an item never collide with
/// each other.
fn cell_slots(hash: &ContentHash, salt: u64, cells_per_subtable: usize) -> ([usize; 3], u64) {
    let mut hasher = blake3::Hasher::new_derive_key(DELTA_INDEX_CONTEXT);
    hasher.update(&salt.to_le_bytes());
    hasher.update(hash.as_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();

    let mut slots = [0usize; 3];
    for (i, slot) in slots.iter_mut().enumerate() {
        let mut chunk = [0u8; 8];
        chunk.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
        *slot = i * cells_per_subtable + (u64::from_le_bytes(chunk) as usize % cells_per_subtable);
    }

    let mut check = [0u8; 8];
    check.copy_from_slice(&bytes[24..32]);
    (slots, u64::from_le_bytes(check))
}

/// A cell holds exactly one item when its count is `±1` and the checksum
/// recomputed from its key XOR matches.
fn is_pure(cell: &DeltaCell, salt: u64, cells_per_subtable: usize) -> bool {
    if cell.count != 1 && cell.count != -1 {
        return false;
    }
    let key = ContentHash::from_bytes(cell.key_xor);
    let (_, check) = cell_slots(&key, salt, cells_per_subtable);
    check == cell.check_xor
}

fn xor_in_place(dst: &mut [u8; 32], src: &[u8; 32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}
