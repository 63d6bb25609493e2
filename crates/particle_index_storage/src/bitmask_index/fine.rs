use crate::{bitset::SparseBitset, SmallKeyHashMap};

use particle_index_core::{check_sorted, prelude::*, Error, Result};

use std::collections::BTreeMap;

/// The fine cells one file occupies within one coarse cell.
#[derive(Clone, Debug, Default)]
pub struct FineEntry {
    bits: SparseBitset,
    last: Option<u64>,
}

impl FineEntry {
    #[inline]
    pub fn bits(&self) -> &SparseBitset {
        &self.bits
    }

    /// The greatest fine code inserted so far.
    #[inline]
    pub fn last(&self) -> Option<u64> {
        self.last
    }
}

/// Per coarse cell, per file, the set of occupied fine cells.
///
/// Entries are append-only and must be fed in non-decreasing order of fine code; that keeps each entry's bitset building
/// word-by-word from the low end, and is checked rather than assumed.
#[derive(Clone, Debug, Default)]
pub struct FineBitmaskMap {
    cells: BTreeMap<u64, SmallKeyHashMap<FileId, FineEntry>>,
}

impl FineBitmaskMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `fine_codes` to the entry of (`coarse`, `file`). Fails without modifying anything if the codes decrease, either
    /// within `fine_codes` or relative to what the entry already holds.
    pub fn insert_sorted(&mut self, coarse: u64, file: FileId, fine_codes: &[u64]) -> Result<()> {
        let first = match fine_codes.first() {
            Some(&first) => first,
            None => return Ok(()),
        };
        check_sorted(fine_codes, "fine bitmask insert")?;

        let entry = self.cells.entry(coarse).or_default().entry(file).or_default();
        if let Some(last) = entry.last {
            if first < last {
                return Err(Error::UnsortedInput {
                    context: "fine bitmask insert",
                    previous: last,
                    current: first,
                });
            }
        }
        entry.bits.extend(fine_codes.iter().cloned());
        entry.last = fine_codes.last().cloned();

        Ok(())
    }

    #[inline]
    pub fn get(&self, coarse: u64, file: FileId) -> Option<&FineEntry> {
        self.cells.get(&coarse).and_then(|files| files.get(&file))
    }

    /// All entries of one coarse cell.
    #[inline]
    pub fn cell(&self, coarse: u64) -> Option<&SmallKeyHashMap<FileId, FineEntry>> {
        self.cells.get(&coarse)
    }

    /// Coarse cells with any fine data, in increasing order.
    pub fn coarse_codes(&self) -> impl '_ + Iterator<Item = u64> {
        self.cells.keys().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
