//! Bitsets used by the index.
//!
//! `SparseBitset` is the compressed set of Morton codes that the coarse and fine bitmask indices are built from. It is word-aligned:
//! bits are grouped into 64-bit words and only non-zero words are stored, keyed by word index. This makes it practical to hold
//! sets over domains like `[0, 2^63)` while keeping set algebra a word-at-a-time operation.
//!
//! `Bitset8` is a single byte of flags, used to pack one bit per octree node when serializing tree topology.

use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap};
use std::iter::FromIterator;

const WORD_BITS: u64 = 64;

/// A word-aligned compressed bitset over `u64` bit indices.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SparseBitset {
    // Invariant: no stored word is zero.
    words: BTreeMap<u64, u64>,
}

impl SparseBitset {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set(&mut self, bit: u64) {
        *self.words.entry(bit / WORD_BITS).or_insert(0) |= 1 << (bit % WORD_BITS);
    }

    #[inline]
    pub fn get(&self, bit: u64) -> bool {
        self.words
            .get(&(bit / WORD_BITS))
            .map_or(false, |w| w & (1 << (bit % WORD_BITS)) != 0)
    }

    /// Clears every bit.
    pub fn reset(&mut self) {
        self.words.clear();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn number_of_ones(&self) -> u64 {
        self.words.values().map(|w| u64::from(w.count_ones())).sum()
    }

    pub fn logical_and(&self, other: &Self) -> Self {
        let (small, large) = self.smaller_first(other);
        let words = small
            .words
            .iter()
            .filter_map(|(i, a)| {
                large
                    .words
                    .get(i)
                    .map(|b| (*i, a & b))
                    .filter(|(_, w)| *w != 0)
            })
            .collect();

        Self { words }
    }

    pub fn logical_or(&self, other: &Self) -> Self {
        let (small, large) = self.smaller_first(other);
        let mut out = large.clone();
        out.union_with(small);

        out
    }

    /// In-place `self |= other`.
    pub fn union_with(&mut self, other: &Self) {
        for (i, w) in other.words.iter() {
            *self.words.entry(*i).or_insert(0) |= w;
        }
    }

    /// Equivalent to `!self.logical_and(other).is_empty()` without allocating.
    pub fn intersects(&self, other: &Self) -> bool {
        let (small, large) = self.smaller_first(other);

        small
            .words
            .iter()
            .any(|(i, a)| large.words.get(i).map_or(false, |b| a & b != 0))
    }

    /// Iterates the set bits in increasing order.
    pub fn iter_ones(&self) -> impl '_ + Iterator<Item = u64> {
        self.words.iter().flat_map(|(&i, &w)| WordBits {
            base: i * WORD_BITS,
            word: w,
        })
    }

    /// Iterates the non-zero `(word_index, word)` pairs in increasing order of word index.
    pub fn words(&self) -> btree_map::Iter<'_, u64, u64> {
        self.words.iter()
    }

    /// The number of stored (non-zero) words.
    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    fn smaller_first<'a>(&'a self, other: &'a Self) -> (&'a Self, &'a Self) {
        if self.words.len() <= other.words.len() {
            (self, other)
        } else {
            (other, self)
        }
    }
}

impl FromIterator<u64> for SparseBitset {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);

        set
    }
}

impl Extend<u64> for SparseBitset {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        for bit in iter {
            self.set(bit);
        }
    }
}

struct WordBits {
    base: u64,
    word: u64,
}

impl Iterator for WordBits {
    type Item = u64;

    #[inline]
    fn next(&mut self) -> Option<u64> {
        if self.word == 0 {
            return None;
        }
        let tz = u64::from(self.word.trailing_zeros());
        self.word &= self.word - 1;

        Some(self.base + tz)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Bitset8 {
    pub bits: u8,
}

impl Bitset8 {
    #[inline]
    pub fn bit_is_set(&self, bit: u8) -> bool {
        self.bits & (1 << bit) != 0
    }

    #[inline]
    pub fn any(&self) -> bool {
        self.bits != 0
    }

    #[inline]
    pub fn set_bit(&mut self, bit: u8) {
        self.bits |= 1 << bit;
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
