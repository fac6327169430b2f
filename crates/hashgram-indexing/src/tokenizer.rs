//! N-gram tokenizer.
//!
//! Splits a hash into every distinct contiguous window of `k` characters.
//! Windows are taken over `char`s, so non-ASCII input never splits a code
//! point.

use std::collections::BTreeSet;

use hashgram_types::{Posting, RecordId};

/// Tokenizer output for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tokens {
    /// The record had no usable hash field
    Malformed,
    /// Distinct n-grams; empty when the hash is shorter than `k`
    Grams(BTreeSet<String>),
}

impl Tokens {
    /// Number of distinct n-grams (zero for malformed input).
    pub fn len(&self) -> usize {
        match self {
            Tokens::Malformed => 0,
            Tokens::Grams(grams) => grams.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Turn the n-grams into postings for `record_id`.
    pub fn into_postings(self, record_id: RecordId) -> Vec<Posting> {
        match self {
            Tokens::Malformed => Vec::new(),
            Tokens::Grams(grams) => grams
                .into_iter()
                .map(|ngram| Posting::new(ngram, record_id))
                .collect(),
        }
    }
}

/// Tokenize a possibly missing hash.
pub fn tokenize(hash: Option<&str>, k: usize) -> Tokens {
    match hash {
        Some(hash) => Tokens::Grams(ngrams(hash, k)),
        None => Tokens::Malformed,
    }
}

/// All distinct windows of `k` characters in `hash`.
///
/// Returns the empty set when `hash` has fewer than `k` characters or `k`
/// is zero.
pub fn ngrams(hash: &str, k: usize) -> BTreeSet<String> {
    let mut grams = BTreeSet::new();
    if k == 0 {
        return grams;
    }

    // Byte offset of every char boundary, including the end of the string.
    let bounds: Vec<usize> = hash
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(hash.len()))
        .collect();

    if bounds.len() <= k {
        return grams;
    }

    for start in 0..bounds.len() - k {
        grams.insert(hash[bounds[start]..bounds[start + k]].to_string());
    }
    grams
}
