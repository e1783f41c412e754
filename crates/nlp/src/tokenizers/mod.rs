/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod word;

use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;

/// Marker inserted into the token stream wherever a spliced-out region
/// (an extracted URL or generated content) interrupted the text. It is
/// never normalized, stemmed, or hashed.
pub const EXCEPTION_SENTINEL: &str = "!!EX!!";

/// Fixed seed for the per-token hash, kept stable so the hashes can feed
/// shingle computation later.
pub const WORDS_HASH_SEED: u64 = 0xdead_babe;

/// A byte region of stripped content that tokenization must not descend
/// into. Newline exceptions are zero-length break points; URL and
/// generated-content exceptions cover the spliced region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessException {
    pub pos: usize,
    pub len: usize,
    pub kind: ExceptionKind,
}

/// Exception kinds, declared in dedup-priority order: when two exceptions
/// share a position, the lower discriminant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExceptionKind {
    Url,
    Generated,
    Newline,
}

impl ProcessException {
    pub fn newline(pos: usize) -> Self {
        ProcessException {
            pos,
            len: 0,
            kind: ExceptionKind::Newline,
        }
    }
}

/// Sort exceptions ascending by position and collapse duplicates on the
/// same position, keeping the highest-priority kind (Url > Generated >
/// Newline). Exceptions that begin inside an earlier spliced region are
/// dropped so the final list never overlaps.
pub fn merge_exceptions(exceptions: &mut Vec<ProcessException>) {
    exceptions.sort_by(|a, b| a.pos.cmp(&b.pos).then(a.kind.cmp(&b.kind)));
    exceptions.dedup_by_key(|ex| ex.pos);

    let mut end = 0;
    exceptions.retain(|ex| {
        if ex.pos < end {
            false
        } else {
            end = ex.pos + ex.len;
            true
        }
    });
}

/// Hash a normalized token with the fixed seed.
pub fn hash_word(word: &[u8]) -> u64 {
    let mut hasher = RandomState::with_seeds(
        WORDS_HASH_SEED,
        WORDS_HASH_SEED,
        WORDS_HASH_SEED,
        WORDS_HASH_SEED,
    )
    .build_hasher();
    hasher.write(word);
    hasher.finish()
}
