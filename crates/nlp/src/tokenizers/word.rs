/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use compact_str::CompactString;

use super::{ProcessException, EXCEPTION_SENTINEL};
use crate::language::stemmer::StemmerOracle;

/// Segment stripped content into words, honoring process exceptions.
///
/// A word is a maximal run of alphanumeric characters plus internal `'`
/// and `-`. Zero-length exceptions (stripped newlines) end the current
/// word; spliced regions additionally contribute the `!!EX!!` sentinel
/// and are skipped entirely. For non-UTF parts only ASCII alphanumerics
/// are considered.
///
/// `exceptions` must already be merged (sorted ascending, non-overlapping).
pub fn tokenize(content: &[u8], is_utf: bool, exceptions: &[ProcessException]) -> Vec<CompactString> {
    if is_utf {
        tokenize_str(&String::from_utf8_lossy(content), exceptions)
    } else {
        tokenize_bytes(content, exceptions)
    }
}

fn tokenize_str(text: &str, exceptions: &[ProcessException]) -> Vec<CompactString> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut exceptions = exceptions.iter().peekable();
    let mut skip_until = 0;

    for (pos, ch) in text.char_indices() {
        while let Some(ex) = exceptions.next_if(|ex| ex.pos <= pos) {
            flush(&mut word, &mut words);
            if ex.len > 0 {
                words.push(EXCEPTION_SENTINEL.into());
                skip_until = skip_until.max(ex.pos + ex.len);
            }
        }
        if pos < skip_until {
            continue;
        }
        if ch.is_alphanumeric() || ch == '\'' || ch == '-' {
            word.push(ch);
        } else {
            flush(&mut word, &mut words);
        }
    }
    flush(&mut word, &mut words);
    for ex in exceptions {
        if ex.len > 0 {
            words.push(EXCEPTION_SENTINEL.into());
        }
    }

    words
}

fn tokenize_bytes(content: &[u8], exceptions: &[ProcessException]) -> Vec<CompactString> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut exceptions = exceptions.iter().peekable();
    let mut skip_until = 0;

    for (pos, &b) in content.iter().enumerate() {
        while let Some(ex) = exceptions.next_if(|ex| ex.pos <= pos) {
            flush(&mut word, &mut words);
            if ex.len > 0 {
                words.push(EXCEPTION_SENTINEL.into());
                skip_until = skip_until.max(ex.pos + ex.len);
            }
        }
        if pos < skip_until {
            continue;
        }
        if b.is_ascii_alphanumeric() || b == b'\'' || b == b'-' {
            word.push(b as char);
        } else {
            flush(&mut word, &mut words);
        }
    }
    flush(&mut word, &mut words);
    for ex in exceptions {
        if ex.len > 0 {
            words.push(EXCEPTION_SENTINEL.into());
        }
    }

    words
}

fn flush(word: &mut String, words: &mut Vec<CompactString>) {
    if !word.is_empty() {
        let trimmed = word.trim_matches(|c| c == '\'' || c == '-');
        if !trimmed.is_empty() {
            words.push(trimmed.into());
        }
        word.clear();
    }
}

/// Lowercase, optionally stem, and hash every word in place, returning
/// the parallel hash sequence.
///
/// Stemming runs only for UTF parts that carry a detected language code;
/// parts with no detected language keep their words unstemmed. The
/// sentinel contributes no hash.
pub fn normalize_and_hash(
    words: &mut [CompactString],
    is_utf: bool,
    language: Option<&str>,
    stemmer: &dyn StemmerOracle,
) -> Vec<u64> {
    let language = language.filter(|l| !l.is_empty() && is_utf);
    let mut hashes = Vec::with_capacity(words.len());

    for word in words.iter_mut() {
        if word.is_empty() || word.as_str() == EXCEPTION_SENTINEL {
            continue;
        }

        if is_utf {
            if word.chars().any(char::is_uppercase) {
                *word = word.to_lowercase().into();
            }
        } else if word.bytes().any(|b| b.is_ascii_uppercase()) {
            *word = word.to_ascii_lowercase().into();
        }

        if let Some(language) = language {
            if let Some(stemmed) = stemmer.stem(language, word.as_str()) {
                *word = stemmed.into();
            }
        }

        hashes.push(super::hash_word(word.as_bytes()));
    }

    hashes
}
