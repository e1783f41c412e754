/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::borrow::Cow;

use rust_stemmers::Algorithm;

/// Language-specific stemming behind a narrow interface so callers can
/// plug in their own lemmatizer. Returning `None` means "no change".
pub trait StemmerOracle {
    fn stem(&self, language: &str, word: &str) -> Option<String>;
}

/// Snowball algorithms by ISO language code. Codes without an algorithm
/// are left out; stemming is a no-op for them.
static STEMMER_MAP: &[(&str, Algorithm)] = &[
    ("ar", Algorithm::Arabic),
    ("da", Algorithm::Danish),
    ("de", Algorithm::German),
    ("el", Algorithm::Greek),
    ("en", Algorithm::English),
    ("es", Algorithm::Spanish),
    ("fi", Algorithm::Finnish),
    ("fr", Algorithm::French),
    ("hu", Algorithm::Hungarian),
    ("it", Algorithm::Italian),
    ("nl", Algorithm::Dutch),
    ("no", Algorithm::Norwegian),
    ("pt", Algorithm::Portuguese),
    ("ro", Algorithm::Romanian),
    ("ru", Algorithm::Russian),
    ("sv", Algorithm::Swedish),
    ("ta", Algorithm::Tamil),
    ("tr", Algorithm::Turkish),
];

/// Default oracle backed by the Snowball stemmers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnowballStemmer;

impl StemmerOracle for SnowballStemmer {
    fn stem(&self, language: &str, word: &str) -> Option<String> {
        let algorithm = STEMMER_MAP
            .iter()
            .find(|(code, _)| *code == language)
            .map(|(_, algorithm)| *algorithm)?;

        match rust_stemmers::Stemmer::create(algorithm).stem(word) {
            Cow::Owned(stemmed) => Some(stemmed),
            Cow::Borrowed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_known_languages() {
        let stemmer = SnowballStemmer;
        assert_eq!(stemmer.stem("en", "loving").as_deref(), Some("love"));
        assert_eq!(stemmer.stem("es", "queremos").as_deref(), Some("quer"));
    }

    #[test]
    fn unknown_language_is_a_no_op() {
        let stemmer = SnowballStemmer;
        assert_eq!(stemmer.stem("han", "loving"), None);
        assert_eq!(stemmer.stem("", "loving"), None);
    }
}
