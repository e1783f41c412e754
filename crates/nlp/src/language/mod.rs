/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod stemmer;

use unicode_script::{Script, UnicodeScript};

/// How many alphabetic code points to examine before deciding.
const MAX_SCRIPT_CHARS: usize = 32;

/// Fixed writing-system to ISO language code table. Ties between scripts
/// with equal tallies resolve to the earliest entry.
static LANGUAGE_SCRIPTS: &[(Script, &str)] = &[
    (Script::Cyrillic, "ru"),
    (Script::Latin, "en"),
    (Script::Arabic, "ar"),
    (Script::Han, "han"),
    (Script::Greek, "el"),
    (Script::Hebrew, "he"),
    (Script::Armenian, "hy"),
    (Script::Bengali, "bn"),
    (Script::Cherokee, "chr"),
    (Script::Devanagari, "hi"),
    (Script::Ethiopic, "am"),
    (Script::Georgian, "ka"),
    (Script::Gujarati, "gu"),
    (Script::Gurmukhi, "pa"),
    (Script::Hangul, "ko"),
    (Script::Hiragana, "ja"),
    (Script::Katakana, "ja"),
    (Script::Kannada, "kn"),
    (Script::Khmer, "km"),
    (Script::Lao, "lo"),
    (Script::Malayalam, "ml"),
    (Script::Mongolian, "mn"),
    (Script::Myanmar, "my"),
    (Script::Oriya, "or"),
    (Script::Sinhala, "si"),
    (Script::Syriac, "syr"),
    (Script::Tagalog, "tl"),
    (Script::Tamil, "ta"),
    (Script::Telugu, "te"),
    (Script::Thaana, "dv"),
    (Script::Thai, "th"),
    (Script::Tibetan, "bo"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedScript {
    pub script: Script,
    pub language: &'static str,
}

/// Detect the dominant writing system of a decoded UTF-8 part by tallying
/// the scripts of its first alphabetic code points.
///
/// Common and Inherited characters are skipped while tallying; when no
/// tallied script appears at all the result falls back to English.
pub fn detect_script(text: &str) -> DetectedScript {
    let mut counts = [0usize; LANGUAGE_SCRIPTS.len()];
    let mut processed = 0;

    for ch in text.chars() {
        if processed >= MAX_SCRIPT_CHARS {
            break;
        }
        if !ch.is_alphabetic() {
            continue;
        }
        processed += 1;

        let script = ch.script();
        if script == Script::Common || script == Script::Inherited {
            continue;
        }
        if let Some(slot) = LANGUAGE_SCRIPTS.iter().position(|(s, _)| *s == script) {
            counts[slot] += 1;
        }
    }

    let mut best = None;
    for (slot, &count) in counts.iter().enumerate() {
        if count > 0 && best.map_or(true, |(_, max)| count > max) {
            best = Some((slot, count));
        }
    }

    match best {
        Some((slot, _)) => DetectedScript {
            script: LANGUAGE_SCRIPTS[slot].0,
            language: LANGUAGE_SCRIPTS[slot].1,
        },
        None => DetectedScript {
            script: Script::Common,
            language: "en",
        },
    }
}
