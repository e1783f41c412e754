/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use encoding_rs::Encoding;
use tracing::debug;

/// Decode `bytes` according to a charset label, replacing invalid
/// sequences. Unknown labels fall back to lossy UTF-8.
pub fn decode_lossy(label: &str, bytes: &[u8]) -> String {
    match Encoding::for_label(label.trim().as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => {
            debug!(charset = label, "unknown charset, decoding as lossy utf-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Convert part content to UTF-8 using the declared charset, if any.
///
/// Returns the converted bytes and whether the result is valid UTF-8.
/// Content with no recognizable charset that is not valid UTF-8 is
/// returned untouched and flagged raw.
pub fn to_utf8(bytes: &[u8], charset: Option<&str>) -> (Vec<u8>, bool) {
    if let Some(label) = charset {
        if let Some(encoding) = Encoding::for_label(label.trim().as_bytes()) {
            let (decoded, _, _) = encoding.decode(bytes);
            return (decoded.into_owned().into_bytes(), true);
        }
        debug!(charset = label, "unsupported charset, keeping raw bytes");
    }

    if std::str::from_utf8(bytes).is_ok() {
        (bytes.to_vec(), true)
    } else {
        (bytes.to_vec(), false)
    }
}
