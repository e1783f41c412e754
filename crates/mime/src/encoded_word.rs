/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::charset;
use crate::decode;

/// Decode all RFC 2047 encoded words in an unstructured header value.
///
/// Whitespace-only gaps between adjacent encoded words are dropped per
/// RFC 2047 §6.2; anything that fails to decode is kept verbatim.
pub fn decode_unstructured(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut remaining = text;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        if !last_was_encoded || !before.trim().is_empty() {
            out.push_str(before);
        }

        match decode_word(&remaining[start + 2..]) {
            Some((decoded, consumed)) => {
                out.push_str(&decoded);
                remaining = &remaining[start + 2 + consumed..];
                last_was_encoded = true;
            }
            None => {
                out.push_str("=?");
                remaining = &remaining[start + 2..];
                last_was_encoded = false;
            }
        }
    }
    out.push_str(remaining);

    out
}

/// Decode one `charset?encoding?text?=` tail. Returns the decoded text
/// and the number of bytes consumed.
fn decode_word(s: &str) -> Option<(String, usize)> {
    let (charset_label, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded = &rest[..end];
    let consumed = charset_label.len() + encoding.len() + end + 4;

    // An encoded word never spans whitespace.
    if charset_label.contains(char::is_whitespace) || encoded.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding {
        "b" | "B" => decode::decode_base64(encoded.as_bytes()).0,
        "q" | "Q" => decode_q(encoded.as_bytes()),
        _ => return None,
    };

    // RFC 2184 allows a trailing *language tag on the charset; drop it.
    let charset_label = charset_label.split('*').next().unwrap_or(charset_label);

    Some((charset::decode_lossy(charset_label, &bytes), consumed))
}

/// Q encoding: `_` is space regardless of charset, `=XX` is a byte.
fn decode_q(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if input.len() - i >= 3 => {
                match hex_pair(input[i + 1], input[i + 2]) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    out
}

pub(crate) fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi as u8) << 4 | lo as u8)
}
