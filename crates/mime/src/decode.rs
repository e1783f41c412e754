/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use tracing::debug;

use crate::encoded_word::hex_pair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    #[default]
    SevenBit,
    EightBit,
    Binary,
    QuotedPrintable,
    Base64,
    Unknown,
}

impl TransferEncoding {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "" | "7bit" => TransferEncoding::SevenBit,
            "8bit" => TransferEncoding::EightBit,
            "binary" => TransferEncoding::Binary,
            "quoted-printable" => TransferEncoding::QuotedPrintable,
            "base64" => TransferEncoding::Base64,
            other => {
                debug!(encoding = other, "unknown content transfer encoding");
                TransferEncoding::Unknown
            }
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TransferEncoding::Unknown)
    }
}

/// Decode a part body. Returns the decoded bytes and whether the input
/// was cut short (invalid base64 byte). Unknown encodings pass through.
pub fn decode_body(encoding: TransferEncoding, body: &[u8]) -> (Vec<u8>, bool) {
    match encoding {
        TransferEncoding::SevenBit
        | TransferEncoding::EightBit
        | TransferEncoding::Binary
        | TransferEncoding::Unknown => (body.to_vec(), false),
        TransferEncoding::QuotedPrintable => (decode_qp(body), false),
        TransferEncoding::Base64 => decode_base64(body),
    }
}

/// RFC 2045 quoted-printable. Soft breaks (`=` at end of line) are
/// discarded; a bare `=` followed by anything but two hex digits stays
/// literal. Never fails.
pub fn decode_qp(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let b = input[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }

        match input.get(i + 1) {
            Some(b'\n') => i += 2,
            Some(b'\r') if input.get(i + 2) == Some(&b'\n') => i += 3,
            Some(&hi) => match input.get(i + 2).and_then(|&lo| hex_pair(hi, lo)) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(b'=');
                    i += 1;
                }
            },
            None => {
                // Dangling escape at end of input.
                out.push(b'=');
                i += 1;
            }
        }
    }

    out
}

/// Tolerant base64: whitespace is skipped, `=` ends the data, and any
/// other invalid byte truncates the decode at that point. Returns the
/// decoded bytes and whether truncation happened.
pub fn decode_base64(input: &[u8]) -> (Vec<u8>, bool) {
    let mut out = Vec::with_capacity(input.len() / 4 * 3);
    let mut acc = 0u32;
    let mut bits = 0u8;
    let mut truncated = false;

    for &b in input {
        let value = match b {
            b'A'..=b'Z' => b - b'A',
            b'a'..=b'z' => b - b'a' + 26,
            b'0'..=b'9' => b - b'0' + 52,
            b'+' => 62,
            b'/' => 63,
            b' ' | b'\t' | b'\r' | b'\n' => continue,
            b'=' => break,
            _ => {
                debug!(byte = b, "invalid base64 byte, truncating");
                truncated = true;
                break;
            }
        };

        acc = acc << 6 | value as u32;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }

    (out, truncated)
}
