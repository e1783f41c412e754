/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

/// Content with its line terminators removed.
///
/// `newlines` holds the position of every removed terminator, expressed
/// in the coordinate system of the stripped buffer; CRLF counts as one.
#[derive(Debug, Default, Clone)]
pub struct StrippedText {
    pub content: Vec<u8>,
    pub newlines: Vec<usize>,
    pub nlines: usize,
}

/// Strip `\r` and `\n` from decoded text, recording where each logical
/// newline sat and how many lines the part had.
pub fn strip_newlines(content: &[u8]) -> StrippedText {
    let mut stripped = StrippedText {
        content: Vec::with_capacity(content.len()),
        ..Default::default()
    };

    let mut i = 0;
    let mut line_has_bytes = false;
    while i < content.len() {
        match content[i] {
            b'\r' => {
                stripped.newlines.push(stripped.content.len());
                stripped.nlines += 1;
                line_has_bytes = false;
                if content.get(i + 1) == Some(&b'\n') {
                    i += 2;
                } else {
                    i += 1;
                }
            }
            b'\n' => {
                stripped.newlines.push(stripped.content.len());
                stripped.nlines += 1;
                line_has_bytes = false;
                i += 1;
            }
            b => {
                stripped.content.push(b);
                line_has_bytes = true;
                i += 1;
            }
        }
    }
    if line_has_bytes {
        stripped.nlines += 1;
    }

    stripped
}
