/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use ahash::AHashMap;
use compact_str::CompactString;

use crate::encoded_word;

/// One parsed header record. `raw` holds the unfolded value bytes;
/// `decoded` resolves RFC 2047 encoded words to UTF-8 with replacement.
#[derive(Debug, Clone)]
pub struct Header {
    pub name: CompactString,
    pub name_lc: CompactString,
    pub raw: Vec<u8>,
    pub decoded: String,
    pub order: usize,
}

/// Insertion-ordered header collection with a lowercased-name index.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    headers: Vec<Header>,
    index: AHashMap<CompactString, Vec<usize>>,
}

impl HeaderMap {
    /// Parse a header block, unfolding continuation lines. Returns the
    /// map and the offset of the body (past the blank separator line).
    ///
    /// Lines without a colon that are not continuations are skipped; a
    /// missing blank line means the whole input is headers.
    pub fn parse(data: &[u8]) -> (Self, usize) {
        let mut map = HeaderMap::default();
        let mut pos = 0;
        let mut current: Option<(CompactString, Vec<u8>)> = None;

        while pos < data.len() {
            let line_end = memchr::memchr(b'\n', &data[pos..]).map(|i| pos + i);
            let next = line_end.map_or(data.len(), |e| e + 1);
            let mut line = &data[pos..line_end.unwrap_or(data.len())];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }

            if line.is_empty() {
                // End of the header block.
                map.flush(current.take());
                pos = next;
                break;
            }

            if line[0] == b' ' || line[0] == b'\t' {
                if let Some((_, value)) = current.as_mut() {
                    value.push(b' ');
                    value.extend_from_slice(trim_bytes(line));
                }
            } else if let Some(colon) = memchr::memchr(b':', line) {
                map.flush(current.take());
                let name = String::from_utf8_lossy(trim_bytes(&line[..colon]));
                current = Some((CompactString::from(name.as_ref()), trim_bytes(&line[colon + 1..]).to_vec()));
            }
            // Anything else is junk between headers; skip it.

            pos = next;
        }
        map.flush(current.take());

        (map, pos)
    }

    fn flush(&mut self, header: Option<(CompactString, Vec<u8>)>) {
        if let Some((name, raw)) = header {
            self.push(name, raw);
        }
    }

    pub fn push(&mut self, name: CompactString, raw: Vec<u8>) {
        let order = self.headers.len();
        let name_lc = CompactString::from(name.to_ascii_lowercase());
        let decoded = encoded_word::decode_unstructured(&String::from_utf8_lossy(&raw));
        self.index.entry(name_lc.clone()).or_default().push(order);
        self.headers.push(Header {
            name,
            name_lc,
            raw,
            decoded,
            order,
        });
    }

    /// All records for `field` (case-insensitive), in header order.
    pub fn by_name(&self, field: &str) -> Vec<&Header> {
        let field = field.to_ascii_lowercase();
        self.index
            .get(field.as_str())
            .map(|positions| positions.iter().map(|&i| &self.headers[i]).collect())
            .unwrap_or_default()
    }

    /// Like [`Self::by_name`], additionally filtering for an exact-case
    /// name match.
    pub fn by_name_strong(&self, field: &str) -> Vec<&Header> {
        self.by_name(field)
            .into_iter()
            .filter(|h| h.name == field)
            .collect()
    }

    pub fn first(&self, field: &str) -> Option<&Header> {
        let field = field.to_ascii_lowercase();
        self.index
            .get(field.as_str())
            .and_then(|positions| positions.first())
            .map(|&i| &self.headers[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

fn trim_bytes(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}
