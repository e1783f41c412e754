/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::ops::Range;

use memchr::memchr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::decode::{self, TransferEncoding};
use crate::headers::HeaderMap;
use crate::{ContentDisposition, ContentType, MimePart, PartFlags, PartKind};

/// Maximum multipart/message nesting. Anything deeper is attached as a
/// single opaque part instead of being descended into.
pub const MAX_NESTING: usize = 20;

#[derive(Debug, Error)]
pub enum MimeError {
    #[error("no parseable headers at offset {offset}")]
    NoHeaders { offset: usize },
}

/// Parse a full message into its flat part sequence (depth-first
/// pre-order). Malformed structure degrades to broken or truncated
/// parts; the only failure is a message with no headers at all.
pub fn parse_message(data: &[u8]) -> Result<Vec<MimePart>, MimeError> {
    let (headers, body) = HeaderMap::parse(data);
    if headers.is_empty() {
        return Err(MimeError::NoHeaders { offset: 0 });
    }

    let mut parser = Parser {
        data,
        parts: Vec::new(),
    };
    parser.parse_part(headers, body..data.len(), None, 0);

    Ok(parser.parts)
}

struct Parser<'a> {
    data: &'a [u8],
    parts: Vec<MimePart>,
}

struct Boundary {
    line_start: usize,
    content_start: usize,
    closing: bool,
}

impl Parser<'_> {
    fn parse_part(
        &mut self,
        headers: HeaderMap,
        body: Range<usize>,
        parent: Option<usize>,
        depth: usize,
    ) {
        let ct = headers
            .first("content-type")
            .and_then(|h| ContentType::parse(&h.decoded))
            .unwrap_or_else(ContentType::text_plain);
        let cd = headers
            .first("content-disposition")
            .and_then(|h| ContentDisposition::parse(&h.decoded));

        if depth >= MAX_NESTING && (ct.is_multipart() || ct.is_message()) {
            warn!(depth, ct = %ct.full_type(), "nesting limit hit, attaching opaque part");
            self.push_raw(headers, ct, cd, body, parent, PartFlags::OPAQUE, PartKind::Other);
            return;
        }

        if ct.is_multipart() {
            match ct.boundary().map(str::to_string) {
                Some(boundary) => {
                    self.parse_multipart(headers, ct, cd, body, parent, depth, &boundary)
                }
                None => {
                    debug!("multipart part without boundary parameter");
                    self.push_raw(
                        headers,
                        ct,
                        cd,
                        body,
                        parent,
                        PartFlags::BROKEN | PartFlags::MULTIPART,
                        PartKind::Other,
                    );
                }
            }
        } else if ct.is_message() {
            let idx = self.push_container(headers, ct, cd, body.clone(), parent, PartKind::Message);
            let (sub_headers, sub_offset) = HeaderMap::parse(&self.data[body.clone()]);
            if sub_headers.is_empty() {
                self.parts[idx].flags |= PartFlags::BROKEN;
            } else {
                self.parse_part(sub_headers, body.start + sub_offset..body.end, Some(idx), depth + 1);
            }
        } else {
            self.push_leaf(headers, ct, cd, body, parent);
        }
    }

    fn parse_multipart(
        &mut self,
        headers: HeaderMap,
        ct: ContentType,
        cd: Option<ContentDisposition>,
        body: Range<usize>,
        parent: Option<usize>,
        depth: usize,
        boundary: &str,
    ) {
        let marker = format!("--{boundary}");
        let bounds = self.scan_boundaries(&body, marker.as_bytes());

        if bounds.is_empty() {
            // No delimiter ever appears: the bytes stay with this part.
            debug!(boundary, "multipart boundary never found");
            self.push_raw(
                headers,
                ct,
                cd,
                body,
                parent,
                PartFlags::BROKEN | PartFlags::MULTIPART,
                PartKind::Other,
            );
            return;
        }

        let closed = bounds.last().is_some_and(|b| b.closing);
        let mut flags = PartFlags::MULTIPART;
        if !closed {
            flags |= PartFlags::TRUNCATED;
        }
        let idx = self.push_container_flags(headers, ct, cd, body.clone(), parent, PartKind::Multipart, flags);

        for (i, bound) in bounds.iter().enumerate() {
            if bound.closing {
                break;
            }
            let content_start = bound.content_start;
            let content_end = bounds
                .get(i + 1)
                .map(|next| strip_line_terminator(self.data, content_start, next.line_start))
                .unwrap_or(body.end)
                .max(content_start);

            let child = content_start..content_end;
            let child_root = self.parts.len();
            let (child_headers, child_offset) = HeaderMap::parse(&self.data[child.clone()]);
            self.parse_part(
                child_headers,
                child.start + child_offset..child.end,
                Some(idx),
                depth + 1,
            );
            if !closed && i == bounds.len() - 1 && child_root < self.parts.len() {
                self.parts[child_root].flags |= PartFlags::TRUNCATED;
            }
        }
    }

    fn scan_boundaries(&self, body: &Range<usize>, marker: &[u8]) -> Vec<Boundary> {
        let mut bounds = Vec::new();
        let mut pos = body.start;

        while pos < body.end {
            let line_end = memchr(b'\n', &self.data[pos..body.end]).map(|i| pos + i);
            let next = line_end.map_or(body.end, |e| e + 1);
            let mut line = &self.data[pos..line_end.unwrap_or(body.end)];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }

            if let Some(rest) = line.strip_prefix(marker) {
                let rest = trim_transport_padding(rest);
                if rest.is_empty() || rest == b"--" {
                    let closing = rest == b"--";
                    bounds.push(Boundary {
                        line_start: pos,
                        content_start: next,
                        closing,
                    });
                    if closing {
                        break;
                    }
                }
            }
            pos = next;
        }

        bounds
    }

    fn push_leaf(
        &mut self,
        headers: HeaderMap,
        ct: ContentType,
        cd: Option<ContentDisposition>,
        body: Range<usize>,
        parent: Option<usize>,
    ) {
        let cte = headers
            .first("content-transfer-encoding")
            .map(|h| TransferEncoding::parse(&h.decoded))
            .unwrap_or_default();
        let (parsed, truncated) = decode::decode_body(cte, &self.data[body.clone()]);

        let mut flags = PartFlags::empty();
        if cte.is_unknown() {
            flags |= PartFlags::BROKEN;
        }
        if truncated {
            flags |= PartFlags::TRUNCATED;
        }
        if ct.is_text() {
            flags |= PartFlags::TEXT;
        }
        if cd.as_ref().is_some_and(ContentDisposition::is_attachment) {
            flags |= PartFlags::ATTACHMENT;
        }

        let digest = *blake3::hash(&parsed).as_bytes();
        let kind = PartKind::classify(&ct);
        self.parts.push(MimePart {
            headers,
            ct,
            cd,
            raw: body,
            parsed,
            parent,
            digest,
            flags,
            kind,
        });
    }

    fn push_raw(
        &mut self,
        headers: HeaderMap,
        ct: ContentType,
        cd: Option<ContentDisposition>,
        body: Range<usize>,
        parent: Option<usize>,
        flags: PartFlags,
        kind: PartKind,
    ) {
        let parsed = self.data[body.clone()].to_vec();
        let digest = *blake3::hash(&parsed).as_bytes();
        self.parts.push(MimePart {
            headers,
            ct,
            cd,
            raw: body,
            parsed,
            parent,
            digest,
            flags,
            kind,
        });
    }

    fn push_container(
        &mut self,
        headers: HeaderMap,
        ct: ContentType,
        cd: Option<ContentDisposition>,
        body: Range<usize>,
        parent: Option<usize>,
        kind: PartKind,
    ) -> usize {
        self.push_container_flags(headers, ct, cd, body, parent, kind, PartFlags::empty())
    }

    #[allow(clippy::too_many_arguments)]
    fn push_container_flags(
        &mut self,
        headers: HeaderMap,
        ct: ContentType,
        cd: Option<ContentDisposition>,
        body: Range<usize>,
        parent: Option<usize>,
        kind: PartKind,
        mut flags: PartFlags,
    ) -> usize {
        if matches!(kind, PartKind::Multipart) {
            flags |= PartFlags::MULTIPART;
        }
        let idx = self.parts.len();
        self.parts.push(MimePart {
            headers,
            ct,
            cd,
            raw: body,
            parsed: Vec::new(),
            parent,
            digest: *blake3::hash(b"").as_bytes(),
            flags,
            kind,
        });
        idx
    }
}

/// The line terminator preceding a boundary delimiter belongs to the
/// delimiter, not to the part content.
fn strip_line_terminator(data: &[u8], content_start: usize, line_start: usize) -> usize {
    let mut end = line_start;
    if end > content_start && data[end - 1] == b'\n' {
        end -= 1;
        if end > content_start && data[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}

fn trim_transport_padding(mut rest: &[u8]) -> &[u8] {
    while let [head @ .., b' ' | b'\t'] = rest {
        rest = head;
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALTERNATIVE: &[u8] = b"From: a@example.com\r\n\
Content-Type: multipart/alternative; boundary=\"sep\"\r\n\
\r\n\
preamble\r\n\
--sep\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello plain\r\n\
--sep\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>hello html</p>\r\n\
--sep--\r\n\
epilogue\r\n";

    #[test]
    fn multipart_alternative_structure() {
        let parts = parse_message(ALTERNATIVE).unwrap();
        assert_eq!(parts.len(), 3);

        assert!(matches!(parts[0].kind, PartKind::Multipart));
        assert_eq!(parts[0].parent, None);
        assert_eq!(parts[0].ct.subtype, "alternative");

        assert_eq!(parts[1].parent, Some(0));
        assert_eq!(parts[1].parsed, b"hello plain");
        assert!(parts[1].is_text());

        assert_eq!(parts[2].parent, Some(0));
        assert_eq!(parts[2].parsed, b"<p>hello html</p>");
        assert!(parts[2].ct.is_html());
    }

    #[test]
    fn simple_message_is_one_text_part() {
        let parts = parse_message(b"Subject: hi\r\n\r\njust text\r\n").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].parsed, b"just text\r\n");
        assert!(matches!(parts[0].kind, PartKind::Text { .. }));
    }

    #[test]
    fn base64_leaf_is_decoded() {
        let parts = parse_message(
            b"Content-Type: text/plain\r\nContent-Transfer-Encoding: base64\r\n\r\naGVsbG8gd29ybGQ=\r\n",
        )
        .unwrap();
        assert_eq!(parts[0].parsed, b"hello world");
    }

    #[test]
    fn quoted_printable_leaf_is_decoded() {
        let parts = parse_message(
            b"Content-Type: text/plain\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\ncaf=E9 au=\r\n lait",
        )
        .unwrap();
        assert_eq!(parts[0].parsed, b"caf\xe9 au lait");
    }

    #[test]
    fn missing_boundary_parameter_degrades_to_broken_leaf() {
        let parts =
            parse_message(b"Content-Type: multipart/mixed\r\n\r\nopaque bytes\r\n").unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].flags.contains(PartFlags::BROKEN));
        assert_eq!(parts[0].parsed, b"opaque bytes\r\n");
    }

    #[test]
    fn absent_boundary_keeps_body_on_enclosing_part() {
        let parts = parse_message(
            b"Content-Type: multipart/mixed; boundary=\"never\"\r\n\r\nno delimiters here\r\n",
        )
        .unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].flags.contains(PartFlags::BROKEN));
        assert_eq!(parts[0].parsed, b"no delimiters here\r\n");
    }

    #[test]
    fn unterminated_multipart_is_truncated() {
        let parts = parse_message(
            b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n--b\r\nContent-Type: text/plain\r\n\r\ncut off",
        )
        .unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].flags.contains(PartFlags::TRUNCATED));
        assert!(parts[1].flags.contains(PartFlags::TRUNCATED));
        assert_eq!(parts[1].parsed, b"cut off");
    }

    #[test]
    fn nested_message_is_descended() {
        let parts = parse_message(
            b"Content-Type: message/rfc822\r\n\r\nSubject: inner\r\nContent-Type: text/plain\r\n\r\ninner body\r\n",
        )
        .unwrap();
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[0].kind, PartKind::Message));
        assert_eq!(parts[1].parent, Some(0));
        assert_eq!(parts[1].parsed, b"inner body\r\n");
    }

    #[test]
    fn nesting_limit_attaches_opaque_part() {
        let mut message = Vec::new();
        for i in 0..(MAX_NESTING + 2) {
            message.extend_from_slice(
                format!(
                    "Content-Type: multipart/mixed; boundary=\"b{i}\"\r\n\r\n--b{i}\r\n"
                )
                .as_bytes(),
            );
        }
        message.extend_from_slice(b"Content-Type: text/plain\r\n\r\ndeep\r\n");

        let parts = parse_message(&message).unwrap();
        assert!(parts
            .iter()
            .any(|p| p.flags.contains(PartFlags::OPAQUE)));
        // Traversal stopped at the limit instead of recursing forever.
        assert!(parts.len() <= MAX_NESTING + 1);
    }

    #[test]
    fn digest_is_deterministic() {
        let a = parse_message(ALTERNATIVE).unwrap();
        let b = parse_message(ALTERNATIVE).unwrap();
        for (pa, pb) in a.iter().zip(b.iter()) {
            assert_eq!(pa.digest, pb.digest);
        }
    }

    #[test]
    fn headerless_input_is_rejected() {
        assert!(parse_message(b"no colon separated lines at all").is_err());
    }
}
