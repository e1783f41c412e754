/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod charset;
pub mod decode;
pub mod encoded_word;
pub mod headers;
pub mod parser;

use std::ops::Range;

use compact_str::CompactString;

use crate::headers::HeaderMap;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PartFlags: u32 {
        /// Part carries a text content type.
        const TEXT = 1 << 0;
        /// Content-Disposition marked the part as an attachment.
        const ATTACHMENT = 1 << 1;
        /// The part structure was malformed; contents are best-effort.
        const BROKEN = 1 << 2;
        /// Input ended mid-part; the partial content is retained.
        const TRUNCATED = 1 << 3;
        /// A policy limit was exceeded; the part is kept opaque.
        const OPAQUE = 1 << 4;
        const MULTIPART = 1 << 5;
    }
}

/// Parsed `Content-Type` value: lowercased type and subtype plus the raw
/// parameter list in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub ctype: CompactString,
    pub subtype: CompactString,
    pub params: Vec<(CompactString, String)>,
}

impl ContentType {
    pub fn parse(value: &str) -> Option<Self> {
        let mut segments = value.split(';');
        let full_type = segments.next()?.trim();
        if full_type.is_empty() {
            return None;
        }
        let (ctype, subtype) = match full_type.split_once('/') {
            Some((t, s)) => (t.trim(), s.trim()),
            None => (full_type, ""),
        };

        let mut params = Vec::new();
        for segment in segments {
            if let Some((name, value)) = segment.split_once('=') {
                params.push((
                    CompactString::from(name.trim().to_ascii_lowercase()),
                    unquote(value.trim()),
                ));
            }
        }

        Some(ContentType {
            ctype: ctype.to_ascii_lowercase().into(),
            subtype: subtype.to_ascii_lowercase().into(),
            params,
        })
    }

    pub fn text_plain() -> Self {
        ContentType {
            ctype: "text".into(),
            subtype: "plain".into(),
            params: Vec::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary").filter(|b| !b.is_empty())
    }

    pub fn is_multipart(&self) -> bool {
        self.ctype == "multipart"
    }

    pub fn is_message(&self) -> bool {
        self.ctype == "message" && self.subtype == "rfc822"
    }

    pub fn is_text(&self) -> bool {
        self.ctype == "text"
    }

    pub fn is_html(&self) -> bool {
        self.is_text() && (self.subtype == "html" || self.subtype == "xhtml")
    }

    pub fn full_type(&self) -> String {
        format!("{}/{}", self.ctype, self.subtype)
    }
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        if inner.contains('\\') {
            let mut out = String::with_capacity(inner.len());
            let mut escaped = false;
            for ch in inner.chars() {
                if escaped {
                    out.push(ch);
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else {
                    out.push(ch);
                }
            }
            out
        } else {
            inner.to_string()
        }
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispositionKind {
    Inline,
    Attachment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    pub kind: DispositionKind,
    pub filename: Option<String>,
}

impl ContentDisposition {
    pub fn parse(value: &str) -> Option<Self> {
        let mut segments = value.split(';');
        let kind = match segments.next()?.trim().to_ascii_lowercase().as_str() {
            "attachment" => DispositionKind::Attachment,
            _ => DispositionKind::Inline,
        };
        let filename = segments.find_map(|segment| {
            let (name, value) = segment.split_once('=')?;
            if name.trim().eq_ignore_ascii_case("filename") {
                Some(unquote(value))
            } else {
                None
            }
        });

        Some(ContentDisposition { kind, filename })
    }

    pub fn is_attachment(&self) -> bool {
        self.kind == DispositionKind::Attachment
    }
}

/// Closed set of type-specific payloads; dispatch happens on this tag
/// rather than on content-type strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartKind {
    /// Index into the task's text-part sequence, filled in once the text
    /// pipeline has run over the part.
    Text { text_part: Option<usize> },
    Multipart,
    Message,
    Image,
    Archive,
    Other,
}

impl PartKind {
    pub fn classify(ct: &ContentType) -> Self {
        if ct.is_text() {
            PartKind::Text { text_part: None }
        } else if ct.is_multipart() {
            PartKind::Multipart
        } else if ct.is_message() {
            PartKind::Message
        } else if ct.ctype == "image" {
            PartKind::Image
        } else if ct.ctype == "application"
            && matches!(
                ct.subtype.as_str(),
                "zip"
                    | "x-zip-compressed"
                    | "x-rar"
                    | "x-rar-compressed"
                    | "x-tar"
                    | "x-7z-compressed"
                    | "gzip"
                    | "x-gzip"
            )
        {
            PartKind::Archive
        } else {
            PartKind::Other
        }
    }
}

/// One node of the MIME tree. Parts are stored flat in depth-first
/// pre-order; `parent` is an index into the same sequence and is only
/// used for sibling lookups after construction.
#[derive(Debug, Clone)]
pub struct MimePart {
    pub headers: HeaderMap,
    pub ct: ContentType,
    pub cd: Option<ContentDisposition>,
    /// Body region within the raw message.
    pub raw: Range<usize>,
    /// Transfer-decoded content.
    pub parsed: Vec<u8>,
    pub parent: Option<usize>,
    pub digest: [u8; 32],
    pub flags: PartFlags,
    pub kind: PartKind,
}

impl MimePart {
    pub fn is_text(&self) -> bool {
        self.flags.contains(PartFlags::TEXT)
    }

    pub fn is_attachment(&self) -> bool {
        self.cd.as_ref().is_some_and(ContentDisposition::is_attachment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_with_params() {
        let ct = ContentType::parse("Multipart/Alternative; boundary=\"b 1\"; charset=UTF-8")
            .unwrap();
        assert_eq!(ct.ctype, "multipart");
        assert_eq!(ct.subtype, "alternative");
        assert_eq!(ct.boundary(), Some("b 1"));
        assert_eq!(ct.charset(), Some("UTF-8"));
        assert!(ct.is_multipart());
    }

    #[test]
    fn content_type_without_subtype() {
        let ct = ContentType::parse("text").unwrap();
        assert_eq!(ct.ctype, "text");
        assert_eq!(ct.subtype, "");
        assert!(ct.is_text());
    }

    #[test]
    fn disposition_attachment_with_filename() {
        let cd = ContentDisposition::parse("attachment; filename=\"report.pdf\"").unwrap();
        assert!(cd.is_attachment());
        assert_eq!(cd.filename.as_deref(), Some("report.pdf"));
    }

    #[test]
    fn disposition_defaults_to_inline() {
        let cd = ContentDisposition::parse("inline").unwrap();
        assert!(!cd.is_attachment());
    }

    #[test]
    fn quoted_parameter_with_escapes() {
        let ct = ContentType::parse(r#"application/zip; name="a \"b\".zip""#).unwrap();
        assert_eq!(ct.param("name"), Some(r#"a "b".zip"#));
        assert!(matches!(PartKind::classify(&ct), PartKind::Archive));
    }
}
