/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::net::IpAddr;
use std::ops::Range;

use compact_str::CompactString;
use mime::headers::{Header, HeaderMap};
use mime::MimePart;
use nlp::language::stemmer::{SnowballStemmer, StemmerOracle};
use nlp::tokenizers::ProcessException;
use serde::Deserialize;
use utils::pool::ScopedPool;

use crate::addr::{Email, Recipient};
use crate::html::HtmlLink;
use crate::received::ReceivedHeader;
use crate::url::{PslTld, TldOracle, Url};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TaskFlags: u32 {
        /// Input is expected to be a MIME message.
        const MIME = 1 << 0;
        /// Input arrived in JSON envelope format.
        const JSON = 1 << 1;
        /// Further scanning should be skipped.
        const SKIP = 1 << 2;
        /// The GTUBE test pattern was found.
        const GTUBE = 1 << 3;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TextFlags: u32 {
        /// Content decoded to valid UTF-8.
        const UTF = 1 << 0;
        const HTML = 1 << 1;
        /// HTML markup was well balanced.
        const BALANCED = 1 << 2;
        const EMPTY = 1 << 3;
        /// The owning part was declared an attachment.
        const ATTACHMENT = 1 << 4;
    }
}

/// Recognized configuration. Read-only while tasks run; loading it is
/// the caller's concern.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub check_text_attachments: bool,
    pub allow_raw_input: bool,
    pub ignore_received: bool,
    pub local_client: bool,
}

/// External collaborators the pipeline consults.
pub struct Oracles<'a> {
    /// Content sniffing for raw (non-MIME) input.
    pub content_type: Option<&'a dyn Fn(&[u8]) -> Option<String>>,
    pub stemmer: &'a dyn StemmerOracle,
    pub tld: &'a dyn TldOracle,
}

static SNOWBALL: SnowballStemmer = SnowballStemmer;
static PSL_TLD: PslTld = PslTld;

impl Default for Oracles<'static> {
    fn default() -> Self {
        Oracles {
            content_type: None,
            stemmer: &SNOWBALL,
            tld: &PSL_TLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NoAction,
    Greylist,
    AddHeader,
    RewriteSubject,
    SoftReject,
    Reject,
}

/// Verdict decided before rule evaluation (currently only GTUBE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreResult {
    pub action: Action,
    pub message: CompactString,
}

/// A processed text part.
#[derive(Debug, Default)]
pub struct TextPart {
    /// Index of the owning part in [`Task::parts`].
    pub mime_part: usize,
    /// Raw body region, relative to [`Task::message`].
    pub raw: Range<usize>,
    /// Length of the transfer-decoded content.
    pub parsed_len: usize,
    /// UTF-8 (or raw, when conversion failed) content; HTML parts hold
    /// the extracted text.
    pub content: Vec<u8>,
    pub stripped: Vec<u8>,
    /// Stripped-coordinate positions of removed newlines.
    pub newlines: Vec<usize>,
    pub nlines: usize,
    pub exceptions: Vec<ProcessException>,
    pub links: Vec<HtmlLink>,
    pub script: Option<&'static str>,
    pub language: Option<&'static str>,
    pub words: Vec<CompactString>,
    pub hashes: Vec<u64>,
    pub flags: TextFlags,
}

impl TextPart {
    pub fn is_empty(&self) -> bool {
        self.flags.contains(TextFlags::EMPTY)
    }

    pub fn is_html(&self) -> bool {
        self.flags.contains(TextFlags::HTML)
    }

    pub fn is_utf(&self) -> bool {
        self.flags.contains(TextFlags::UTF)
    }
}

/// Root entity for one message scan. Built by [`crate::message::parse`],
/// torn down as a whole; nothing inside is shared across tasks.
pub struct Task {
    pub raw: Vec<u8>,
    /// Offset of the message proper after envelope trimming.
    pub offset: usize,
    pub flags: TaskFlags,
    pub message_id: CompactString,
    pub queue_id: CompactString,
    pub subject: Option<String>,
    pub from_envelope: Option<Email>,
    pub deliver_to: Option<String>,
    /// Combined To/Cc/Bcc recipients.
    pub rcpt_mime: Vec<Recipient>,
    pub from_mime: Vec<Recipient>,
    /// IP the client connected from, when known.
    pub source_ip: Option<IpAddr>,
    pub hostname: Option<CompactString>,
    /// Root message headers.
    pub headers: HeaderMap,
    /// MIME parts in depth-first pre-order.
    pub parts: Vec<MimePart>,
    /// Subsequence of `parts` that carried text, in part order.
    pub text_parts: Vec<TextPart>,
    pub received: Vec<ReceivedHeader>,
    pub urls: Vec<Url>,
    pub digest: [u8; 16],
    pub pre_result: Option<PreResult>,
    pub symbols: Vec<CompactString>,
    pub pool: ScopedPool,
}

impl Task {
    pub fn new(raw: Vec<u8>, flags: TaskFlags) -> Self {
        Task {
            raw,
            offset: 0,
            flags,
            message_id: CompactString::const_new("undef"),
            queue_id: CompactString::const_new("undef"),
            subject: None,
            from_envelope: None,
            deliver_to: None,
            rcpt_mime: Vec::new(),
            from_mime: Vec::new(),
            source_ip: None,
            hostname: None,
            headers: HeaderMap::default(),
            parts: Vec::new(),
            text_parts: Vec::new(),
            received: Vec::new(),
            urls: Vec::new(),
            digest: [0; 16],
            pre_result: None,
            symbols: Vec::new(),
            pool: ScopedPool::new(),
        }
    }

    /// The message bytes after envelope trimming.
    pub fn message(&self) -> &[u8] {
        &self.raw[self.offset..]
    }

    /// Ordered task-level header lookup; `strong` additionally requires
    /// an exact-case name match.
    pub fn header_array(&self, field: &str, strong: bool) -> Vec<&Header> {
        if strong {
            self.headers.by_name_strong(field)
        } else {
            self.headers.by_name(field)
        }
    }

    /// Header lookup across every MIME part, in part order.
    pub fn mime_header_array(&self, field: &str, strong: bool) -> Vec<&Header> {
        self.parts
            .iter()
            .flat_map(|part| {
                if strong {
                    part.headers.by_name_strong(field)
                } else {
                    part.headers.by_name(field)
                }
            })
            .collect()
    }
}
