/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use memchr::memmem;
use mime::headers::HeaderMap;
use mime::{ContentType, MimePart, PartFlags, PartKind};
use nlp::tokenizers::{merge_exceptions, ExceptionKind, ProcessException};
use tracing::{debug, error, info, warn};

use crate::addr;
use crate::error::IngestError;
use crate::html;
use crate::received::{self, ReceivedHeader};
use crate::task::{Action, Config, Oracles, PreResult, Task, TaskFlags, TextFlags, TextPart};
use crate::text::strip_newlines;
use crate::url::{self, Url, UrlFlags};

const GTUBE_PATTERN: &[u8] =
    b"XJS*C4JDBQADN1.NSBN3*2IDNEN*GTUBE-STANDARD-ANTI-UBE-TEST-EMAIL*C.34X";
const GTUBE_SYMBOL: &str = "GTUBE";
const GTUBE_MAX_SIZE: usize = 4 * 1024;

/// Run the full ingestion pipeline over the task's raw bytes.
///
/// Always succeeds on arbitrary input, except when the MIME structure
/// cannot be parsed and configuration forbids raw input.
pub fn parse(task: &mut Task, config: &Config, oracles: &Oracles<'_>) -> Result<(), IngestError> {
    if task.raw.is_empty() {
        return Ok(());
    }

    let mut start = 0;
    while start < task.raw.len() && task.raw[start].is_ascii_whitespace() {
        start += 1;
    }

    // Some MTAs hand over mailbox format: a leading "From ..." envelope
    // line that is not a header. Skip it up to the next line.
    if (!task.flags.contains(TaskFlags::JSON) || config.local_client)
        && task.raw[start..].starts_with(b"From ")
    {
        info!("mailbox input detected, enabling workaround");
        start += b"From ".len();
        while start < task.raw.len() && task.raw[start] != b'\n' {
            start += 1;
        }
        while start < task.raw.len() && task.raw[start].is_ascii_whitespace() {
            start += 1;
        }
    }
    task.offset = start;

    if task.flags.contains(TaskFlags::MIME) {
        match mime::parser::parse_message(task.message()) {
            Ok(parts) => task.parts = parts,
            Err(err) => {
                error!(error = %err, "cannot parse mime structure");
                if !config.allow_raw_input {
                    return Err(IngestError::ConfigForbidsRaw { source: err });
                }
                task.flags.remove(TaskFlags::MIME);
                message_from_data(task, oracles);
            }
        }
    } else {
        message_from_data(task, oracles);
    }

    if let Some(root) = task.parts.first() {
        task.headers = root.headers.clone();
    }

    // Message-id, with the surrounding angle brackets removed.
    if let Some(value) = task.headers.first("message-id").map(|h| h.decoded.clone()) {
        let trimmed = value.trim();
        let id = trimmed
            .strip_prefix('<')
            .and_then(|v| v.strip_suffix('>'))
            .unwrap_or(trimmed);
        if !id.is_empty() {
            task.message_id = id.into();
        }
    }

    if task.subject.is_none() {
        task.subject = task.headers.first("subject").map(|h| h.decoded.clone());
    }

    debug!(parts = task.parts.len(), "parsed message structure");

    for index in 0..task.parts.len() {
        if task.parts[index].is_text() {
            process_text_part(task, index, config, oracles);
        }
    }

    process_received(task, config);

    if task.from_envelope.is_none() {
        if let Some(value) = task.headers.first("return-path").map(|h| h.decoded.clone()) {
            task.from_envelope = addr::parse_envelope(&value);
        }
    }
    if task.deliver_to.is_none() {
        task.deliver_to = task
            .headers
            .first("delivered-to")
            .map(|h| h.decoded.trim().to_string());
    }

    for field in ["to", "cc", "bcc"] {
        let values: Vec<String> = task
            .header_array(field, false)
            .iter()
            .map(|h| h.decoded.clone())
            .collect();
        for value in values {
            task.rcpt_mime.extend(addr::parse_address_list(&value));
        }
    }
    if let Some(value) = task.headers.first("from").map(|h| h.decoded.clone()) {
        task.from_mime = addr::parse_address_list(&value);
    }

    // URLs hidden in the subject count as well.
    let subjects: Vec<String> = task
        .header_array("subject", false)
        .iter()
        .map(|h| h.decoded.clone())
        .collect();
    for value in subjects {
        for (_, url) in url::scan_text(value.as_bytes(), oracles.tld) {
            task.urls.push(url);
        }
    }

    compare_text_parts(task);

    let mut hasher = blake3::Hasher::new();
    for part in &task.parts {
        hasher.update(&part.digest);
    }
    task.digest
        .copy_from_slice(&hasher.finalize().as_bytes()[..16]);

    info!(
        message_id = %task.message_id,
        queue_id = %task.queue_id,
        size = task.message().len(),
        checksum = %hex(&task.digest),
        "loaded message"
    );

    Ok(())
}

/// Build a single synthetic part from raw, non-MIME input, consulting
/// the content-type oracle when one is available.
fn message_from_data(task: &mut Task, oracles: &Oracles<'_>) {
    let parsed = task.message().to_vec();
    let ct = oracles
        .content_type
        .and_then(|oracle| oracle(&parsed))
        .and_then(|label| ContentType::parse(&label))
        .unwrap_or_else(ContentType::text_plain);
    warn!(ct = %ct.full_type(), "constructing fake mime part from raw data");

    let digest = *blake3::hash(&parsed).as_bytes();
    let mut flags = PartFlags::empty();
    if ct.is_text() {
        flags |= PartFlags::TEXT;
    }
    let kind = PartKind::classify(&ct);

    let generated = format!("{}@localhost.localdomain", &hex(&digest)[..16]);
    task.message_id = generated.clone().into();
    task.queue_id = generated.into();

    task.parts.push(MimePart {
        headers: HeaderMap::default(),
        ct,
        cd: None,
        raw: 0..parsed.len(),
        parsed,
        parent: None,
        digest,
        flags,
        kind,
    });
}

fn process_text_part(task: &mut Task, index: usize, config: &Config, oracles: &Oracles<'_>) {
    if task.parts[index].is_attachment() && !config.check_text_attachments {
        debug!("skipping attachment for checking as text part");
        return;
    }

    let part = &task.parts[index];
    let is_html = part.ct.is_html();
    let charset = part.ct.charset().map(str::to_string);

    let mut text = TextPart {
        mime_part: index,
        raw: part.raw.clone(),
        parsed_len: part.parsed.len(),
        ..Default::default()
    };
    if is_html {
        text.flags |= TextFlags::HTML;
    }
    if part.is_attachment() {
        text.flags |= TextFlags::ATTACHMENT;
    }

    if part.parsed.is_empty() {
        text.flags |= TextFlags::EMPTY;
        push_text_part(task, index, text);
        return;
    }

    let (content, is_utf) = mime::charset::to_utf8(&task.parts[index].parsed, charset.as_deref());
    if is_utf {
        text.flags |= TextFlags::UTF;
    }

    if is_html && is_utf {
        let extracted = html::extract_text(std::str::from_utf8(&content).unwrap_or_default());
        if extracted.balanced {
            text.flags |= TextFlags::BALANCED;
        }
        text.links = extracted.links;
        text.content = extracted.text;
    } else {
        text.content = content;
    }
    if text.content.is_empty() {
        text.flags |= TextFlags::EMPTY;
    }

    if text.content.len() > GTUBE_PATTERN.len()
        && text.content.len() <= GTUBE_MAX_SIZE
        && memmem::find(&text.content, GTUBE_PATTERN).is_some()
    {
        info!(
            message_id = %task.message_id,
            length = text.content.len(),
            "gtube pattern has been found in part"
        );
        task.flags |= TaskFlags::SKIP | TaskFlags::GTUBE;
        task.pre_result = Some(PreResult {
            action: Action::Reject,
            message: "Gtube pattern".into(),
        });
        task.symbols.push(GTUBE_SYMBOL.into());
        push_text_part(task, index, text);
        return;
    }

    if text.flags.contains(TextFlags::UTF) {
        let detected =
            nlp::language::detect_script(std::str::from_utf8(&text.content).unwrap_or_default());
        text.script = Some(detected.script.full_name());
        text.language = Some(detected.language);
    }

    let stripped = strip_newlines(&text.content);
    text.newlines = stripped.newlines;
    text.nlines = stripped.nlines;
    text.stripped = stripped.content;

    let mut exceptions: Vec<ProcessException> = text
        .newlines
        .iter()
        .map(|&pos| ProcessException::newline(pos))
        .collect();

    if text.flags.contains(TextFlags::HTML) {
        // HTML link destinations were collected during extraction.
        for link in text.links.clone() {
            if let Ok(mut url) = Url::parse(link.href.as_bytes(), oracles.tld) {
                if !link.anchor.is_empty() {
                    if let Ok(display) = Url::parse(link.anchor.as_bytes(), oracles.tld) {
                        if display.host != url.host {
                            url.flags |= UrlFlags::PHISHED;
                        }
                    }
                }
                task.urls.push(url);
            }
        }
    } else {
        for (range, found) in url::scan_text(&text.stripped, oracles.tld) {
            exceptions.push(ProcessException {
                pos: range.start,
                len: range.len(),
                kind: ExceptionKind::Url,
            });
            task.urls.push(found);
        }
    }

    merge_exceptions(&mut exceptions);

    let is_utf = text.flags.contains(TextFlags::UTF);
    text.words = nlp::tokenizers::word::tokenize(&text.stripped, is_utf, &exceptions);
    text.hashes = nlp::tokenizers::word::normalize_and_hash(
        &mut text.words,
        is_utf,
        text.language,
        oracles.stemmer,
    );
    text.exceptions = exceptions;

    push_text_part(task, index, text);
}

fn push_text_part(task: &mut Task, index: usize, text: TextPart) {
    let text_index = task.text_parts.len();
    task.text_parts.push(text);
    task.parts[index].kind = PartKind::Text {
        text_part: Some(text_index),
    };
}

/// Reconcile the Received chain with what the connection itself showed.
fn process_received(task: &mut Task, config: &Config) {
    let values: Vec<String> = task
        .header_array("received", false)
        .iter()
        .map(|h| h.decoded.clone())
        .collect();

    for (i, value) in values.iter().enumerate() {
        let header = received::parse_received(value);

        if i == 0 {
            let mut need_correction = header.real_ip.is_none() || config.ignore_received;
            if !need_correction {
                if let Some(source_ip) = task.source_ip {
                    need_correction = header.real_ip != Some(source_ip);
                }
            }

            if need_correction {
                if let Some(ip) = task.source_ip {
                    debug!("first received hop does not match the client, prepending a synthetic one");
                    task.received
                        .push(ReceivedHeader::synthetic(ip, task.hostname.as_deref()));
                }
            }
        }

        task.received.push(header);
    }

    // No observed IP: adopt what the topmost hop saw.
    if task.source_ip.is_none() && !task.received.is_empty() && !config.ignore_received {
        if let Some(ip) = task.received[0].real_ip {
            task.source_ip = Some(ip);
        }
        if let Some(hostname) = task.received[0].real_hostname.clone() {
            task.hostname = Some(hostname);
        }
    }
}

/// For a two-part alternative message, publish how far apart the two
/// renderings are.
fn compare_text_parts(task: &mut Task) {
    if task.text_parts.len() != 2 {
        return;
    }
    let p1 = &task.text_parts[0];
    let p2 = &task.text_parts[1];

    let parent = match (task.parts[p1.mime_part].parent, task.parts[p2.mime_part].parent) {
        (Some(a), Some(b)) if a == b => a,
        _ => {
            debug!("message contains two parts but they are in different containers");
            return;
        }
    };
    if task.parts[parent].ct.subtype != "alternative" {
        return;
    }
    if p1.is_empty() || p2.is_empty() {
        return;
    }

    let total_words = p1.hashes.len() + p2.hashes.len();
    if total_words == 0 {
        return;
    }
    if let Some(distance) = nlp::similarity::words_levenshtein(&p1.hashes, &p2.hashes) {
        let diff = distance as f64 / total_words as f64;
        debug!(distance, total_words, diff, "got difference between parts");
        task.pool.set_variable("parts_distance", diff);
        task.pool.set_variable("total_words", total_words);
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(raw: &[u8], flags: TaskFlags, config: &Config) -> Task {
        let mut task = Task::new(raw.to_vec(), flags);
        parse(&mut task, config, &Oracles::default()).unwrap();
        task
    }

    fn run_mime(raw: &[u8]) -> Task {
        run(raw, TaskFlags::MIME, &Config::default())
    }

    const TWO_PART: &[u8] = b"From: sender@example.com\r\n\
To: rcpt@example.org\r\n\
Subject: offer\r\n\
Message-ID: <abc@example.com>\r\n\
Content-Type: multipart/alternative; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello world foo\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello world bar\r\n\
--b--\r\n";

    #[test]
    fn two_part_alternative_distance() {
        let task = run_mime(TWO_PART);
        assert_eq!(task.text_parts.len(), 2);
        assert_eq!(task.text_parts[0].hashes.len(), 3);

        let total_words: usize = task.pool.variable("total_words").unwrap();
        let distance: f64 = task.pool.variable("parts_distance").unwrap();
        assert_eq!(total_words, 6);
        assert!((distance - 2.0 / 6.0).abs() < 1e-9, "{distance}");
    }

    #[test]
    fn message_id_and_subject() {
        let task = run_mime(TWO_PART);
        assert_eq!(task.message_id, "abc@example.com");
        assert_eq!(task.subject.as_deref(), Some("offer"));
        assert_eq!(task.queue_id, "undef");
        assert_eq!(task.rcpt_mime.len(), 1);
        assert_eq!(task.rcpt_mime[0].email.address, "rcpt@example.org");
        assert_eq!(task.from_mime[0].email.address, "sender@example.com");
    }

    #[test]
    fn missing_message_id_stays_undef() {
        let task = run_mime(b"Subject: x\r\n\r\nbody\r\n");
        assert_eq!(task.message_id, "undef");
    }

    #[test]
    fn gtube_sets_flags_and_pre_result() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"Subject: test\r\nContent-Type: text/plain\r\n\r\n");
        raw.extend_from_slice(b"XJS*C4JDBQADN1.NSBN3*2IDNEN*GTUBE-STANDARD-ANTI-UBE-TEST-EMAIL*C.34X\r\n");

        let task = run_mime(&raw);
        assert!(task.flags.contains(TaskFlags::GTUBE));
        assert!(task.flags.contains(TaskFlags::SKIP));
        let pre = task.pre_result.unwrap();
        assert_eq!(pre.action, Action::Reject);
        assert_eq!(pre.message, "Gtube pattern");
        assert!(task.symbols.iter().any(|s| s.as_str() == GTUBE_SYMBOL));
    }

    #[test]
    fn gtube_is_ignored_in_large_parts() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"Subject: test\r\nContent-Type: text/plain\r\n\r\n");
        raw.extend_from_slice(b"XJS*C4JDBQADN1.NSBN3*2IDNEN*GTUBE-STANDARD-ANTI-UBE-TEST-EMAIL*C.34X\r\n");
        raw.extend_from_slice(&vec![b'x'; 5000]);

        let task = run_mime(&raw);
        assert!(!task.flags.contains(TaskFlags::GTUBE));
        assert!(task.pre_result.is_none());
    }

    #[test]
    fn mbox_envelope_line_is_skipped() {
        let raw = b"From sender@example.com Fri May 13 19:08:48 2016\nSubject: wrapped\r\n\r\nbody\r\n";
        let task = run(raw, TaskFlags::MIME, &Config::default());
        assert_eq!(task.subject.as_deref(), Some("wrapped"));
    }

    #[test]
    fn json_input_keeps_from_line() {
        // A JSON-framed task must not strip "From " unless local.
        let raw = b"From sender@example.com Fri May 13 19:08:48 2016\nSubject: x\r\n\r\nbody\r\n";
        let task = run(raw, TaskFlags::MIME | TaskFlags::JSON, &Config::default());
        assert_eq!(task.offset, 0);

        let task = run(raw, TaskFlags::MIME, &Config::default());
        assert!(task.offset > 0);

        let local = Config {
            local_client: true,
            ..Default::default()
        };
        let task = run(raw, TaskFlags::MIME | TaskFlags::JSON, &local);
        assert!(task.offset > 0);
    }

    #[test]
    fn raw_fallback_when_allowed() {
        let config = Config {
            allow_raw_input: true,
            ..Default::default()
        };
        let mut task = Task::new(b"no headers here, only words".to_vec(), TaskFlags::MIME);
        let oracle = |_: &[u8]| Some("text/plain".to_string());
        let oracles = Oracles {
            content_type: Some(&oracle),
            ..Oracles::default()
        };
        parse(&mut task, &config, &oracles).unwrap();

        assert!(!task.flags.contains(TaskFlags::MIME));
        assert_eq!(task.parts.len(), 1);
        assert_eq!(task.text_parts.len(), 1);
        assert!(task.message_id.ends_with("@localhost.localdomain"));
        assert!(!task.text_parts[0].words.is_empty());
    }

    #[test]
    fn raw_input_forbidden_is_fatal() {
        let mut task = Task::new(b"no headers here, only words".to_vec(), TaskFlags::MIME);
        let err = parse(&mut task, &Config::default(), &Oracles::default());
        assert!(matches!(err, Err(IngestError::ConfigForbidsRaw { .. })));
    }

    #[test]
    fn urls_are_extracted_from_text_and_subject() {
        let raw = b"Subject: see http://sub.example.org/x now\r\n\
Content-Type: text/plain\r\n\r\n\
go to http://spam.example.com/buy today\r\n";
        let task = run_mime(raw);
        assert_eq!(task.urls.len(), 2);
        assert!(task.urls.iter().any(|u| u.host == "spam.example.com"));
        assert!(task.urls.iter().any(|u| u.host == "sub.example.org"));

        // The extracted URL is spliced out of tokenization.
        let words = &task.text_parts[0].words;
        assert!(words.iter().any(|w| w.as_str() == "!!EX!!"));
        assert!(!words.iter().any(|w| w.contains("spam")));
    }

    #[test]
    fn received_chain_with_synthetic_hop() {
        let raw = b"Received: from mail.a (mx.a [203.0.113.7]) by mx.b; Fri, 13 May 2016 19:08:48 +0200\r\n\
Subject: x\r\n\r\nbody\r\n";
        let mut task = Task::new(raw.to_vec(), TaskFlags::MIME);
        task.source_ip = Some("198.51.100.9".parse().unwrap());
        parse(&mut task, &Config::default(), &Oracles::default()).unwrap();

        assert_eq!(task.received.len(), 2);
        assert!(task.received[0].artificial);
        assert_eq!(task.received[0].real_ip, Some("198.51.100.9".parse().unwrap()));
        assert_eq!(task.received[1].real_ip, Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn source_ip_adopted_from_received() {
        let raw = b"Received: from mail.a (mx.a [203.0.113.7]) by mx.b; Fri, 13 May 2016 19:08:48 +0200\r\n\
Subject: x\r\n\r\nbody\r\n";
        let task = run_mime(raw);
        assert_eq!(task.source_ip, Some("203.0.113.7".parse().unwrap()));
        assert_eq!(task.hostname.as_deref(), Some("mx.a"));
        assert_eq!(task.received.len(), 1);
    }

    #[test]
    fn digest_is_deterministic() {
        let a = run_mime(TWO_PART);
        let b = run_mime(TWO_PART);
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, [0u8; 16]);

        let c = run_mime(b"Subject: different\r\n\r\nother body\r\n");
        assert_ne!(a.digest, c.digest);
    }

    #[test]
    fn text_attachments_skipped_by_default() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n\
--b\r\n\
Content-Type: text/plain\r\n\r\n\
main body\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
Content-Disposition: attachment; filename=\"notes.txt\"\r\n\r\n\
attached text\r\n\
--b--\r\n";
        let task = run_mime(raw);
        assert_eq!(task.text_parts.len(), 1);

        let config = Config {
            check_text_attachments: true,
            ..Default::default()
        };
        let task = run(raw, TaskFlags::MIME, &config);
        assert_eq!(task.text_parts.len(), 2);
        assert!(task.text_parts[1].flags.contains(TextFlags::ATTACHMENT));
    }

    #[test]
    fn html_part_is_extracted_and_linked() {
        let raw = b"Content-Type: text/html\r\n\r\n\
<html><body><p>Buy <a href=\"http://spam.example.com/x\">here</a></p></body></html>\r\n";
        let task = run_mime(raw);
        assert_eq!(task.text_parts.len(), 1);
        let part = &task.text_parts[0];
        assert!(part.is_html());
        assert!(part.flags.contains(TextFlags::BALANCED));
        assert!(part.words.iter().any(|w| w.as_str() == "buy"));
        assert_eq!(task.urls.len(), 1);
        assert_eq!(task.urls[0].host, "spam.example.com");
    }

    #[test]
    fn phished_anchor_is_flagged() {
        let raw = b"Content-Type: text/html\r\n\r\n\
<a href=\"http://evil.example.com/\">http://bank.example.org/login</a>\r\n";
        let task = run_mime(raw);
        assert_eq!(task.urls.len(), 1);
        assert_eq!(task.urls[0].host, "evil.example.com");
        assert!(task.urls[0].flags.contains(UrlFlags::PHISHED));
    }

    #[test]
    fn exception_list_is_sorted_and_disjoint() {
        let raw = b"Content-Type: text/plain\r\n\r\n\
line one http://a.example.net/p line\r\ntwo http://b.example.net line three\r\n";
        let task = run_mime(raw);
        let exceptions = &task.text_parts[0].exceptions;
        assert!(!exceptions.is_empty());
        for pair in exceptions.windows(2) {
            assert!(pair[0].pos < pair[1].pos);
            assert!(pair[0].pos + pair[0].len <= pair[1].pos);
        }
    }

    #[test]
    fn token_hash_counts_match() {
        let task = run_mime(TWO_PART);
        for part in &task.text_parts {
            let countable = part
                .words
                .iter()
                .filter(|w| !w.is_empty() && w.as_str() != "!!EX!!")
                .count();
            assert_eq!(part.hashes.len(), countable);
        }
    }
}
