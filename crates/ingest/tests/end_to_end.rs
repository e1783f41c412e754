/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use ingest::message;
use ingest::url::path;
use ingest::url::PslTld;
use ingest::{Action, Config, Oracles, Task, TaskFlags, Url};

fn scan(raw: &[u8]) -> Task {
    let mut task = Task::new(raw.to_vec(), TaskFlags::MIME);
    message::parse(&mut task, &Config::default(), &Oracles::default()).unwrap();
    task
}

fn url(input: &str) -> Url {
    Url::parse(input.as_bytes(), &PslTld).unwrap()
}

#[test]
fn url_scenarios() {
    let parsed = url("test.com");
    assert_eq!(parsed.host, "test.com");
    assert_eq!(parsed.user, None);

    let parsed = url("mailto:A.User@example.com text");
    assert_eq!(parsed.host, "example.com");
    assert_eq!(parsed.user.as_deref(), Some("A.User"));

    let parsed = url("http://Тест.Рф:18 text");
    assert_eq!(parsed.host, "тест.рф");

    let parsed = url("http:/\\[::eeee:192.168.0.1]/#test");
    assert_eq!(parsed.host, "::eeee:c0a8:1");
    assert_eq!(parsed.fragment.as_deref(), Some("test"));

    let parsed = url("http:\\\\%30%78%63%30%2e%30%32%35%30.01");
    assert_eq!(parsed.host, "192.168.0.1");

    assert!(Url::parse(b"http://[www.google.com]/", &PslTld).is_err());
}

#[test]
fn path_canonicalization_entrypoint() {
    let mut buf = b"/a/b/c/./../../g".to_vec();
    let len = path::canonicalize_in_place(&mut buf);
    assert_eq!(&buf[..len], b"/a/g");
}

#[test]
fn two_part_similarity_scenario() {
    let raw = b"Content-Type: multipart/alternative; boundary=\"b\"\r\n\r\n\
--b\r\n\
Content-Type: text/plain\r\n\r\n\
hello world foo\r\n\
--b\r\n\
Content-Type: text/plain\r\n\r\n\
hello world bar\r\n\
--b--\r\n";
    let task = scan(raw);

    let total_words: usize = task.pool.variable("total_words").unwrap();
    let distance: f64 = task.pool.variable("parts_distance").unwrap();
    assert_eq!(total_words, 6);
    assert!((distance - 1.0 / 3.0).abs() < 1e-9);
}

#[test]
fn gtube_scenario() {
    let raw = b"Subject: test\r\nContent-Type: text/plain\r\n\r\n\
XJS*C4JDBQADN1.NSBN3*2IDNEN*GTUBE-STANDARD-ANTI-UBE-TEST-EMAIL*C.34X\r\n";
    let task = scan(raw);

    assert!(task.flags.contains(TaskFlags::GTUBE));
    assert!(task.flags.contains(TaskFlags::SKIP));
    let pre = task.pre_result.expect("gtube must set a pre-result");
    assert_eq!(pre.action, Action::Reject);
    assert_eq!(pre.message, "Gtube pattern");
}

#[test]
fn extracted_url_invariants() {
    let raw = b"Subject: http://EXAMPLE.com./x\r\nContent-Type: text/plain\r\n\r\n\
see www.Other.Example. and http://0xc0.052000001/ too\r\n";
    let task = scan(raw);

    assert!(!task.urls.is_empty());
    for url in &task.urls {
        assert!(!url.host.is_empty());
        assert!(!url.host.chars().any(|c| c.is_ascii_uppercase()));
        assert!(!url.host.starts_with('[') && !url.host.ends_with(']'));
        assert!(!url.host.ends_with('.'));
    }
}

#[test]
fn malformed_input_still_yields_a_task() {
    let config = Config {
        allow_raw_input: true,
        ..Default::default()
    };
    let mut task = Task::new(b"\x00\xff binary garbage \xfe with no structure".to_vec(), TaskFlags::MIME);
    message::parse(&mut task, &config, &Oracles::default()).unwrap();

    assert_eq!(task.parts.len(), 1);
    assert_eq!(task.message_id.is_empty(), false);
}
