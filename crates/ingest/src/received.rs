/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use compact_str::CompactString;

/// One hop of the `Received` chain. Best-effort: any clause that fails
/// to parse is simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedHeader {
    /// Hostname the peer announced (the `from` token).
    pub from_hostname: Option<CompactString>,
    /// Hostname observed by the receiving relay (from the comment).
    pub real_hostname: Option<CompactString>,
    /// IP observed by the receiving relay.
    pub real_ip: Option<IpAddr>,
    pub by_hostname: Option<CompactString>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Synthesized from the connection rather than parsed from a header.
    pub artificial: bool,
}

impl ReceivedHeader {
    pub fn synthetic(ip: IpAddr, hostname: Option<&str>) -> Self {
        ReceivedHeader {
            from_hostname: hostname.map(CompactString::from),
            real_hostname: hostname.map(CompactString::from),
            real_ip: Some(ip),
            by_hostname: None,
            timestamp: None,
            artificial: true,
        }
    }
}

/// Parse a decoded `Received` header value.
///
/// Understands the common shape
/// `from <helo> (<hostname> [<ip>]) by <host> ...; <rfc2822 date>`.
pub fn parse_received(value: &str) -> ReceivedHeader {
    let mut header = ReceivedHeader::default();

    let lower = value.to_ascii_lowercase();
    if let Some(from_pos) = find_clause(&lower, "from") {
        let rest = &value[from_pos..];
        header.from_hostname = first_token(rest).map(|t| CompactString::from(t.to_lowercase()));

        // The parenthesized comment after the from clause carries what
        // the relay actually observed.
        if let Some(open) = rest.find('(') {
            let comment_end = rest[open..].find(')').map_or(rest.len(), |e| open + e);
            let comment = &rest[open + 1..comment_end];

            if let Some(bracket) = comment.find('[') {
                if let Some(close) = comment[bracket..].find(']') {
                    let literal = comment[bracket + 1..bracket + close].trim();
                    let literal = literal.strip_prefix("IPv6:").unwrap_or(literal);
                    header.real_ip = literal.parse().ok();
                }
                let before = comment[..bracket].trim().trim_end_matches(':');
                if !before.is_empty() && !before.eq_ignore_ascii_case("helo") {
                    header.real_hostname =
                        Some(CompactString::from(before.to_lowercase()));
                }
            } else if let Some(host) = first_token(comment) {
                header.real_hostname = Some(CompactString::from(host.to_lowercase()));
            }
        }
    }

    if let Some(by_pos) = find_clause(&lower, "by") {
        header.by_hostname =
            first_token(&value[by_pos..]).map(|t| CompactString::from(t.to_lowercase()));
    }

    if let Some(semi) = value.rfind(';') {
        let date = value[semi + 1..].trim();
        header.timestamp = DateTime::parse_from_rfc2822(date)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }

    header
}

/// Find a clause keyword at a word boundary; returns the offset just
/// past it.
fn find_clause(lower: &str, keyword: &str) -> Option<usize> {
    let mut search = 0;
    while let Some(found) = lower[search..].find(keyword) {
        let at = search + found;
        search = at + keyword.len();
        let before_ok = at == 0
            || !lower.as_bytes()[at - 1].is_ascii_alphanumeric();
        let after = lower.as_bytes().get(at + keyword.len());
        let after_ok = matches!(after, Some(b' ') | Some(b'\t'));
        if before_ok && after_ok {
            return Some(search);
        }
    }
    None
}

fn first_token(s: &str) -> Option<&str> {
    s.split_whitespace()
        .next()
        .map(|t| t.trim_matches(|c: char| c == ';' || c == '(' || c == ')'))
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn typical_hop() {
        let header = parse_received(
            "from mail.example.com (mx1.example.com [203.0.113.7]) by mx.local \
             (Postfix) with ESMTP id ABC123; Fri, 13 May 2016 19:08:48 +0200",
        );
        assert_eq!(header.from_hostname.as_deref(), Some("mail.example.com"));
        assert_eq!(header.real_hostname.as_deref(), Some("mx1.example.com"));
        assert_eq!(
            header.real_ip,
            Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)))
        );
        assert_eq!(header.by_hostname.as_deref(), Some("mx.local"));
        assert!(header.timestamp.is_some());
        assert!(!header.artificial);
    }

    #[test]
    fn ipv6_literal() {
        let header = parse_received(
            "from relay (relay.example.org [IPv6:2001:db8::25]) by mx.local; \
             Thu, 04 Jan 2024 10:00:00 +0000",
        );
        assert_eq!(header.real_ip, Some("2001:db8::25".parse().unwrap()));
    }

    #[test]
    fn missing_clauses_are_none() {
        let header = parse_received("by mx.local with local (Exim)");
        assert_eq!(header.from_hostname, None);
        assert_eq!(header.real_ip, None);
        assert_eq!(header.by_hostname.as_deref(), Some("mx.local"));
        assert_eq!(header.timestamp, None);
    }

    #[test]
    fn comment_without_brackets() {
        let header = parse_received("from a.example (b.example) by c.example; garbage date");
        assert_eq!(header.real_hostname.as_deref(), Some("b.example"));
        assert_eq!(header.real_ip, None);
        assert_eq!(header.timestamp, None);
    }
}
