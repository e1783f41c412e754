/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod path;

use std::net::Ipv6Addr;
use std::ops::Range;

use compact_str::CompactString;
use thiserror::Error;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UrlFlags: u32 {
        /// An explicit scheme was present in the input.
        const SCHEME = 1 << 0;
        /// The host hid an IP address behind a non-canonical spelling.
        const OBFUSCATED = 1 << 1;
        /// The host is an IP address.
        const NUMERIC = 1 << 2;
        const IPV6 = 1 << 3;
        /// Display text advertised a different destination.
        const PHISHED = 1 << 4;
    }
}

/// Registrable-suffix lookup. Computed externally; the default
/// implementation consults the public suffix list.
pub trait TldOracle {
    fn registrable_suffix(&self, host: &str) -> Option<CompactString>;
}

/// Public-suffix-list backed oracle.
#[derive(Debug, Default, Clone, Copy)]
pub struct PslTld;

impl TldOracle for PslTld {
    fn registrable_suffix(&self, host: &str) -> Option<CompactString> {
        psl::domain(host.as_bytes()).and_then(|domain| {
            if domain.suffix().typ().is_some() {
                std::str::from_utf8(domain.as_bytes())
                    .ok()
                    .map(CompactString::from)
            } else {
                None
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("empty input")]
    Empty,
    #[error("no usable host at offset {0}")]
    NoHost(usize),
    #[error("invalid character in host at offset {0}")]
    InvalidChar(usize),
    #[error("invalid port at offset {0}")]
    InvalidPort(usize),
    #[error("invalid ip literal at offset {0}")]
    InvalidIpLiteral(usize),
    #[error("unmatched delimiter at offset {0}")]
    UnmatchedDelimiter(usize),
}

/// A parsed and canonicalized URL.
///
/// `host` is always present, lowercased, bracket-free and without a
/// trailing dot; IP hosts are in canonical dotted-quad or shortest-form
/// IPv6 spelling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Url {
    pub host: CompactString,
    pub user: Option<CompactString>,
    pub password: Option<CompactString>,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
    pub tld: Option<CompactString>,
    pub flags: UrlFlags,
}

impl Url {
    /// Parse a byte slice that may or may not carry a scheme, tolerating
    /// the junk mail clients wrap URLs in.
    pub fn parse(input: &[u8], tld: &dyn TldOracle) -> Result<Url, UrlError> {
        let text = String::from_utf8_lossy(input);
        let mut flags = UrlFlags::default();

        // Junk before the URL proper: whitespace and an optional '<'.
        let mut angle = false;
        let start_trimmed = text.trim_start();
        let mut s = start_trimmed;
        if let Some(rest) = s.strip_prefix('<') {
            angle = true;
            s = rest;
        }

        // The URL ends at the first whitespace; the remainder is ignored.
        if let Some(ws) = s.find(char::is_whitespace) {
            s = &s[..ws];
        }

        // Trailing junk: controls, dots, commas, and the matching '>'.
        s = s.trim_end_matches(|c: char| c.is_control() || c == '.' || c == ',');
        if angle {
            s = s.strip_suffix('>').unwrap_or(s);
            s = s.trim_end_matches(|c: char| c.is_control() || c == '.' || c == ',');
        }

        if s.is_empty() {
            return Err(UrlError::Empty);
        }
        let offset_of = |sub: &str| sub.as_ptr() as usize - text.as_ptr() as usize;
        if let Some(gt) = s.find('>') {
            return Err(UrlError::UnmatchedDelimiter(offset_of(s) + gt));
        }
        if s.starts_with(',') {
            return Err(UrlError::NoHost(offset_of(s)));
        }

        // Scheme, if any: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"
        let mut scheme = None;
        let mut rest = s;
        if let Some(colon) = s.find(':') {
            let candidate = &s[..colon];
            // Dotted names before a colon are host:port, not a scheme.
            if !candidate.is_empty()
                && !candidate.contains('.')
                && candidate.starts_with(|c: char| c.is_ascii_alphabetic())
                && candidate
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-'))
                && colon < s.find(['/', '@', '?', '#']).unwrap_or(usize::MAX)
            {
                scheme = Some(candidate.to_ascii_lowercase());
                flags |= UrlFlags::SCHEME;
                rest = &s[colon + 1..];
                // Any mix of slashes and backslashes may follow.
                rest = rest.trim_start_matches(['/', '\\']);
            }
        }

        if rest.is_empty() {
            return Err(UrlError::NoHost(offset_of(s)));
        }

        // Authority runs until the path, query or fragment.
        let authority_end = rest
            .find(['/', '\\', '?', '#'])
            .unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_end);
        let authority_offset = offset_of(rest);

        if authority.is_empty() {
            return Err(UrlError::NoHost(authority_offset));
        }

        // Optional userinfo.
        let (mut user, mut password) = (None, None);
        let hostport = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => {
                if hostport.is_empty() {
                    return Err(UrlError::NoHost(authority_offset + userinfo.len() + 1));
                }
                match userinfo.split_once(':') {
                    Some((u, p)) => {
                        user = Some(CompactString::from(u));
                        password = Some(CompactString::from(p));
                    }
                    None => user = Some(CompactString::from(userinfo)),
                }
                hostport
            }
            None => authority,
        };

        // Split off a port, keeping bracketed IPv6 literals intact.
        let (host_raw, port) = split_hostport(hostport, authority_offset)?;

        // A schemeless token with no userinfo must look like a host.
        if scheme.is_none() && user.is_none() && !host_raw.contains('.') {
            return Err(UrlError::NoHost(authority_offset));
        }

        let host = canonicalize_host(host_raw, authority_offset, &mut flags)?;
        if host.is_empty() {
            return Err(UrlError::NoHost(authority_offset));
        }

        // Path, query, fragment.
        let (mut raw_path, mut query, mut fragment) = (String::new(), None, None);
        if !tail.is_empty() {
            let (before_fragment, frag) = match tail.split_once('#') {
                Some((b, f)) => (b, Some(f.to_string())),
                None => (tail, None),
            };
            fragment = frag;
            let (path_part, query_part) = match before_fragment.split_once('?') {
                Some((p, q)) => (p, Some(q.to_string())),
                None => (before_fragment, None),
            };
            query = query_part;
            raw_path = path_part.replace('\\', "/");
        }
        let path = if raw_path.is_empty() {
            String::new()
        } else {
            String::from_utf8_lossy(&path::canonicalize(raw_path.as_bytes())).into_owned()
        };

        let tld = if flags.contains(UrlFlags::NUMERIC) {
            None
        } else {
            tld.registrable_suffix(&host)
        };

        Ok(Url {
            host,
            user,
            password,
            port,
            path,
            query,
            fragment,
            tld,
            flags,
        })
    }
}

fn split_hostport(hostport: &str, offset: usize) -> Result<(&str, Option<u16>), UrlError> {
    if hostport.starts_with('[') {
        match hostport.find(']') {
            Some(close) => {
                let host = &hostport[..=close];
                let rest = &hostport[close + 1..];
                if rest.is_empty() {
                    Ok((host, None))
                } else if let Some(port) = rest.strip_prefix(':') {
                    Ok((host, Some(parse_port(port, offset + close + 2)?)))
                } else {
                    Err(UrlError::InvalidIpLiteral(offset + close + 1))
                }
            }
            None => Err(UrlError::UnmatchedDelimiter(offset)),
        }
    } else {
        match hostport.rsplit_once(':') {
            Some((host, port)) => {
                if host.contains(':') {
                    Err(UrlError::InvalidIpLiteral(offset))
                } else {
                    Ok((host, Some(parse_port(port, offset + host.len() + 1)?)))
                }
            }
            None => Ok((hostport, None)),
        }
    }
}

fn parse_port(port: &str, offset: usize) -> Result<u16, UrlError> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UrlError::InvalidPort(offset));
    }
    port.parse().map_err(|_| UrlError::InvalidPort(offset))
}

/// Canonicalize a host: percent-decoding, IP folding, Unicode
/// lowercasing, trailing-dot removal.
fn canonicalize_host(
    raw: &str,
    offset: usize,
    flags: &mut UrlFlags,
) -> Result<CompactString, UrlError> {
    // Bracketed literals must hold an IPv6 address, never a DNS name.
    if let Some(inner) = raw.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or(UrlError::UnmatchedDelimiter(offset))?;
        let addr: Ipv6Addr = inner
            .parse()
            .map_err(|_| UrlError::InvalidIpLiteral(offset))?;
        *flags |= UrlFlags::NUMERIC | UrlFlags::IPV6;
        return Ok(format_ipv6_shortest(&addr));
    }

    let mut host = raw.to_string();
    if host.contains('%') {
        host = percent_decode(&host, offset)?;
        *flags |= UrlFlags::OBFUSCATED;
    }
    let host = host.trim_end_matches('.');

    if host
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '/' | '@' | '[' | ']' | '<' | '>' | '"'))
    {
        return Err(UrlError::InvalidChar(offset));
    }

    if let Some(quad) = parse_ipv4_obfuscated(host) {
        *flags |= UrlFlags::NUMERIC;
        let canonical = format!("{}.{}.{}.{}", quad[0], quad[1], quad[2], quad[3]);
        if canonical != host {
            *flags |= UrlFlags::OBFUSCATED;
        }
        return Ok(canonical.into());
    }

    Ok(host
        .chars()
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .into())
}

fn percent_decode(host: &str, offset: usize) -> Result<String, UrlError> {
    let bytes = host.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && bytes.len() - i >= 3 {
            match hex_pair(bytes[i + 1], bytes[i + 2]) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                None => return Err(UrlError::InvalidChar(offset + i)),
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).map_err(|_| UrlError::InvalidChar(offset))
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi as u8) << 4 | lo as u8)
}

/// `inet_aton` semantics: up to four dot-separated components, each in
/// decimal, octal (leading zero) or hex (`0x`), the last one filling the
/// remaining bytes of the 32-bit address.
fn parse_ipv4_obfuscated(host: &str) -> Option<[u8; 4]> {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.is_empty() || parts.len() > 4 {
        return None;
    }

    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        values.push(parse_ipv4_component(part)?);
    }

    let n = values.len();
    let mut addr: u64 = 0;
    for (i, &value) in values.iter().enumerate() {
        if i < n - 1 {
            if value > 0xff {
                return None;
            }
            addr = addr << 8 | value;
        } else {
            let remaining = 4 - (n - 1);
            let max = if remaining == 4 {
                u64::from(u32::MAX)
            } else {
                (1u64 << (8 * remaining)) - 1
            };
            if value > max {
                return None;
            }
            addr = addr << (8 * remaining) | value;
        }
    }

    Some((addr as u32).to_be_bytes())
}

fn parse_ipv4_component(part: &str) -> Option<u64> {
    if part.is_empty() {
        return None;
    }
    let (digits, radix) = if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
        (hex, 16)
    } else if part.len() > 1 && part.starts_with('0') {
        (&part[1..], 8)
    } else {
        (part, 10)
    };
    if digits.is_empty() {
        // A bare "0x" is not a number, but a bare "0" is.
        return if radix == 8 { Some(0) } else { None };
    }
    u64::from_str_radix(digits, radix).ok().filter(|&v| v <= u64::from(u32::MAX))
}

/// RFC 5952 shortest textual form, always hexadecimal groups; embedded
/// IPv4 suffixes are folded rather than printed in dotted form.
fn format_ipv6_shortest(addr: &Ipv6Addr) -> CompactString {
    let segments = addr.segments();

    // Longest run of zero groups, leftmost on ties, length two or more.
    let (mut best_start, mut best_len) = (0, 0);
    let (mut run_start, mut run_len) = (0, 0);
    for (i, &seg) in segments.iter().enumerate() {
        if seg == 0 {
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if run_len > best_len {
                best_start = run_start;
                best_len = run_len;
            }
        } else {
            run_len = 0;
        }
    }

    if best_len < 2 {
        let groups: Vec<String> = segments.iter().map(|s| format!("{s:x}")).collect();
        return groups.join(":").into();
    }

    let head: Vec<String> = segments[..best_start].iter().map(|s| format!("{s:x}")).collect();
    let tail: Vec<String> = segments[best_start + best_len..]
        .iter()
        .map(|s| format!("{s:x}"))
        .collect();
    format!("{}::{}", head.join(":"), tail.join(":")).into()
}

/// Scan plain text for URL candidates and parse each one. Returns the
/// byte range of every hit together with the parsed URL, non-overlapping
/// and in position order.
pub fn scan_text(text: &[u8], tld: &dyn TldOracle) -> Vec<(Range<usize>, Url)> {
    const PREFIXES: &[&str] = &["http://", "https://", "ftp://", "mailto:", "www."];

    let lower: Vec<u8> = text.iter().map(|b| b.to_ascii_lowercase()).collect();
    let mut hits: Vec<usize> = Vec::new();
    for prefix in PREFIXES {
        for pos in memchr::memmem::find_iter(&lower, prefix.as_bytes()) {
            // Word boundary on the left keeps "xhttp://" out.
            if pos == 0 || !lower[pos - 1].is_ascii_alphanumeric() {
                hits.push(pos);
            }
        }
    }
    hits.sort_unstable();
    hits.dedup();

    let mut urls = Vec::new();
    let mut consumed = 0;
    for start in hits {
        if start < consumed {
            continue;
        }
        let end = text[start..]
            .iter()
            .position(|&b| b.is_ascii_whitespace() || matches!(b, b'<' | b'>' | b'"'))
            .map_or(text.len(), |i| start + i);
        let candidate = trim_candidate(&text[start..end]);
        if candidate.is_empty() {
            continue;
        }
        if let Ok(url) = Url::parse(candidate, tld) {
            urls.push((start..start + candidate.len(), url));
            consumed = end;
        }
    }

    urls
}

fn trim_candidate(mut candidate: &[u8]) -> &[u8] {
    while let [head @ .., b'.' | b',' | b')' | b';' | b'!' | b'?'] = candidate {
        candidate = head;
    }
    candidate
}
