/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use compact_str::CompactString;

/// A mail address split into its lowercased address, local part and
/// domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub address: CompactString,
    pub local_part: CompactString,
    pub domain: CompactString,
}

impl Email {
    pub fn new(address: &str) -> Self {
        let address = CompactString::from(address.trim().to_lowercase());
        let (local_part, domain) = address
            .rsplit_once('@')
            .map(|(l, d)| (CompactString::from(l), CompactString::from(d)))
            .unwrap_or_default();
        Email {
            address,
            local_part,
            domain,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.local_part.is_empty() && !self.domain.is_empty()
    }
}

/// An address with its optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: Email,
    pub name: Option<CompactString>,
}

/// Parse a `To`/`Cc`-style address list: comma-separated mailboxes in
/// either `Display Name <addr>` or bare `addr` form. Malformed entries
/// are dropped rather than failing the list.
pub fn parse_address_list(value: &str) -> Vec<Recipient> {
    split_addresses(value)
        .into_iter()
        .filter_map(|mailbox| parse_mailbox(&mailbox))
        .collect()
}

/// Parse an envelope address (`Return-Path` style), stripping one layer
/// of angle brackets. An empty `<>` return path yields `None`.
pub fn parse_envelope(value: &str) -> Option<Email> {
    let value = value.trim();
    let inner = value
        .strip_prefix('<')
        .and_then(|v| v.strip_suffix('>'))
        .unwrap_or(value);
    if inner.is_empty() {
        return None;
    }
    let email = Email::new(inner);
    email.is_valid().then_some(email)
}

fn parse_mailbox(mailbox: &str) -> Option<Recipient> {
    let mailbox = mailbox.trim();
    if mailbox.is_empty() {
        return None;
    }

    if let Some(open) = mailbox.rfind('<') {
        let close = mailbox[open..].find('>')? + open;
        let email = Email::new(&mailbox[open + 1..close]);
        let name = mailbox[..open].trim().trim_matches('"').trim();
        return Some(Recipient {
            email,
            name: (!name.is_empty()).then(|| CompactString::from(name.to_lowercase())),
        });
    }

    let email = Email::new(mailbox);
    email.is_valid().then_some(Recipient { email, name: None })
}

/// Split on commas that sit outside quoted strings and angle brackets.
fn split_addresses(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut angle = false;

    for ch in value.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                current.push(ch);
            }
            '<' if !quoted => {
                angle = true;
                current.push(ch);
            }
            '>' if !quoted => {
                angle = false;
                current.push(ch);
            }
            ',' if !quoted && !angle => {
                out.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }

    out
}
