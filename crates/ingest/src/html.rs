/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use memchr::memchr;

/// Result of flattening an HTML part: the visible text, every link
/// destination, and whether the tag structure was balanced.
#[derive(Debug, Default)]
pub struct ExtractedHtml {
    pub text: Vec<u8>,
    pub links: Vec<HtmlLink>,
    pub balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlLink {
    pub href: String,
    /// Visible anchor text, empty for `src` references.
    pub anchor: String,
}

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "tr", "li", "table", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6",
    "blockquote", "hr",
];
const VOID_TAGS: &[&str] = &["br", "hr", "img", "meta", "link", "input", "area", "base", "col"];

/// Flatten HTML to its text content.
///
/// Newlines inside preformatted contexts come out as spaces; newlines in
/// the markup itself pass through for the normalizer to strip. Script
/// and style bodies are dropped, `href`/`src` destinations collected.
pub fn extract_text(html: &str) -> ExtractedHtml {
    let bytes = html.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(html.len() / 2);
    let mut links = Vec::new();

    let mut depth: i64 = 0;
    let mut balanced = true;
    let mut pre_depth: i64 = 0;
    let mut anchor: Option<(String, usize)> = None;

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => {
                // Comments may contain '>' freely.
                if bytes[i..].starts_with(b"<!--") {
                    match memchr::memmem::find(&bytes[i + 4..], b"-->") {
                        Some(end) => {
                            i += 4 + end + 3;
                            continue;
                        }
                        None => break,
                    }
                }
                let Some(close) = memchr(b'>', &bytes[i + 1..]) else {
                    balanced = false;
                    break;
                };
                let tag = &html[i + 1..i + 1 + close];
                i += close + 2;

                let trimmed = tag.trim();
                if trimmed.starts_with('!') || trimmed.starts_with('?') {
                    continue;
                }
                let closing = trimmed.starts_with('/');
                let self_closing = trimmed.ends_with('/');
                let name: String = trimmed
                    .trim_start_matches('/')
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_ascii_lowercase();
                if name.is_empty() {
                    continue;
                }

                let is_void = VOID_TAGS.contains(&name.as_str());
                if !is_void && !self_closing {
                    if closing {
                        if depth == 0 {
                            balanced = false;
                        } else {
                            depth -= 1;
                        }
                    } else {
                        depth += 1;
                    }
                }

                match name.as_str() {
                    "script" | "style" if !closing => {
                        // Drop everything up to the matching close tag.
                        let needle = format!("</{name}");
                        match find_ignore_case(&bytes[i..], needle.as_bytes()) {
                            Some(pos) => i += pos,
                            None => {
                                balanced = false;
                                break;
                            }
                        }
                    }
                    "pre" | "textarea" => {
                        if closing {
                            pre_depth = (pre_depth - 1).max(0);
                        } else {
                            pre_depth += 1;
                        }
                    }
                    "a" => {
                        if closing {
                            if let Some((href, text_start)) = anchor.take() {
                                let text = String::from_utf8_lossy(&out[text_start..])
                                    .trim()
                                    .to_string();
                                links.push(HtmlLink { href, anchor: text });
                            }
                        } else if let Some(href) = attribute(trimmed, "href") {
                            anchor = Some((href, out.len()));
                        }
                    }
                    "img" => {
                        if let Some(src) = attribute(trimmed, "src") {
                            links.push(HtmlLink {
                                href: src,
                                anchor: String::new(),
                            });
                        }
                    }
                    _ => {}
                }

                if BLOCK_TAGS.contains(&name.as_str()) && out.last() != Some(&b'\n') {
                    out.push(b'\n');
                }
            }
            b'&' => {
                let (decoded, consumed) = decode_entity(&html[i..]);
                match decoded {
                    Some(ch) => {
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    }
                    None => out.extend_from_slice(&bytes[i..i + consumed]),
                }
                i += consumed;
            }
            b'\n' | b'\r' if pre_depth > 0 => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    if let Some((href, text_start)) = anchor.take() {
        // Unterminated anchor; keep what we saw.
        let text = String::from_utf8_lossy(&out[text_start..]).trim().to_string();
        links.push(HtmlLink { href, anchor: text });
        balanced = false;
    }

    ExtractedHtml {
        text: out,
        links,
        balanced: balanced && depth == 0,
    }
}

/// Pull a single attribute value out of a tag body, tolerating quoted
/// and bare forms.
fn attribute(tag: &str, name: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let mut search = 0;
    while let Some(found) = lower[search..].find(name) {
        let at = search + found;
        search = at + name.len();
        // Must be a standalone attribute name followed by '='.
        let before_ok = at == 0
            || !lower.as_bytes()[at - 1].is_ascii_alphanumeric();
        let rest = tag[at + name.len()..].trim_start();
        if !before_ok || !rest.starts_with('=') {
            continue;
        }
        let value = rest[1..].trim_start();
        return Some(if let Some(stripped) = value.strip_prefix('"') {
            stripped.split('"').next().unwrap_or_default().to_string()
        } else if let Some(stripped) = value.strip_prefix('\'') {
            stripped.split('\'').next().unwrap_or_default().to_string()
        } else {
            value
                .split(|c: char| c.is_whitespace() || c == '>')
                .next()
                .unwrap_or_default()
                .to_string()
        });
    }
    None
}

fn decode_entity(input: &str) -> (Option<char>, usize) {
    let end = match input[1..].find(';') {
        Some(end) if end <= 10 => end + 1,
        _ => return (None, 1),
    };
    let entity = &input[1..end];
    let decoded = if let Some(num) = entity.strip_prefix('#') {
        let code = if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            u32::from_str_radix(hex, 16).ok()
        } else {
            num.parse().ok()
        };
        code.and_then(char::from_u32)
    } else {
        match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => None,
        }
    };

    match decoded {
        Some(ch) => (Some(ch), end + 1),
        None => (None, 1),
    }
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| {
        haystack[i..i + needle.len()]
            .iter()
            .zip(needle)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_flattened() {
        let extracted = extract_text("<html><body><p>Hello</p><p>world</p></body></html>");
        assert_eq!(extracted.text, b"\nHello\nworld\n");
        assert!(extracted.balanced);
    }

    #[test]
    fn preformatted_newlines_become_spaces() {
        let extracted = extract_text("<pre>line one\nline two</pre>\nafter");
        assert_eq!(extracted.text, b"line one line two\nafter");
    }

    #[test]
    fn entities_are_decoded() {
        let extracted = extract_text("a &amp; b &lt;c&gt; &#65; &#x42; &unknown; &");
        assert_eq!(extracted.text, b"a & b <c> A B &unknown; &");
    }

    #[test]
    fn script_and_style_bodies_are_dropped() {
        let extracted =
            extract_text("before<script>var x = '<p>not text</p>';</script>after<style>a{}</style>");
        assert_eq!(extracted.text, b"beforeafter");
    }

    #[test]
    fn links_are_collected() {
        let extracted = extract_text(
            "<a href=\"http://spam.example/x\">click here</a> <img src='http://img.example/p.png'>",
        );
        assert_eq!(
            extracted.links,
            vec![
                HtmlLink {
                    href: "http://spam.example/x".into(),
                    anchor: "click here".into()
                },
                HtmlLink {
                    href: "http://img.example/p.png".into(),
                    anchor: String::new()
                },
            ]
        );
    }

    #[test]
    fn unbalanced_markup_is_flagged() {
        assert!(!extract_text("<div><p>text</div>").balanced);
        assert!(!extract_text("text</div>").balanced);
        assert!(extract_text("<div><p>text</p></div>").balanced);
    }

    #[test]
    fn comments_are_skipped() {
        let extracted = extract_text("a<!-- <p>hidden</p> -->b");
        assert_eq!(extracted.text, b"ab");
    }
}
