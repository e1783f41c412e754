/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

/// Remove dot segments from a URL path in place (RFC 3986 §5.2.4) and
/// return the canonical length.
///
/// Runs of `/` collapse, `.` segments vanish, `..` pops one segment and
/// never pops past the root of an absolute path. A relative path whose
/// `..` underflows resolves to `/`. The transform is idempotent and the
/// output never grows.
pub fn canonicalize_in_place(path: &mut [u8]) -> usize {
    let absolute = path.first() == Some(&b'/');
    let trailing = path.last() == Some(&b'/');

    let mut segments: Vec<(usize, usize)> = Vec::new();
    let mut rooted = absolute;
    let mut i = 0;

    while i < path.len() {
        if path[i] == b'/' {
            i += 1;
            continue;
        }
        let start = i;
        while i < path.len() && path[i] != b'/' {
            i += 1;
        }
        match &path[start..i] {
            b"." => {}
            b".." => {
                if segments.pop().is_none() {
                    // Nothing left to pop: the result is pinned to root.
                    rooted = true;
                }
            }
            _ => segments.push((start, i)),
        }
    }

    if segments.is_empty() {
        return if rooted {
            path[0] = b'/';
            1
        } else {
            0
        };
    }

    let mut out = 0;
    for (n, &(start, end)) in segments.iter().enumerate() {
        if rooted || n > 0 {
            path[out] = b'/';
            out += 1;
        }
        path.copy_within(start..end, out);
        out += end - start;
    }
    if trailing {
        path[out] = b'/';
        out += 1;
    }

    out
}

/// Copying convenience over [`canonicalize_in_place`].
pub fn canonicalize(path: &[u8]) -> Vec<u8> {
    let mut buf = path.to_vec();
    let len = canonicalize_in_place(&mut buf);
    buf.truncate(len);
    buf
}
