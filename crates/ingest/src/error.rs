/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use thiserror::Error;

/// Fatal failures surfaced to the caller. Everything else degrades into
/// part flags and keeps the scan going.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot parse mime structure and raw input is not allowed: {source}")]
    ConfigForbidsRaw {
        #[source]
        source: mime::parser::MimeError,
    },
}
