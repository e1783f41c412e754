/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod addr;
pub mod error;
pub mod html;
pub mod message;
pub mod received;
pub mod task;
pub mod text;
pub mod url;

pub use error::IngestError;
pub use nlp::tokenizers::{ExceptionKind, ProcessException};
pub use task::{Action, Config, Oracles, PreResult, Task, TaskFlags, TextFlags, TextPart};
pub use url::{Url, UrlError, UrlFlags};
