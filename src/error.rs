// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Error type for this crate.
#[derive(Debug, Error)]
pub enum DepcheckError {
    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("not an ELF file: {0}")]
    NotElf(String),

    #[error("unsupported ELF variant: {0}")]
    Unsupported(String),

    #[error("malformed ELF file: {0}")]
    CorruptElf(String),

    #[error("dependency not found on any search path: {0}")]
    UnresolvedDependency(String),
}

impl From<object::read::Error> for DepcheckError {
    fn from(e: object::read::Error) -> Self {
        Self::CorruptElf(e.to_string())
    }
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, DepcheckError>;
