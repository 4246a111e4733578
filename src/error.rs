// Laminate layer builder.
// Copyright 2026 Laminate Contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Error taxonomy for the layer differ and squashfs generator.
//!
//! Each variant corresponds to one of the error kinds in the design: bad
//! bundle state, a failed filesystem walk, an unrecoverable whiteout
//! failure, an external archiver problem, a content-store rejection, or a
//! missing extraction tool.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed bundle metadata, a missing prior manifest, or an unparsable
    /// manifest file.
    #[error("{message}")]
    Input { message: String },

    /// IO failure while walking the rootfs or diffing it against the prior
    /// manifest.
    #[error("failed to walk {path}: {source}")]
    Walk { path: PathBuf, source: io::Error },

    /// Unrecoverable failure to create either whiteout form. A permission
    /// failure alone is not this error: it triggers the sidecar fallback
    /// instead.
    #[error("failed to create whiteout at {path}: {message}")]
    Whiteout { path: PathBuf, message: String },

    /// The external archiver was not found, failed to spawn, or exited
    /// non-zero.
    #[error("{tool}: {message}")]
    Archiver { tool: String, message: String },

    /// The content store rejected the blob or failed to persist metadata.
    #[error("content store error: {message}")]
    Store { message: String },

    /// An external tool required for extraction is not on `PATH`.
    #[error("{tool} not found on PATH: {hint}")]
    ToolMissing { tool: String, hint: String },

    /// A plain IO failure that doesn't fit a more specific kind above.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn input(message: impl Into<String>) -> Self {
        Error::Input {
            message: message.into(),
        }
    }

    pub fn walk(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Walk {
            path: path.into(),
            source,
        }
    }

    pub fn whiteout(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Whiteout {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn archiver(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Archiver {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Error::Store {
            message: message.into(),
        }
    }

    pub fn tool_missing(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        Error::ToolMissing {
            tool: tool.into(),
            hint: hint.into(),
        }
    }
}
