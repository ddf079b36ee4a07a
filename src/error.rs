// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = ComposeError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ComposeError {
    /// The object graph does not have the shape the PDF specification requires.
    #[error("Malformed PDF structure: {0}")]
    Structural(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("{} is encrypted and cannot be edited", .0.display())]
    Encrypted(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid page range: {0}")]
    InvalidPageRange(String),

    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A source file changed between the reference snapshot and the rewrite.
    #[error("{} changed while its links were being updated", .0.display())]
    StaleReference(PathBuf),
}

impl ComposeError {
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures that come from storage rather than from the document itself.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Encrypted(_))
    }
}

impl From<toml::de::Error> for ComposeError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
