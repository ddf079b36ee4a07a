// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Page-level editing of PDF documents that keeps page labels, the outline
//! and links from a folder of notes consistent with the new page order.

pub mod composer;
pub mod config;
pub mod destination;
pub mod error;
pub mod keyed_tree;
pub mod link_text;
pub mod links;
pub mod object;
pub mod outline;
pub mod page_labels;
pub mod pages;
pub mod vault;

#[cfg(test)]
mod test_util;

pub use composer::{ComposeOutcome, DocumentComposer};
pub use config::Config;
pub use error::{ComposeError, Result};
pub use links::{LinkUpdateReport, ReferenceIndex, Storage};
