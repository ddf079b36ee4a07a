// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use crate::error::{ComposeError, Result};
use crate::page_labels::DEFAULT_LEAF_SIZE;
use serde::Deserialize;
use std::path::{Path, PathBuf};

// Represents the whole file, so the settings live under a `[config]` table.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    pub config: Config,
}

/// Settings shared by every subcommand. Command line flags override them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Folder holding the notes whose links are kept up to date.
    #[serde(default = "default_vault")]
    pub vault: PathBuf,
    /// Maximum entries per leaf when page labels or named destinations are written.
    #[serde(default = "default_leaf_size")]
    pub label_leaf_size: usize,
    /// Whether pages keep their labels when pages around them change.
    #[serde(default = "default_keep_labels")]
    pub keep_labels: bool,
    /// Extensions of the files scanned for links.
    #[serde(default = "default_link_extensions")]
    pub link_extensions: Vec<String>,
    /// Default `tracing` filter when `RUST_LOG` is unset, e.g. `info` or `pdf_composer=debug`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_vault() -> PathBuf {
    PathBuf::from(".")
}

fn default_leaf_size() -> usize {
    DEFAULT_LEAF_SIZE
}

fn default_keep_labels() -> bool {
    true
}

fn default_link_extensions() -> Vec<String> {
    vec!["md".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault: default_vault(),
            label_leaf_size: default_leaf_size(),
            keep_labels: default_keep_labels(),
            link_extensions: default_link_extensions(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        let conf = toml::from_str::<ConfigFile>(text)?.config;
        if conf.label_leaf_size == 0 {
            return Err(ComposeError::Config(
                "label_leaf_size must be at least 1".into(),
            ));
        }
        Ok(conf)
    }

    /// Loads the TOML file. Relative vault paths are taken relative to the file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ComposeError::io(path, e))?;
        let mut conf = Self::parse(&text)?;
        if conf.vault.is_relative() {
            if let Some(dir) = path.parent() {
                conf.vault = dir.join(&conf.vault);
            }
        }
        Ok(conf)
    }
}
