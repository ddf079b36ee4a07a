// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! A notes folder on disk: file access through tokio and a link scanner over
//! its Markdown files.

use crate::error::{ComposeError, Result};
use crate::link_text::{LinkKind, LinkText};
use crate::links::{normalize, relative_path, slash_path, Reference, ReferenceIndex, Storage};
use async_trait::async_trait;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

lazy_static! {
    static ref WIKI_LINK: Regex = Regex::new(r"!?\[\[[^\[\]\n]+\]\]").unwrap();
    static ref MARKDOWN_LINK: Regex =
        Regex::new(r#"!?\[[^\[\]\n]*\]\((?:<[^<>\n]+>|[^()\s]+)(?:\s+"[^"\n]*")?\)"#).unwrap();
}

/// Files on the local file system. Paths are used as given.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

#[async_trait]
impl Storage for FsStorage {
    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| ComposeError::io(path, e))
    }

    async fn write_bytes(&self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ComposeError::io(parent, e))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| ComposeError::io(path, e))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| ComposeError::io(path, e))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| ComposeError::io(path, e))
    }
}

/// Every link written in `text`, in order of appearance.
pub fn links_in(text: &str) -> Vec<Reference> {
    let mut links: Vec<Reference> = WIKI_LINK
        .find_iter(text)
        .chain(MARKDOWN_LINK.find_iter(text))
        .map(|m| Reference {
            raw_link_text: m.as_str().to_string(),
            span_start: m.start(),
            span_end: m.end(),
        })
        .collect();
    links.sort_by_key(|link| link.span_start);
    links.dedup_by(|later, earlier| later.span_start < earlier.span_end);
    links
}

/// Finds links to a file among the notes under `root`.
#[derive(Debug, Clone)]
pub struct VaultIndex {
    root: PathBuf,
    extensions: Vec<String>,
}

impl VaultIndex {
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            extensions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_note(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }

    /// Notes under the root, skipping hidden folders such as `.obsidian`.
    async fn notes(&self) -> Result<Vec<PathBuf>> {
        let mut notes = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| ComposeError::io(&dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| ComposeError::io(&dir, e))?
            {
                let path = entry.path();
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| ComposeError::io(&path, e))?;
                if file_type.is_dir() && !hidden {
                    pending.push(path);
                } else if file_type.is_file() && self.is_note(&path) {
                    notes.push(path);
                }
            }
        }
        notes.sort();
        Ok(notes)
    }

    /// True when `link`, written in `source`, points at `target`.
    ///
    /// Paths resolve against the vault root or the note's own folder. Wiki
    /// links may also name a file by its name alone.
    fn resolves_to(&self, source: &Path, link: &LinkText, target: &Path) -> bool {
        let path = link.path();
        if path.is_empty() {
            return false;
        }
        let path = Path::new(&path);
        let target = normalize(target);
        let folder = source.parent().unwrap_or(&self.root);
        if [self.root.join(path), folder.join(path)]
            .iter()
            .any(|candidate| normalize(candidate) == target)
        {
            return true;
        }
        link.kind == LinkKind::Wiki
            && path.components().count() == 1
            && target.file_name() == Some(path.as_os_str())
    }
}

#[async_trait]
impl ReferenceIndex for VaultIndex {
    async fn references_to(&self, target: &Path) -> Result<IndexMap<PathBuf, Vec<Reference>>> {
        let mut found = IndexMap::new();
        for note in self.notes().await? {
            let text = match tokio::fs::read_to_string(&note).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    debug!(path = %note.display(), "skipping note that is not UTF-8");
                    continue;
                }
                Err(e) => return Err(ComposeError::io(&note, e)),
            };
            let references: Vec<Reference> = links_in(&text)
                .into_iter()
                .filter(|reference| {
                    LinkText::parse(&reference.raw_link_text)
                        .is_some_and(|link| self.resolves_to(&note, &link, target))
                })
                .collect();
            if !references.is_empty() {
                found.insert(note, references);
            }
        }
        debug!(
            target = %target.display(),
            notes = found.len(),
            "collected references"
        );
        Ok(found)
    }

    /// Files inside the vault are spelled from the vault root, the form every
    /// note resolves the same way. Files outside it are relative to the note.
    fn link_path(&self, source: &Path, target: &Path) -> String {
        let target = normalize(target);
        match target.strip_prefix(normalize(&self.root)) {
            Ok(inside) => slash_path(inside),
            Err(_) => {
                let folder = source.parent().unwrap_or(&self.root);
                slash_path(&relative_path(folder, &target))
            }
        }
    }
}
