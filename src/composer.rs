// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Page-level document edits that keep labels, outline and incoming links consistent.
//!
//! Every operation is a `remap` rule (a pure function below) plus a mutation
//! handed to [`LinkUpdater::update_links`].

use crate::error::{ComposeError, Result};
use crate::links::{LinkRemap, LinkUpdateReport, LinkUpdater, ReferenceIndex, Storage};
use crate::outline::OutlineTree;
use crate::page_labels::{LabelPatch, PageLabelRegistry, DEFAULT_LEAF_SIZE};
use crate::pages;
use lopdf::Document;
use std::path::Path;
use tracing::info;

/// New page number of `page` after a page is inserted at `inserted`.
pub fn remap_after_insert(inserted: u32, page: u32) -> Option<u32> {
    (page >= inserted).then_some(page + 1)
}

/// New page number of `page` after `removed` is removed.
///
/// Links to the removed page itself are left alone and end up on the page
/// that moved into its place.
pub fn remap_after_remove(removed: u32, page: u32) -> Option<u32> {
    (page > removed).then(|| page - 1)
}

/// Where a link into the second file of a merge ends up.
pub fn remap_after_merge(merged_into: &Path, first_page_count: u32, page: Option<u32>) -> LinkRemap {
    LinkRemap::moved(merged_into, page.unwrap_or(1) + first_page_count)
}

/// Where a link into `source` ends up after `selected` (sorted, unique) moves to `destination`.
pub fn remap_after_extract(selected: &[u32], destination: &Path, page: Option<u32>) -> LinkRemap {
    let Some(page) = page else {
        return LinkRemap::unchanged();
    };
    match selected.binary_search(&page) {
        Ok(rank) => LinkRemap::moved(destination, rank as u32 + 1),
        Err(before) if before > 0 => LinkRemap::page(page - before as u32),
        Err(_) => LinkRemap::unchanged(),
    }
}

/// Result of one operation.
#[derive(Debug)]
pub struct ComposeOutcome {
    /// Page count of the edited document (the source, for an extraction).
    pub page_count: u32,
    pub links: LinkUpdateReport,
}

pub struct DocumentComposer<'a, S, I> {
    storage: &'a S,
    index: &'a I,
    leaf_size: usize,
}

impl<'a, S: Storage, I: ReferenceIndex> DocumentComposer<'a, S, I> {
    pub fn new(storage: &'a S, index: &'a I) -> Self {
        Self {
            storage,
            index,
            leaf_size: DEFAULT_LEAF_SIZE,
        }
    }

    /// Caps the number of entries per leaf in the trees written back.
    pub fn with_leaf_size(mut self, leaf_size: usize) -> Self {
        self.leaf_size = leaf_size;
        self
    }

    fn updater(&self) -> LinkUpdater<'a, S, I> {
        LinkUpdater::new(self.storage, self.index)
    }

    pub async fn load(&self, file: &Path) -> Result<Document> {
        let bytes = self.storage.read_bytes(file).await?;
        pages::load(&bytes, file)
    }

    async fn save(&self, file: &Path, doc: &mut Document) -> Result<u32> {
        let page_count = pages::page_count(doc);
        let bytes = pages::save(doc)?;
        self.storage.write_bytes(file, bytes).await?;
        Ok(page_count)
    }

    fn labels(&self, doc: &Document) -> Result<Option<PageLabelRegistry>> {
        Ok(PageLabelRegistry::from_document(doc)?.map(|labels| labels.with_leaf_size(self.leaf_size)))
    }

    /// Appends a blank page. Nothing links to it yet, so no link changes.
    pub async fn add_page(&self, file: &Path) -> Result<ComposeOutcome> {
        let mut doc = self.load(file).await?;
        pages::append_blank_page(&mut doc)?;
        let page_count = self.save(file, &mut doc).await?;
        info!(file = %file.display(), page = page_count, "added page");
        Ok(ComposeOutcome {
            page_count,
            links: LinkUpdateReport::default(),
        })
    }

    /// Inserts a blank page so that it becomes page `page`.
    ///
    /// With `keep_labels` every existing page keeps its label. `patch` adjusts
    /// the inserted page's label.
    pub async fn insert_page(
        &self,
        file: &Path,
        page: u32,
        keep_labels: bool,
        patch: Option<&LabelPatch>,
    ) -> Result<ComposeOutcome> {
        let mutate = async {
            let mut doc = self.load(file).await?;
            let labels = self.labels(&doc)?;
            pages::insert_blank_page(&mut doc, page)?;
            if let Some(mut labels) = labels {
                labels.insert_page(page, keep_labels, patch);
                labels.write_to_document(&mut doc)?;
            }
            self.save(file, &mut doc).await
        };
        let remap = |_: &Path, old: Option<u32>| match old.and_then(|p| remap_after_insert(page, p)) {
            Some(new) => LinkRemap::page(new),
            None => LinkRemap::unchanged(),
        };

        let (page_count, links) = self
            .updater()
            .update_links(mutate, &[file.to_path_buf()], remap)
            .await?;
        info!(file = %file.display(), page, "inserted page");
        Ok(ComposeOutcome { page_count, links })
    }

    /// Removes page `page` and prunes outline items that pointed at it.
    pub async fn remove_page(&self, file: &Path, page: u32, keep_labels: bool) -> Result<ComposeOutcome> {
        let mutate = async {
            let mut doc = self.load(file).await?;
            let labels = self.labels(&doc)?;
            pages::remove_page(&mut doc, page)?;
            if let Some(mut labels) = labels {
                labels.remove_page(page, keep_labels);
                labels.write_to_document(&mut doc)?;
            }
            OutlineTree::prune(&mut doc)?;
            self.save(file, &mut doc).await
        };
        let remap = |_: &Path, old: Option<u32>| match old.and_then(|p| remap_after_remove(page, p)) {
            Some(new) => LinkRemap::page(new),
            None => LinkRemap::unchanged(),
        };

        let (page_count, links) = self
            .updater()
            .update_links(mutate, &[file.to_path_buf()], remap)
            .await?;
        info!(file = %file.display(), page, "removed page");
        Ok(ComposeOutcome { page_count, links })
    }

    /// Appends `file2` to `file1` and deletes `file2`. Links into `file2` move to `file1`.
    pub async fn merge_files(&self, file1: &Path, file2: &Path, keep_labels: bool) -> Result<ComposeOutcome> {
        if file1 == file2 {
            return Err(ComposeError::InvalidArgument(
                "cannot merge a file into itself".into(),
            ));
        }
        let mut doc1 = self.load(file1).await?;
        let doc2 = self.load(file2).await?;
        let first_pages = pages::page_count(&doc1);

        let mutate = async {
            let labels1 = self.labels(&doc1)?;
            let labels2 = PageLabelRegistry::from_document(&doc2)?;
            let second_pages = pages::page_count(&doc2);

            pages::append_document(&mut doc1, doc2, self.leaf_size)?;
            if keep_labels && (labels1.is_some() || labels2.is_some()) {
                let mut labels = labels1.unwrap_or_else(|| {
                    PageLabelRegistry::decimal(first_pages).with_leaf_size(self.leaf_size)
                });
                labels.append(labels2.as_ref(), second_pages);
                labels.write_to_document(&mut doc1)?;
            }

            let page_count = self.save(file1, &mut doc1).await?;
            self.storage.remove(file2).await?;
            Ok(page_count)
        };
        let remap = |_: &Path, old: Option<u32>| remap_after_merge(file1, first_pages, old);

        let (page_count, links) = self
            .updater()
            .update_links(mutate, &[file2.to_path_buf()], remap)
            .await?;
        info!(into = %file1.display(), from = %file2.display(), "merged files");
        Ok(ComposeOutcome { page_count, links })
    }

    /// Moves `selected` (a page set in any order) out of `file` into a new file at `destination`.
    pub async fn extract_pages(
        &self,
        file: &Path,
        selected: &[u32],
        destination: &Path,
        allow_overwrite: bool,
        keep_labels: bool,
    ) -> Result<ComposeOutcome> {
        let mut selected = selected.to_vec();
        selected.sort_unstable();
        selected.dedup();

        if file == destination {
            return Err(ComposeError::InvalidArgument(
                "cannot extract pages into the source file".into(),
            ));
        }
        if !allow_overwrite && self.storage.exists(destination).await? {
            return Err(ComposeError::AlreadyExists(destination.to_path_buf()));
        }
        let doc = self.load(file).await?;
        let page_count = pages::page_count(&doc);
        if let Some(missing) = selected.iter().find(|&&p| p == 0 || p > page_count) {
            return Err(ComposeError::InvalidPageRange(format!(
                "page {missing} does not exist (document has {page_count} pages)"
            )));
        }
        if selected.is_empty() || selected.len() as u32 == page_count {
            return Err(ComposeError::InvalidPageRange(
                "select at least one page and leave at least one behind".into(),
            ));
        }

        let mutate = async {
            let labels = self.labels(&doc)?;
            let mut extracted = doc.clone();
            let mut remaining = doc;

            pages::retain_pages(&mut extracted, &selected)?;
            let kept: Vec<u32> = (1..=page_count)
                .filter(|p| selected.binary_search(p).is_err())
                .collect();
            pages::retain_pages(&mut remaining, &kept)?;

            if let Some(labels) = labels {
                let mut extracted_labels = if keep_labels {
                    labels.extract(&selected)
                } else {
                    PageLabelRegistry::decimal(selected.len() as u32)
                };
                extracted_labels.write_to_document(&mut extracted)?;

                let mut remaining_labels = labels;
                for &page in selected.iter().rev() {
                    remaining_labels.remove_page(page, keep_labels);
                }
                remaining_labels.write_to_document(&mut remaining)?;
            }

            OutlineTree::prune(&mut extracted)?;
            OutlineTree::prune(&mut remaining)?;

            self.save(destination, &mut extracted).await?;
            self.save(file, &mut remaining).await
        };
        let remap = |_: &Path, old: Option<u32>| remap_after_extract(&selected, destination, old);

        let (page_count, links) = self
            .updater()
            .update_links(mutate, &[file.to_path_buf()], remap)
            .await?;
        info!(
            from = %file.display(),
            into = %destination.display(),
            pages = selected.len(),
            "extracted pages"
        );
        Ok(ComposeOutcome { page_count, links })
    }

    /// Drops outline items whose destination no longer resolves. Returns how many went.
    pub async fn prune_outline(&self, file: &Path) -> Result<usize> {
        let mut doc = self.load(file).await?;
        let pruned = OutlineTree::prune(&mut doc)?;
        if pruned > 0 {
            self.save(file, &mut doc).await?;
        }
        Ok(pruned)
    }
}
