// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Edits of the page tree (PDF 32000-1:2008, 7.7.3).
//!
//! Pages are addressed by 1-based page number. Removed page objects stay in
//! the object table until [`save`] prunes everything unreachable, so
//! destinations pointing at them simply stop resolving.

use crate::destination::{write_named_destinations, NamedDestinations};
use crate::error::{ComposeError, Result};
use crate::object::{integer, reference};
use crate::outline::OutlineTree;
use indexmap::IndexMap;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

// Page trees deeper than this are treated as cyclic.
const MAX_DEPTH: usize = 256;

// US Letter, used when no neighbouring page has a media box to copy.
const DEFAULT_MEDIA_BOX: [i64; 4] = [0, 0, 612, 792];

/// Parses a PDF held in memory. Encrypted documents are rejected.
pub fn load(bytes: &[u8], path: &Path) -> Result<Document> {
    let doc = Document::load_mem(bytes)?;
    ensure_not_encrypted(&doc, path)?;
    Ok(doc)
}

pub fn ensure_not_encrypted(doc: &Document, path: &Path) -> Result<()> {
    if doc.trailer.has(b"Encrypt") {
        return Err(ComposeError::Encrypted(path.to_path_buf()));
    }
    Ok(())
}

/// Drops unreachable objects and serializes the document.
pub fn save(doc: &mut Document) -> Result<Vec<u8>> {
    let pruned = doc.prune_objects();
    if !pruned.is_empty() {
        debug!(objects = pruned.len(), "dropped unreachable objects");
    }
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| ComposeError::structural(format!("cannot serialize document: {e}")))?;
    Ok(bytes)
}

pub fn page_count(doc: &Document) -> u32 {
    doc.get_pages().len() as u32
}

fn pages_root(doc: &Document) -> Result<ObjectId> {
    reference(doc.catalog()?, b"Pages")?
        .ok_or_else(|| ComposeError::structural("catalog has no /Pages"))
}

fn parent_of(doc: &Document, node: ObjectId) -> Result<ObjectId> {
    reference(doc.get_dictionary(node)?, b"Parent")?
        .ok_or_else(|| ComposeError::structural("page tree node has no /Parent"))
}

fn kids_mut(doc: &mut Document, node: ObjectId) -> Result<&mut Vec<Object>> {
    let indirect = match doc.get_dictionary(node)?.get(b"Kids") {
        Ok(Object::Reference(id)) => Some(*id),
        Ok(_) => None,
        Err(_) => return Err(ComposeError::structural("page tree node has no /Kids")),
    };
    match indirect {
        Some(id) => Ok(doc.get_object_mut(id)?.as_array_mut()?),
        None => Ok(doc.get_dictionary_mut(node)?.get_mut(b"Kids")?.as_array_mut()?),
    }
}

fn kid_index(doc: &mut Document, node: ObjectId, kid: ObjectId) -> Result<usize> {
    kids_mut(doc, node)?
        .iter()
        .position(|k| matches!(k, Object::Reference(id) if *id == kid))
        .ok_or_else(|| ComposeError::structural("page is missing from its parent's /Kids"))
}

/// Adds `delta` to `Count` of `node` and every node above it.
fn adjust_counts(doc: &mut Document, node: ObjectId, delta: i64) -> Result<()> {
    let mut current = Some(node);
    let mut depth = 0;
    while let Some(id) = current {
        let count = {
            let dict = doc.get_dictionary(id)?;
            dict.get(b"Count")
                .ok()
                .and_then(|count| integer(doc, count))
                .unwrap_or(0)
        };
        let dict = doc.get_dictionary_mut(id)?;
        dict.set("Count", (count + delta).max(0));
        current = reference(dict, b"Parent")?;
        depth += 1;
        if depth > MAX_DEPTH {
            return Err(ComposeError::structural("page tree is cyclic"));
        }
    }
    Ok(())
}

/// `MediaBox` of a page, inherited from its ancestors when not set on the page.
fn media_box(doc: &Document, page: ObjectId) -> Option<Object> {
    let mut current = Some(page);
    for _ in 0..MAX_DEPTH {
        let dict = doc.get_dictionary(current?).ok()?;
        if let Ok(media_box) = dict.get(b"MediaBox") {
            return Some(media_box.clone());
        }
        current = reference(dict, b"Parent").ok()?;
    }
    None
}

/// Inserts an empty page so that it becomes page `page`, sized like its neighbour.
///
/// `page` may be one past the last page, which appends.
pub fn insert_blank_page(doc: &mut Document, page: u32) -> Result<ObjectId> {
    let pages = doc.get_pages();
    let count = pages.len() as u32;
    if page == 0 || page > count + 1 {
        return Err(ComposeError::InvalidPageRange(format!(
            "cannot insert page {page} into a document of {count} pages"
        )));
    }

    let (parent, index, neighbour) = match (pages.get(&page), pages.get(&count)) {
        (Some(&target), _) => {
            let parent = parent_of(doc, target)?;
            (parent, kid_index(doc, parent, target)?, Some(target))
        }
        (None, Some(&last)) => {
            let parent = parent_of(doc, last)?;
            (parent, kid_index(doc, parent, last)? + 1, Some(last))
        }
        (None, None) => {
            let root = pages_root(doc)?;
            (root, kids_mut(doc, root)?.len(), None)
        }
    };

    let media_box = neighbour
        .and_then(|id| media_box(doc, id))
        .unwrap_or_else(|| Object::Array(DEFAULT_MEDIA_BOX.map(Object::Integer).to_vec()));
    let content_id = doc.add_object(Stream::new(dictionary! {}, vec![]));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => parent,
        "MediaBox" => media_box,
        "Resources" => dictionary! {},
        "Contents" => content_id,
    });

    kids_mut(doc, parent)?.insert(index, Object::Reference(page_id));
    adjust_counts(doc, parent, 1)?;
    debug!(page, id = ?page_id, "inserted blank page");
    Ok(page_id)
}

pub fn append_blank_page(doc: &mut Document) -> Result<ObjectId> {
    let count = page_count(doc);
    insert_blank_page(doc, count + 1)
}

// Unlinks a page from the tree and drops intermediate nodes left empty.
fn detach_page(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let root = pages_root(doc)?;
    let parent = parent_of(doc, page_id)?;
    kids_mut(doc, parent)?.retain(|k| !matches!(k, Object::Reference(id) if *id == page_id));
    adjust_counts(doc, parent, -1)?;

    let mut node = parent;
    for _ in 0..MAX_DEPTH {
        if node == root || !kids_mut(doc, node)?.is_empty() {
            return Ok(());
        }
        let above = parent_of(doc, node)?;
        kids_mut(doc, above)?.retain(|k| !matches!(k, Object::Reference(id) if *id == node));
        node = above;
    }
    Err(ComposeError::structural("page tree is cyclic"))
}

/// Removes page `page` from the page tree and returns its object id.
///
/// A document keeps at least one page.
pub fn remove_page(doc: &mut Document, page: u32) -> Result<ObjectId> {
    let pages = doc.get_pages();
    let Some(&page_id) = pages.get(&page) else {
        return Err(ComposeError::InvalidPageRange(format!(
            "page {page} does not exist (document has {} pages)",
            pages.len()
        )));
    };
    if pages.len() == 1 {
        return Err(ComposeError::InvalidArgument(
            "cannot remove the only page of a document".into(),
        ));
    }
    detach_page(doc, page_id)?;
    debug!(page, id = ?page_id, "removed page");
    Ok(page_id)
}

/// Keeps only `keep` (1-based, any order) and drops every other page.
pub fn retain_pages(doc: &mut Document, keep: &[u32]) -> Result<()> {
    let pages = doc.get_pages();
    if keep.is_empty() {
        return Err(ComposeError::InvalidPageRange("no pages selected".into()));
    }
    if let Some(missing) = keep.iter().find(|page| !pages.contains_key(page)) {
        return Err(ComposeError::InvalidPageRange(format!(
            "page {missing} does not exist (document has {} pages)",
            pages.len()
        )));
    }
    let keep: BTreeSet<u32> = keep.iter().copied().collect();
    for (page, page_id) in pages.into_iter().rev() {
        if !keep.contains(&page) {
            detach_page(doc, page_id)?;
        }
    }
    Ok(())
}

/// Appends every page of `other` after the last page of `doc`.
///
/// `other`'s page tree is grafted under `doc`'s root as an intermediate node,
/// its outline items are moved to the end of `doc`'s outline and its named
/// destinations are added to `doc`'s. On a name clash `doc`'s destination wins.
pub fn append_document(doc: &mut Document, mut other: Document, leaf_size: usize) -> Result<()> {
    let appended = page_count(&other);
    let own_dests = NamedDestinations::new(doc)?.entries()?;

    // Object ids are indexes, so `other` is moved above our highest id first.
    other.renumber_objects_with(doc.max_id + 1);
    let other_dests = NamedDestinations::new(&other)?.entries()?;
    let other_root = pages_root(&other)?;
    let other_outline = OutlineTree::root(&other)?;

    doc.max_id = doc.max_id.max(other.max_id);
    doc.objects.extend(other.objects);

    let root = pages_root(doc)?;
    doc.get_dictionary_mut(other_root)?.set("Parent", root);
    kids_mut(doc, root)?.push(Object::Reference(other_root));
    adjust_counts(doc, root, i64::from(appended))?;

    if let Some(other_outline) = other_outline {
        let outline = OutlineTree::ensure_root(doc)?;
        for item in other_outline.children(doc)? {
            outline.append_child(doc, item)?;
        }
    }

    if !other_dests.is_empty() {
        let mut merged: IndexMap<Vec<u8>, Object> = own_dests.into_iter().collect();
        for (name, dest) in other_dests {
            merged.entry(name).or_insert(dest);
        }
        write_named_destinations(doc, merged.into_iter().collect(), leaf_size)?;
    }

    debug!(pages = appended, "appended document");
    Ok(())
}

/// Parses a page selection like "1-3, 5, 8-10" into sorted unique page numbers.
///
/// Every page must exist in a document of `page_count` pages.
pub fn parse_ranges(input: &str, page_count: u32) -> Result<Vec<u32>> {
    let mut pages = BTreeSet::new();
    let invalid = |msg: String| ComposeError::InvalidPageRange(msg);

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start
                .trim()
                .parse()
                .map_err(|_| invalid(format!("invalid start: {start}")))?;
            let end: u32 = end
                .trim()
                .parse()
                .map_err(|_| invalid(format!("invalid end: {end}")))?;
            if start > end {
                return Err(invalid(format!("start {start} > end {end}")));
            }
            if end > page_count {
                return Err(invalid(format!(
                    "page {end} does not exist (document has {page_count} pages)"
                )));
            }
            pages.extend(start..=end);
        } else {
            let page: u32 = part
                .parse()
                .map_err(|_| invalid(format!("invalid page: {part}")))?;
            if page > page_count {
                return Err(invalid(format!(
                    "page {page} does not exist (document has {page_count} pages)"
                )));
            }
            pages.insert(page);
        }
    }

    if pages.contains(&0) {
        return Err(invalid("page numbers start at 1".into()));
    }
    if pages.is_empty() {
        return Err(invalid("no pages selected".into()));
    }
    Ok(pages.into_iter().collect())
}
