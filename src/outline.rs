// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Document outline (PDF 32000-1:2008, 12.3.3).
//!
//! Items live in the document's object table and are addressed by `ObjectId`.
//! `Parent`/`First`/`Last`/`Next`/`Prev` are plain indirect references, so no
//! item owns another and tree surgery is just rewriting those entries.
//!
//! Structural edits do not touch `Count`. After a batch of edits call
//! [`OutlineItem::update_count_for_all_ancestors`] on the lowest changed item;
//! each recount only reads the stored counts of direct children, so it is only
//! correct once every edited subtree below has been recounted.

use crate::destination::{Destination, DestinationResolver};
use crate::error::{ComposeError, Result};
use crate::object::{catalog_mut, integer, reference, text};
use lopdf::{dictionary, text_string, Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info};

// Outlines deeper or longer than this are treated as corrupt (cyclic links).
const MAX_ITEMS: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutlineItem {
    id: ObjectId,
}

impl OutlineItem {
    pub fn new(id: ObjectId) -> Self {
        Self { id }
    }

    pub fn id(self) -> ObjectId {
        self.id
    }

    fn dict(self, doc: &Document) -> Result<&Dictionary> {
        Ok(doc.get_dictionary(self.id)?)
    }

    fn dict_mut(self, doc: &mut Document) -> Result<&mut Dictionary> {
        Ok(doc.get_dictionary_mut(self.id)?)
    }

    fn link(self, doc: &Document, key: &[u8]) -> Result<Option<OutlineItem>> {
        Ok(reference(self.dict(doc)?, key)?.map(OutlineItem::new))
    }

    fn set_link(self, doc: &mut Document, key: &str, target: Option<OutlineItem>) -> Result<()> {
        let dict = self.dict_mut(doc)?;
        match target {
            Some(target) => dict.set(key, Object::Reference(target.id)),
            None => {
                dict.remove(key.as_bytes());
            }
        }
        Ok(())
    }

    pub fn parent(self, doc: &Document) -> Result<Option<OutlineItem>> {
        self.link(doc, b"Parent")
    }

    pub fn first_child(self, doc: &Document) -> Result<Option<OutlineItem>> {
        self.link(doc, b"First")
    }

    pub fn last_child(self, doc: &Document) -> Result<Option<OutlineItem>> {
        self.link(doc, b"Last")
    }

    pub fn next_sibling(self, doc: &Document) -> Result<Option<OutlineItem>> {
        self.link(doc, b"Next")
    }

    pub fn prev_sibling(self, doc: &Document) -> Result<Option<OutlineItem>> {
        self.link(doc, b"Prev")
    }

    pub fn children(self, doc: &Document) -> Result<Vec<OutlineItem>> {
        let mut children = Vec::new();
        let mut seen = HashSet::new();
        let mut next = self.first_child(doc)?;
        while let Some(child) = next {
            if !seen.insert(child) || children.len() >= MAX_ITEMS {
                return Err(ComposeError::structural("outline sibling list is cyclic"));
            }
            children.push(child);
            next = child.next_sibling(doc)?;
        }
        Ok(children)
    }

    pub fn is_root(self, doc: &Document) -> Result<bool> {
        Ok(OutlineTree::root(doc)? == Some(self))
    }

    pub fn title(self, doc: &Document) -> Result<Option<String>> {
        Ok(text(doc, self.dict(doc)?, b"Title"))
    }

    pub fn set_title(self, doc: &mut Document, title: &str) -> Result<()> {
        self.dict_mut(doc)?.set("Title", text_string(title));
        Ok(())
    }

    pub fn destination(self, doc: &Document) -> Result<Option<Destination>> {
        Ok(Destination::of_item(doc, self.dict(doc)?))
    }

    pub fn set_destination(self, doc: &mut Document, destination: &Destination) -> Result<()> {
        let dict = self.dict_mut(doc)?;
        dict.remove(b"A");
        dict.set("Dest", destination.to_object());
        Ok(())
    }

    /// Stored `Count`, 0 when absent.
    pub fn count(self, doc: &Document) -> Result<i64> {
        let dict = self.dict(doc)?;
        Ok(dict
            .get(b"Count")
            .ok()
            .and_then(|count| integer(doc, count))
            .unwrap_or(0))
    }

    /// The root is always open; other items are open when their count is positive.
    pub fn is_open(self, doc: &Document) -> Result<bool> {
        Ok(self.is_root(doc)? || self.count(doc)? > 0)
    }

    pub fn is_ancestor_of(self, doc: &Document, other: OutlineItem) -> Result<bool> {
        let mut current = other.parent(doc)?;
        let mut steps = 0;
        while let Some(item) = current {
            if item == self {
                return Ok(true);
            }
            steps += 1;
            if steps > MAX_ITEMS {
                return Err(ComposeError::structural("outline parent chain is cyclic"));
            }
            current = item.parent(doc)?;
        }
        Ok(false)
    }

    /// Appends a new leaf as the last child. Counts are not updated.
    pub fn create_child(
        self,
        doc: &mut Document,
        title: &str,
        destination: Option<&Destination>,
    ) -> Result<OutlineItem> {
        let mut dict = dictionary! {
            "Title" => text_string(title),
            "Parent" => self.id,
        };
        if let Some(destination) = destination {
            dict.set("Dest", destination.to_object());
        }
        let last = self.last_child(doc)?;
        if let Some(last) = last {
            dict.set("Prev", last.id);
        }
        let child = OutlineItem::new(doc.add_object(dict));

        match last {
            Some(last) => last.set_link(doc, "Next", Some(child))?,
            None => self.set_link(doc, "First", Some(child))?,
        }
        self.set_link(doc, "Last", Some(child))?;
        Ok(child)
    }

    /// Moves `child` (and its subtree) to the end of this item's children.
    pub fn append_child(self, doc: &mut Document, child: OutlineItem) -> Result<()> {
        if child == self || child.is_ancestor_of(doc, self)? {
            return Err(ComposeError::InvalidArgument(
                "an outline item cannot become its own descendant".into(),
            ));
        }
        if child.is_root(doc)? {
            return Err(ComposeError::InvalidArgument(
                "the outline root cannot be moved".into(),
            ));
        }

        if let Some(old_parent) = child.remove(doc)? {
            old_parent.update_count_for_all_ancestors(doc, true)?;
        }

        let last = self.last_child(doc)?;
        child.set_link(doc, "Parent", Some(self))?;
        child.set_link(doc, "Prev", last)?;
        child.set_link(doc, "Next", None)?;
        match last {
            Some(last) => last.set_link(doc, "Next", Some(child))?,
            None => self.set_link(doc, "First", Some(child))?,
        }
        self.set_link(doc, "Last", Some(child))?;

        self.update_count_for_all_ancestors(doc, true)
    }

    /// Unlinks this item from its parent and siblings and returns the former parent.
    ///
    /// The item keeps its children, which leaves the whole subtree detached.
    /// Counts are not updated.
    pub fn remove(self, doc: &mut Document) -> Result<Option<OutlineItem>> {
        let Some(parent) = self.parent(doc)? else {
            return Ok(None);
        };
        let prev = self.prev_sibling(doc)?;
        let next = self.next_sibling(doc)?;

        match prev {
            Some(prev) => prev.set_link(doc, "Next", next)?,
            None => parent.set_link(doc, "First", next)?,
        }
        match next {
            Some(next) => next.set_link(doc, "Prev", prev)?,
            None => parent.set_link(doc, "Last", prev)?,
        }

        let dict = self.dict_mut(doc)?;
        dict.remove(b"Parent");
        dict.remove(b"Prev");
        dict.remove(b"Next");
        Ok(Some(parent))
    }

    /// Removes this item and splices its children into its place in the parent's
    /// sibling list. Returns the former parent. Counts are not updated.
    pub fn remove_and_lift_up_children(self, doc: &mut Document) -> Result<OutlineItem> {
        let parent = self.parent(doc)?.ok_or_else(|| {
            ComposeError::InvalidArgument("the outline root cannot be removed".into())
        })?;
        let children = self.children(doc)?;
        let (Some(&first), Some(&last)) = (children.first(), children.last()) else {
            self.remove(doc)?;
            return Ok(parent);
        };
        let prev = self.prev_sibling(doc)?;
        let next = self.next_sibling(doc)?;

        for child in &children {
            child.set_link(doc, "Parent", Some(parent))?;
        }
        first.set_link(doc, "Prev", prev)?;
        match prev {
            Some(prev) => prev.set_link(doc, "Next", Some(first))?,
            None => parent.set_link(doc, "First", Some(first))?,
        }
        last.set_link(doc, "Next", next)?;
        match next {
            Some(next) => next.set_link(doc, "Prev", Some(last))?,
            None => parent.set_link(doc, "Last", Some(last))?,
        }

        let dict = self.dict_mut(doc)?;
        for key in [&b"Parent"[..], b"Prev", b"Next", b"First", b"Last", b"Count"] {
            dict.remove(key);
        }
        Ok(parent)
    }

    /// Number of visible descendants, from the direct children's stored counts.
    pub fn visible_descendants(self, doc: &Document) -> Result<i64> {
        let mut visible = 0;
        for child in self.children(doc)? {
            visible += 1 + child.count(doc)?.max(0);
        }
        Ok(visible)
    }

    /// Recomputes `Count`, negated when `opened` is false.
    pub fn update_count(self, doc: &mut Document, opened: bool) -> Result<()> {
        if !opened && self.is_root(doc)? {
            return Err(ComposeError::InvalidArgument(
                "the outline root cannot be closed".into(),
            ));
        }
        let visible = self.visible_descendants(doc)?;
        let dict = self.dict_mut(doc)?;
        if visible == 0 {
            dict.remove(b"Count");
        } else {
            dict.set("Count", if opened { visible } else { -visible });
        }
        Ok(())
    }

    /// Recounts every ancestor up to the root, each keeping its open/closed state.
    pub fn update_count_for_all_ancestors(self, doc: &mut Document, include_self: bool) -> Result<()> {
        let mut current = if include_self {
            Some(self)
        } else {
            self.parent(doc)?
        };
        let mut steps = 0;
        while let Some(item) = current {
            let opened = item.is_open(doc)?;
            item.update_count(doc, opened)?;
            steps += 1;
            if steps > MAX_ITEMS {
                return Err(ComposeError::structural("outline parent chain is cyclic"));
            }
            current = item.parent(doc)?;
        }
        Ok(())
    }

    /// Expands or collapses this item.
    pub fn set_open(self, doc: &mut Document, opened: bool) -> Result<()> {
        self.update_count(doc, opened)?;
        self.update_count_for_all_ancestors(doc, false)
    }

    /// Orders the children by destination page, then top to bottom on the page.
    /// Children whose destination does not resolve keep their order at the end.
    pub fn sort_children(self, doc: &mut Document) -> Result<()> {
        let mut keyed = {
            let resolver = DestinationResolver::new(doc)?;
            let mut keyed = Vec::new();
            for child in self.children(doc)? {
                let position = child
                    .destination(doc)?
                    .and_then(|dest| resolver.position(&dest));
                keyed.push((position, child));
            }
            keyed
        };
        keyed.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some((page_a, offset_a)), Some((page_b, offset_b))) => {
                page_a.cmp(page_b).then(offset_a.total_cmp(offset_b))
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        let sorted: Vec<OutlineItem> = keyed.into_iter().map(|(_, child)| child).collect();
        for (i, child) in sorted.iter().enumerate() {
            let prev = i.checked_sub(1).map(|j| sorted[j]);
            child.set_link(doc, "Prev", prev)?;
            child.set_link(doc, "Next", sorted.get(i + 1).copied())?;
        }
        self.set_link(doc, "First", sorted.first().copied())?;
        self.set_link(doc, "Last", sorted.last().copied())
    }
}

/// One outline item flattened for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlineEntry {
    pub level: usize,
    pub title: String,
    pub page: Option<u32>,
    pub count: i64,
}

/// Document-level outline operations.
pub struct OutlineTree;

impl OutlineTree {
    /// The outline root from the catalog's `/Outlines`, if the document has one.
    pub fn root(doc: &Document) -> Result<Option<OutlineItem>> {
        let Some(id) = reference(doc.catalog()?, b"Outlines")? else {
            return Ok(None);
        };
        Ok(doc.get_dictionary(id).is_ok().then(|| OutlineItem::new(id)))
    }

    /// The outline root, created empty when the document has none.
    pub fn ensure_root(doc: &mut Document) -> Result<OutlineItem> {
        if let Some(root) = Self::root(doc)? {
            return Ok(root);
        }
        let id = doc.add_object(dictionary! { "Type" => "Outlines" });
        catalog_mut(doc)?.set("Outlines", id);
        Ok(OutlineItem::new(id))
    }

    /// Every item below the root, depth first, parents before children, with its depth.
    pub fn items(doc: &Document) -> Result<Vec<(OutlineItem, usize)>> {
        let Some(root) = Self::root(doc)? else {
            return Ok(vec![]);
        };
        let mut items = Vec::new();
        let mut stack: Vec<(OutlineItem, usize)> = root
            .children(doc)?
            .into_iter()
            .rev()
            .map(|child| (child, 0))
            .collect();
        while let Some((item, level)) = stack.pop() {
            items.push((item, level));
            if items.len() > MAX_ITEMS {
                return Err(ComposeError::structural("outline is cyclic"));
            }
            stack.extend(item.children(doc)?.into_iter().rev().map(|c| (c, level + 1)));
        }
        Ok(items)
    }

    /// Every item below `item`, children before their parent.
    fn post_order(doc: &Document, item: OutlineItem) -> Result<Vec<OutlineItem>> {
        let mut order = Vec::new();
        let mut stack = vec![(item, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            stack.push((current, true));
            for child in current.children(doc)?.into_iter().rev() {
                stack.push((child, false));
            }
            if stack.len() + order.len() > MAX_ITEMS {
                return Err(ComposeError::structural("outline is cyclic"));
            }
        }
        order.pop(); // `item` itself comes last
        Ok(order)
    }

    /// Removes every item whose destination no longer points at a page of the
    /// document, keeping its children in its place. Returns the number removed.
    pub fn prune(doc: &mut Document) -> Result<usize> {
        let Some(root) = Self::root(doc)? else {
            return Ok(0);
        };

        // Validity depends only on each item's own destination, so decide it
        // for every item before any surgery.
        let doomed = {
            let resolver = DestinationResolver::new(doc)?;
            let mut doomed = Vec::new();
            for item in Self::post_order(doc, root)? {
                let dict = item.dict(doc)?;
                if !Destination::has_page_target(doc, dict) {
                    continue;
                }
                let resolves = Destination::of_item(doc, dict)
                    .and_then(|dest| resolver.page_number(&dest))
                    .is_some();
                if !resolves {
                    debug!(item = ?item.id, "outline destination no longer resolves");
                    doomed.push(item);
                }
            }
            doomed
        };

        for item in &doomed {
            let parent = item.remove_and_lift_up_children(doc)?;
            parent.update_count_for_all_ancestors(doc, true)?;
        }
        if !doomed.is_empty() {
            info!(removed = doomed.len(), "pruned outline items");
        }
        Ok(doomed.len())
    }

    pub fn entries(doc: &Document) -> Result<Vec<OutlineEntry>> {
        let resolver = DestinationResolver::new(doc)?;
        let mut entries = Vec::new();
        for (item, level) in Self::items(doc)? {
            entries.push(OutlineEntry {
                level,
                title: item.title(doc)?.unwrap_or_default(),
                page: item
                    .destination(doc)?
                    .and_then(|dest| resolver.page_number(&dest)),
                count: item.count(doc)?,
            });
        }
        Ok(entries)
    }
}
