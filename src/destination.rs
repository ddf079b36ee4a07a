// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Explicit and named destinations (PDF 32000-1:2008, 12.3.2).

use crate::error::{ComposeError, Result};
use crate::keyed_tree::{KeyCodec, NameKey, NameTree};
use crate::object::{as_dict, catalog_mut, entry, number, resolve};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;
use tracing::debug;

/// Maps page objects to their 1-based page number.
#[derive(Debug, Clone, Default)]
pub struct PageIndex {
    by_id: HashMap<ObjectId, u32>,
    ids: Vec<ObjectId>,
}

impl PageIndex {
    pub fn new(doc: &Document) -> Self {
        let ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let by_id = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i as u32 + 1))
            .collect();
        Self { by_id, ids }
    }

    pub fn page_number(&self, id: ObjectId) -> Option<u32> {
        self.by_id.get(&id).copied()
    }

    pub fn page_id(&self, page_number: u32) -> Option<ObjectId> {
        let index = page_number.checked_sub(1)?;
        self.ids.get(index as usize).copied()
    }

    pub fn count(&self) -> u32 {
        self.ids.len() as u32
    }
}

/// `[page /Fit-type params...]`
#[derive(Debug, Clone, PartialEq)]
pub struct ExplicitDestination {
    /// A page reference, or a 0-based page index as some producers write it.
    pub page: Object,
    pub fit: Vec<u8>,
    pub params: Vec<Object>,
}

impl ExplicitDestination {
    pub fn new(page: ObjectId, fit: &str, params: Vec<Object>) -> Self {
        Self {
            page: Object::Reference(page),
            fit: fit.as_bytes().to_vec(),
            params,
        }
    }

    /// `[page /XYZ left top null]`
    pub fn xyz(page: ObjectId, left: f32, top: f32) -> Self {
        Self::new(page, "XYZ", vec![left.into(), top.into(), Object::Null])
    }

    /// `[page /Fit]`
    pub fn fit(page: ObjectId) -> Self {
        Self::new(page, "Fit", vec![])
    }

    pub fn from_array(doc: &Document, array: &[Object]) -> Option<Self> {
        let (page, rest) = array.split_first()?;
        let (fit, params) = match rest.split_first() {
            Some((fit, params)) => (resolve(doc, fit)?.as_name().ok()?.to_vec(), params.to_vec()),
            None => (b"Fit".to_vec(), vec![]),
        };
        Some(Self {
            page: page.clone(),
            fit,
            params,
        })
    }

    pub fn to_object(&self) -> Object {
        let mut array = vec![self.page.clone(), Object::Name(self.fit.clone())];
        array.extend(self.params.iter().cloned());
        Object::Array(array)
    }

    /// 1-based page number in `pages`, if the target page is still in the document.
    pub fn page_number(&self, pages: &PageIndex) -> Option<u32> {
        match &self.page {
            Object::Reference(id) => pages.page_number(*id),
            Object::Integer(index) => u32::try_from(*index)
                .ok()
                .filter(|&index| index < pages.count())
                .map(|index| index + 1),
            _ => None,
        }
    }

    /// Vertical coordinate of the top of the view, when the fit type has one.
    pub fn top(&self, doc: &Document) -> Option<f32> {
        let param = match self.fit.as_slice() {
            b"XYZ" => self.params.get(1),
            b"FitH" | b"FitBH" => self.params.first(),
            b"FitR" => self.params.get(3),
            _ => None,
        }?;
        number(doc, param)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Explicit(ExplicitDestination),
    Named(Vec<u8>),
}

impl Destination {
    /// Parses a destination value: an array, a name or string, or a dictionary with `/D`.
    pub fn from_object(doc: &Document, obj: &Object) -> Option<Self> {
        match resolve(doc, obj)? {
            Object::Array(array) => ExplicitDestination::from_array(doc, array).map(Self::Explicit),
            Object::Name(name) | Object::String(name, _) => Some(Self::Named(name.clone())),
            Object::Dictionary(dict) => Self::from_object(doc, dict.get(b"D").ok()?),
            _ => None,
        }
    }

    /// Destination of an outline item or link annotation: `/Dest`, or the `/D` of a `GoTo` action.
    pub fn of_item(doc: &Document, dict: &Dictionary) -> Option<Self> {
        if let Ok(dest) = dict.get(b"Dest") {
            return Self::from_object(doc, dest);
        }
        let action = as_dict(doc, dict.get(b"A").ok()?).ok()?;
        let kind = entry(doc, action, b"S")?.as_name().ok()?;
        if kind != b"GoTo" {
            return None;
        }
        Self::from_object(doc, action.get(b"D").ok()?)
    }

    /// True when the item points somewhere inside this document.
    pub fn has_page_target(doc: &Document, dict: &Dictionary) -> bool {
        if dict.has(b"Dest") {
            return true;
        }
        as_dict(doc, dict.get(b"A").unwrap_or(&Object::Null))
            .ok()
            .and_then(|action| entry(doc, action, b"S"))
            .and_then(|kind| kind.as_name().ok())
            .is_some_and(|kind| kind == b"GoTo")
    }

    pub fn to_object(&self) -> Object {
        match self {
            Self::Explicit(dest) => dest.to_object(),
            Self::Named(name) => NameKey::encode(name),
        }
    }
}

/// The document's named destination table.
///
/// PDF 1.1 stores it as a dictionary in the catalog's `/Dests`, later versions
/// as a name tree under `/Names /Dests`. Callers only see `explicit_destination`.
pub enum NamedDestinations<'a> {
    Dict(&'a Document, &'a Dictionary),
    Tree(&'a Document, NameTree<'a>),
    Empty,
}

impl<'a> NamedDestinations<'a> {
    pub fn new(doc: &'a Document) -> Result<Self> {
        let catalog = doc.catalog()?;
        let tree = entry(doc, catalog, b"Names")
            .map(|names| as_dict(doc, names))
            .transpose()?
            .and_then(|names| entry(doc, names, b"Dests"));
        if let Some(tree) = tree {
            return Ok(Self::Tree(doc, NameTree::from_object(doc, tree)?));
        }
        match entry(doc, catalog, b"Dests") {
            Some(dests) => Ok(Self::Dict(doc, as_dict(doc, dests)?)),
            None => Ok(Self::Empty),
        }
    }

    pub fn explicit_destination(&self, name: &[u8]) -> Option<ExplicitDestination> {
        let (doc, value) = match self {
            Self::Dict(doc, dict) => (*doc, entry(doc, dict, name)?),
            Self::Tree(doc, tree) => match tree.get(&name.to_vec()) {
                Ok(value) => (*doc, value?),
                Err(e) => {
                    debug!(name = %String::from_utf8_lossy(name), error = %e, "named destination lookup failed");
                    return None;
                }
            },
            Self::Empty => return None,
        };
        match Destination::from_object(doc, value)? {
            Destination::Explicit(dest) => Some(dest),
            // A name pointing at another name is not a valid destination.
            Destination::Named(_) => None,
        }
    }

    /// Every name with its stored value.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Object)>> {
        match self {
            Self::Dict(_, dict) => Ok(dict
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()),
            Self::Tree(_, tree) => Ok(tree
                .raw_entries()?
                .into_iter()
                .map(|(name, value)| (name, value.clone()))
                .collect()),
            Self::Empty => Ok(vec![]),
        }
    }
}

/// Stores `entries` as the `/Names /Dests` name tree, replacing any previous table.
pub fn write_named_destinations(
    doc: &mut Document,
    entries: Vec<(Vec<u8>, Object)>,
    leaf_size: usize,
) -> Result<()> {
    let names_id = match doc.catalog()?.get(b"Names") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    };
    if entries.is_empty() {
        let catalog = catalog_mut(doc)?;
        catalog.remove(b"Dests");
        match names_id {
            Some(id) => {
                doc.get_dictionary_mut(id)?.remove(b"Dests");
            }
            None => {
                if let Ok(Object::Dictionary(names)) = catalog.get_mut(b"Names") {
                    names.remove(b"Dests");
                }
            }
        }
        return Ok(());
    }

    let tree_id = NameTree::write(doc, entries, leaf_size)?;
    let catalog = catalog_mut(doc)?;
    catalog.remove(b"Dests");
    match names_id {
        Some(id) => {
            doc.get_dictionary_mut(id)?.set("Dests", tree_id);
        }
        None => match catalog.get_mut(b"Names") {
            Ok(Object::Dictionary(names)) => {
                names.set("Dests", tree_id);
            }
            Ok(_) => {
                return Err(ComposeError::structural(
                    "catalog /Names is not a dictionary",
                ))
            }
            Err(_) => {
                let mut names = Dictionary::new();
                names.set("Dests", tree_id);
                catalog.set("Names", names);
            }
        },
    }
    Ok(())
}

/// Resolves destinations against one document, with the page index and
/// named destination table built once.
pub struct DestinationResolver<'a> {
    doc: &'a Document,
    pages: PageIndex,
    names: NamedDestinations<'a>,
}

impl<'a> DestinationResolver<'a> {
    pub fn new(doc: &'a Document) -> Result<Self> {
        Ok(Self {
            doc,
            pages: PageIndex::new(doc),
            names: NamedDestinations::new(doc)?,
        })
    }

    pub fn pages(&self) -> &PageIndex {
        &self.pages
    }

    pub fn explicit(&self, dest: &Destination) -> Option<ExplicitDestination> {
        match dest {
            Destination::Explicit(dest) => Some(dest.clone()),
            Destination::Named(name) => self.names.explicit_destination(name),
        }
    }

    /// 1-based page the destination shows, `None` when it no longer resolves.
    pub fn page_number(&self, dest: &Destination) -> Option<u32> {
        self.explicit(dest)?.page_number(&self.pages)
    }

    /// (page, distance from the top of the page) for ordering items in reading order.
    pub fn position(&self, dest: &Destination) -> Option<(u32, f32)> {
        let explicit = self.explicit(dest)?;
        let page = explicit.page_number(&self.pages)?;
        let offset = explicit
            .top(self.doc)
            .map_or(f32::NEG_INFINITY, |top| -top);
        Some((page, offset))
    }
}
