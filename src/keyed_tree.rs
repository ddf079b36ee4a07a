// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Name trees and number trees (PDF 32000-1:2008, 7.9.6 and 7.9.7).
//!
//! Both encodings are the same two-level sorted structure and differ only in the
//! key type and the name of the flat key/value array, so they share one
//! implementation parameterized by a [`KeyCodec`].

use crate::error::{ComposeError, Result};
use crate::object::{as_array, as_dict, entry, integer, resolve};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::marker::PhantomData;

const MAX_DEPTH: usize = 32;

/// Key type and key encoding of one tree flavour.
pub trait KeyCodec {
    type Key: Ord + Clone + Debug;

    /// Name of the flat key/value array in leaf nodes.
    const ENTRIES: &'static [u8];

    fn decode(doc: &Document, obj: &Object) -> Option<Self::Key>;

    fn encode(key: &Self::Key) -> Object;
}

/// String keys stored under `Names`.
#[derive(Debug)]
pub struct NameKey;

impl KeyCodec for NameKey {
    type Key = Vec<u8>;
    const ENTRIES: &'static [u8] = b"Names";

    fn decode(doc: &Document, obj: &Object) -> Option<Vec<u8>> {
        match resolve(doc, obj)? {
            Object::String(bytes, _) | Object::Name(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    fn encode(key: &Vec<u8>) -> Object {
        Object::String(key.clone(), StringFormat::Literal)
    }
}

/// Integer keys stored under `Nums`.
#[derive(Debug)]
pub struct NumberKey;

impl KeyCodec for NumberKey {
    type Key = i64;
    const ENTRIES: &'static [u8] = b"Nums";

    fn decode(doc: &Document, obj: &Object) -> Option<i64> {
        integer(doc, obj)
    }

    fn encode(key: &i64) -> Object {
        Object::Integer(*key)
    }
}

pub type NameTree<'a> = KeyedTree<'a, NameKey>;
pub type NumberTree<'a> = KeyedTree<'a, NumberKey>;

/// Read-only view of a tree rooted at `root`.
pub struct KeyedTree<'a, C> {
    doc: &'a Document,
    root: &'a Dictionary,
    codec: PhantomData<C>,
}

impl<'a, C: KeyCodec> KeyedTree<'a, C> {
    pub fn new(doc: &'a Document, root: &'a Dictionary) -> Self {
        Self {
            doc,
            root,
            codec: PhantomData,
        }
    }

    /// Views the tree whose root is `obj`, which may be an indirect reference.
    pub fn from_object(doc: &'a Document, obj: &'a Object) -> Result<Self> {
        Ok(Self::new(doc, as_dict(doc, obj)?))
    }

    /// Looks up `key`, resolving the stored value.
    pub fn get(&self, key: &C::Key) -> Result<Option<&'a Object>> {
        self.find(self.root, key, 0)
    }

    fn find(&self, node: &'a Dictionary, key: &C::Key, depth: usize) -> Result<Option<&'a Object>> {
        if depth > MAX_DEPTH {
            return Err(ComposeError::structural("tree is nested too deeply"));
        }
        if let Some(list) = entry(self.doc, node, C::ENTRIES) {
            return self.search_leaf(as_array(self.doc, list)?, key);
        }
        if !node.has(b"Kids") && depth == 0 {
            return Ok(None);
        }

        let kids = self.kids(node)?;
        let limits: Vec<Option<(C::Key, C::Key)>> =
            kids.iter().map(|kid| self.limits(kid)).collect();

        if let Some(sorted) = Self::sorted_limits(&limits) {
            // Well-formed intermediate node, binary search over the kids.
            let idx = sorted.partition_point(|(_, hi)| hi < key);
            return match sorted.get(idx) {
                Some((lo, _)) if lo <= key => self.find(kids[idx], key, depth + 1),
                _ => Ok(None),
            };
        }

        // Kids are not required to be sorted, scan every candidate.
        for (kid, limit) in kids.iter().zip(&limits) {
            if let Some((lo, hi)) = limit {
                if key < lo || key > hi {
                    continue;
                }
            }
            if let Some(value) = self.find(kid, key, depth + 1)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn search_leaf(&self, list: &'a [Object], key: &C::Key) -> Result<Option<&'a Object>> {
        if list.len() % 2 != 0 {
            return Err(ComposeError::structural(format!(
                "/{} array has an odd number of elements",
                String::from_utf8_lossy(C::ENTRIES)
            )));
        }
        let (mut lo, mut hi) = (0, list.len() / 2);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let mid_key = self.decode_key(&list[2 * mid])?;
            match mid_key.cmp(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(resolve(self.doc, &list[2 * mid + 1])),
            }
        }
        Ok(None)
    }

    /// Visits every leaf breadth-first.
    pub fn iter_leaves<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&'a Dictionary) -> Result<()>,
    {
        let mut queue = VecDeque::from([(self.root, 0)]);
        while let Some((node, depth)) = queue.pop_front() {
            if depth > MAX_DEPTH {
                return Err(ComposeError::structural("tree is nested too deeply"));
            }
            if node.has(C::ENTRIES) {
                visitor(node)?;
            } else if depth > 0 || node.has(b"Kids") {
                for kid in self.kids(node)? {
                    queue.push_back((kid, depth + 1));
                }
            }
        }
        Ok(())
    }

    /// All pairs in ascending key order, with values as stored (not resolved).
    pub(crate) fn raw_entries(&self) -> Result<Vec<(C::Key, &'a Object)>> {
        let mut pairs = Vec::new();
        self.iter_leaves(|leaf| {
            let list = as_array(self.doc, leaf.get(C::ENTRIES)?)?;
            if list.len() % 2 != 0 {
                return Err(ComposeError::structural(format!(
                    "/{} array has an odd number of elements",
                    String::from_utf8_lossy(C::ENTRIES)
                )));
            }
            for pair in list.chunks_exact(2) {
                pairs.push((self.decode_key(&pair[0])?, &pair[1]));
            }
            Ok(())
        })?;
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs.dedup_by(|later, earlier| later.0 == earlier.0);
        Ok(pairs)
    }

    /// All pairs in ascending key order with resolved values; `null` values are skipped.
    pub fn entries(&self) -> Result<Vec<(C::Key, &'a Object)>> {
        Ok(self
            .raw_entries()?
            .into_iter()
            .filter_map(|(key, value)| resolve(self.doc, value).map(|value| (key, value)))
            .collect())
    }

    pub fn keys(&self) -> Result<Vec<C::Key>> {
        Ok(self.entries()?.into_iter().map(|(key, _)| key).collect())
    }

    pub fn values(&self) -> Result<Vec<&'a Object>> {
        Ok(self.entries()?.into_iter().map(|(_, value)| value).collect())
    }

    fn kids(&self, node: &'a Dictionary) -> Result<Vec<&'a Dictionary>> {
        let kids = entry(self.doc, node, b"Kids").ok_or_else(|| {
            ComposeError::structural(format!(
                "tree node has neither /Kids nor /{}",
                String::from_utf8_lossy(C::ENTRIES)
            ))
        })?;
        as_array(self.doc, kids)?
            .iter()
            .map(|kid| as_dict(self.doc, kid))
            .collect()
    }

    fn limits(&self, node: &Dictionary) -> Option<(C::Key, C::Key)> {
        let limits = entry(self.doc, node, b"Limits")?.as_array().ok()?;
        match limits.as_slice() {
            [lo, hi] => Some((C::decode(self.doc, lo)?, C::decode(self.doc, hi)?)),
            _ => None,
        }
    }

    /// Returns the limits when every kid has them and they ascend without overlap.
    fn sorted_limits(limits: &[Option<(C::Key, C::Key)>]) -> Option<Vec<(C::Key, C::Key)>> {
        let limits: Vec<(C::Key, C::Key)> = limits.iter().cloned().collect::<Option<_>>()?;
        let well_formed = limits.iter().all(|(lo, hi)| lo <= hi)
            && limits.windows(2).all(|pair| pair[0].1 < pair[1].0);
        well_formed.then_some(limits)
    }

    fn decode_key(&self, obj: &Object) -> Result<C::Key> {
        C::decode(self.doc, obj).ok_or_else(|| {
            ComposeError::structural(format!("invalid tree key {obj:?}"))
        })
    }

    /// Smallest key below `node`, from its `Limits` when present.
    fn min_key(&self, node: &'a Dictionary, depth: usize) -> Result<Option<C::Key>> {
        if depth > MAX_DEPTH {
            return Err(ComposeError::structural("tree is nested too deeply"));
        }
        if let Some((lo, _)) = self.limits(node) {
            return Ok(Some(lo));
        }
        if let Some(list) = entry(self.doc, node, C::ENTRIES) {
            let mut min: Option<C::Key> = None;
            for key in as_array(self.doc, list)?.iter().step_by(2) {
                let key = self.decode_key(key)?;
                if min.as_ref().map_or(true, |m| &key < m) {
                    min = Some(key);
                }
            }
            return Ok(min);
        }
        let mut min = None;
        for kid in self.kids(node)? {
            if let Some(key) = self.min_key(kid, depth + 1)? {
                if min.as_ref().map_or(true, |m| &key < m) {
                    min = Some(key);
                }
            }
        }
        Ok(min)
    }
}

impl<C: KeyCodec> KeyedTree<'_, C> {
    /// Builds a new tree from `entries` and returns the id of its root.
    pub fn write(
        doc: &mut Document,
        entries: Vec<(C::Key, Object)>,
        max_entries: usize,
    ) -> Result<ObjectId> {
        let root_id = doc.add_object(Dictionary::new());
        Self::fill(doc, root_id, entries, max_entries)?;
        Ok(root_id)
    }

    /// Repacks the tree at `root_id` into leaves of at most `max_entries` pairs.
    ///
    /// A tree that fits in one leaf collapses into the root.
    pub fn limit_leaf_size(doc: &mut Document, root_id: ObjectId, max_entries: usize) -> Result<()> {
        let entries: Vec<(C::Key, Object)> = {
            let root = doc.get_dictionary(root_id)?;
            KeyedTree::<C>::new(doc, root)
                .raw_entries()?
                .into_iter()
                .map(|(key, value)| (key, value.clone()))
                .collect()
        };
        Self::fill(doc, root_id, entries, max_entries)
    }

    fn fill(
        doc: &mut Document,
        root_id: ObjectId,
        mut entries: Vec<(C::Key, Object)>,
        max_entries: usize,
    ) -> Result<()> {
        if max_entries == 0 {
            return Err(ComposeError::InvalidArgument(
                "tree leaves must hold at least one entry".into(),
            ));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|later, earlier| later.0 == earlier.0);

        let mut root = doc.get_dictionary(root_id)?.clone();
        root.remove(b"Kids");
        root.remove(b"Limits");
        root.remove(C::ENTRIES);

        if entries.len() <= max_entries {
            root.set(C::ENTRIES, flatten::<C>(entries));
        } else {
            let mut kids = Vec::new();
            let mut pairs = entries.into_iter().peekable();
            while pairs.peek().is_some() {
                let chunk: Vec<_> = pairs.by_ref().take(max_entries).collect();
                let limits = vec![C::encode(&chunk[0].0), C::encode(&chunk[chunk.len() - 1].0)];
                let mut leaf = Dictionary::new();
                leaf.set("Limits", limits);
                leaf.set(C::ENTRIES, flatten::<C>(chunk));
                kids.push(Object::Reference(doc.add_object(leaf)));
            }
            root.set("Kids", kids);
        }

        doc.objects.insert(root_id, Object::Dictionary(root));
        Ok(())
    }

    /// Reorders the `Kids` of `node_id` by ascending minimum key.
    pub fn sort_children(doc: &mut Document, node_id: ObjectId) -> Result<()> {
        let sorted = {
            let node = doc.get_dictionary(node_id)?;
            let tree = KeyedTree::<C>::new(doc, node);
            let Some(kids) = entry(doc, node, b"Kids") else {
                return Ok(());
            };
            let mut keyed = Vec::new();
            for kid in as_array(doc, kids)? {
                let min = tree.min_key(as_dict(doc, kid)?, 1)?;
                keyed.push((min, kid.clone()));
            }
            // Kids with no keys at all go last.
            keyed.sort_by(|a, b| match (&a.0, &b.0) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
            keyed.into_iter().map(|(_, kid)| kid).collect::<Vec<_>>()
        };
        doc.get_dictionary_mut(node_id)?.set("Kids", sorted);
        Ok(())
    }
}

fn flatten<C: KeyCodec>(entries: Vec<(C::Key, Object)>) -> Vec<Object> {
    entries
        .into_iter()
        .flat_map(|(key, value)| [C::encode(&key), value])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;
    use proptest::prelude::*;

    fn number_entries(keys: impl IntoIterator<Item = i64>) -> Vec<(i64, Object)> {
        keys.into_iter()
            .map(|k| (k, Object::Integer(k * 10)))
            .collect()
    }

    fn leaves(doc: &Document, root_id: ObjectId) -> Vec<usize> {
        let root = doc.get_dictionary(root_id).unwrap();
        let mut sizes = vec![];
        NumberTree::new(doc, root)
            .iter_leaves(|leaf| {
                sizes.push(leaf.get(b"Nums")?.as_array()?.len() / 2);
                Ok(())
            })
            .unwrap();
        sizes
    }

    #[test]
    fn lookup_across_leaves() {
        let mut doc = Document::with_version("1.7");
        let root_id = NumberTree::write(&mut doc, number_entries(0..10), 3).unwrap();
        assert_eq!(leaves(&doc, root_id), vec![3, 3, 3, 1]);

        let root = doc.get_dictionary(root_id).unwrap();
        assert!(!root.has(b"Limits"));
        let tree = NumberTree::new(&doc, root);
        for k in 0..10 {
            assert_eq!(tree.get(&k).unwrap(), Some(&Object::Integer(k * 10)));
        }
        assert_eq!(tree.get(&10).unwrap(), None);
        assert_eq!(tree.get(&-1).unwrap(), None);
    }

    #[test]
    fn single_leaf_collapses_into_root() {
        let mut doc = Document::with_version("1.7");
        let root_id = NumberTree::write(&mut doc, number_entries(0..10), 3).unwrap();
        NumberTree::limit_leaf_size(&mut doc, root_id, 64).unwrap();

        let root = doc.get_dictionary(root_id).unwrap();
        assert!(!root.has(b"Kids"));
        assert!(!root.has(b"Limits"));
        assert_eq!(root.get(b"Nums").unwrap().as_array().unwrap().len(), 20);
    }

    #[test]
    fn leaf_limits_bracket_their_keys() {
        let mut doc = Document::with_version("1.7");
        let root_id = NumberTree::write(&mut doc, number_entries([5, 1, 9, 3, 7]), 2).unwrap();
        let root = doc.get_dictionary(root_id).unwrap();
        let limits: Vec<Vec<Object>> = as_array(&doc, root.get(b"Kids").unwrap())
            .unwrap()
            .iter()
            .map(|kid| {
                as_dict(&doc, kid).unwrap().get(b"Limits").unwrap().as_array().unwrap().clone()
            })
            .collect();
        assert_eq!(
            limits,
            vec![
                vec![Object::Integer(1), Object::Integer(3)],
                vec![Object::Integer(5), Object::Integer(7)],
                vec![Object::Integer(9), Object::Integer(9)],
            ]
        );
    }

    #[test]
    fn name_tree_lookup() {
        let mut doc = Document::with_version("1.7");
        let entries = ["intro", "appendix", "chapter1", "chapter2"]
            .iter()
            .map(|name| (name.as_bytes().to_vec(), Object::string_literal(*name)))
            .collect();
        let root_id = NameTree::write(&mut doc, entries, 2).unwrap();
        let root = doc.get_dictionary(root_id).unwrap();
        let tree = NameTree::new(&doc, root);

        assert_eq!(
            tree.get(&b"chapter2".to_vec()).unwrap(),
            Some(&Object::string_literal("chapter2"))
        );
        assert_eq!(tree.get(&b"chapter3".to_vec()).unwrap(), None);
        assert_eq!(
            tree.keys().unwrap(),
            vec![
                b"appendix".to_vec(),
                b"chapter1".to_vec(),
                b"chapter2".to_vec(),
                b"intro".to_vec()
            ]
        );
    }

    #[test]
    fn unsorted_kids_fall_back_to_linear_scan() {
        let mut doc = Document::with_version("1.7");
        let high = doc.add_object(dictionary! {
            "Limits" => vec![20.into(), 30.into()],
            "Nums" => vec![20.into(), "high".into(), 30.into(), "higher".into()],
        });
        let low = doc.add_object(dictionary! {
            "Limits" => vec![1.into(), 2.into()],
            "Nums" => vec![1.into(), "low".into(), 2.into(), "lower".into()],
        });
        let root_id = doc.add_object(dictionary! {
            "Kids" => vec![high.into(), low.into()],
        });

        {
            let root = doc.get_dictionary(root_id).unwrap();
            let tree = NumberTree::new(&doc, root);
            assert_eq!(tree.get(&2).unwrap(), Some(&Object::from("lower")));
            assert_eq!(tree.get(&30).unwrap(), Some(&Object::from("higher")));
            assert_eq!(tree.keys().unwrap(), vec![1, 2, 20, 30]);
        }

        NumberTree::sort_children(&mut doc, root_id).unwrap();
        let kids = doc.get_dictionary(root_id).unwrap().get(b"Kids").unwrap();
        assert_eq!(kids, &Object::Array(vec![low.into(), high.into()]));
    }

    #[test]
    fn leaf_without_key_list_is_structural() {
        let mut doc = Document::with_version("1.7");
        let broken = doc.add_object(dictionary! {
            "Limits" => vec![1.into(), 2.into()],
        });
        let root_id = doc.add_object(dictionary! { "Kids" => vec![broken.into()] });
        let root = doc.get_dictionary(root_id).unwrap();
        let tree = NumberTree::new(&doc, root);

        assert!(matches!(tree.get(&1), Err(ComposeError::Structural(_))));
        assert!(matches!(tree.keys(), Err(ComposeError::Structural(_))));
    }

    #[test]
    fn zero_leaf_size_is_rejected() {
        let mut doc = Document::with_version("1.7");
        assert!(matches!(
            NumberTree::write(&mut doc, number_entries(0..3), 0),
            Err(ComposeError::InvalidArgument(_))
        ));
    }

    proptest! {
        #[test]
        fn repacking_preserves_entries(
            keys in proptest::collection::btree_set(any::<i32>(), 0..200),
            max in 1usize..16,
        ) {
            let mut doc = Document::with_version("1.7");
            let expected = number_entries(keys.iter().map(|&k| i64::from(k)));
            let root_id = NumberTree::write(&mut doc, expected.iter().rev().cloned().collect(), 1000).unwrap();
            NumberTree::limit_leaf_size(&mut doc, root_id, max).unwrap();

            for size in leaves(&doc, root_id) {
                prop_assert!(size <= max);
            }
            let root = doc.get_dictionary(root_id).unwrap();
            let actual: Vec<(i64, Object)> = NumberTree::new(&doc, root)
                .entries()
                .unwrap()
                .into_iter()
                .map(|(k, v)| (k, v.clone()))
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
