// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Page labels (PDF 32000-1:2008, 12.4.2).
//!
//! Ranges are kept 1-based in memory. The number tree in the file is keyed by
//! 0-based page index, the conversion happens only when reading and writing.

use crate::error::Result;
use crate::keyed_tree::NumberTree;
use crate::object::{as_dict, catalog_mut, entry, integer, text};
use lopdf::{text_string, Dictionary, Document, Object};
use serde::Serialize;
use tracing::debug;

/// Default cap on the number of ranges stored in one number tree leaf.
pub const DEFAULT_LEAF_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumberingStyle {
    Decimal,
    UpperRoman,
    LowerRoman,
    UpperAlpha,
    LowerAlpha,
}

impl NumberingStyle {
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"D" => Some(Self::Decimal),
            b"R" => Some(Self::UpperRoman),
            b"r" => Some(Self::LowerRoman),
            b"A" => Some(Self::UpperAlpha),
            b"a" => Some(Self::LowerAlpha),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Decimal => "D",
            Self::UpperRoman => "R",
            Self::LowerRoman => "r",
            Self::UpperAlpha => "A",
            Self::LowerAlpha => "a",
        }
    }

    pub fn format(self, n: u32) -> String {
        match self {
            Self::Decimal => n.to_string(),
            Self::UpperRoman => roman(n),
            Self::LowerRoman => roman(n).to_lowercase(),
            Self::UpperAlpha => alpha(n),
            Self::LowerAlpha => alpha(n).to_lowercase(),
        }
    }
}

fn roman(mut n: u32) -> String {
    const NUMERALS: [(u32, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (value, numeral) in NUMERALS {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}

// A..Z, then AA..ZZ, then AAA..ZZZ and so on.
fn alpha(n: u32) -> String {
    if n == 0 {
        return String::new();
    }
    let letter = char::from(b'A' + ((n - 1) % 26) as u8);
    std::iter::repeat(letter)
        .take(((n - 1) / 26 + 1) as usize)
        .collect()
}

/// One labelling range, starting at `page_from` and running to the next range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLabelRange {
    /// 1-based page where the range starts.
    pub page_from: u32,
    pub style: Option<NumberingStyle>,
    pub prefix: Option<String>,
    /// Numeral of the first page in the range, 1 when unset.
    pub start: Option<u32>,
}

impl PageLabelRange {
    pub fn new(page_from: u32) -> Self {
        Self {
            page_from,
            style: None,
            prefix: None,
            start: None,
        }
    }

    fn first_numeral(&self) -> u32 {
        self.start.unwrap_or(1)
    }

    fn numeral_at(&self, page: u32) -> u32 {
        self.first_numeral() + (page - self.page_from)
    }

    fn format(&self, numeral: u32) -> String {
        let mut label = self.prefix.clone().unwrap_or_default();
        if let Some(style) = self.style {
            label.push_str(&style.format(numeral));
        }
        label
    }

    fn from_dict(doc: &Document, page_from: u32, dict: &Dictionary) -> Self {
        Self {
            page_from,
            style: entry(doc, dict, b"S")
                .and_then(|s| s.as_name().ok())
                .and_then(NumberingStyle::from_name),
            prefix: text(doc, dict, b"P"),
            start: entry(doc, dict, b"St")
                .and_then(|st| integer(doc, st))
                .and_then(|st| u32::try_from(st).ok())
                .filter(|&st| st >= 1),
        }
    }

    fn to_dict(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        if let Some(style) = self.style {
            dict.set("S", Object::Name(style.name().as_bytes().to_vec()));
        }
        if let Some(prefix) = &self.prefix {
            dict.set("P", text_string(prefix));
        }
        if let Some(start) = self.start {
            dict.set("St", i64::from(start));
        }
        dict
    }
}

/// Overrides applied to a newly divided range.
///
/// `None` keeps the inherited value, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPatch {
    pub style: Option<Option<NumberingStyle>>,
    pub prefix: Option<Option<String>>,
    pub start: Option<Option<u32>>,
}

impl LabelPatch {
    /// Clears style and prefix, leaving a bare numeral-less label.
    pub fn plain() -> Self {
        Self {
            style: Some(None),
            prefix: Some(None),
            start: None,
        }
    }

    fn apply(&self, range: &mut PageLabelRange) {
        if let Some(style) = self.style {
            range.style = style;
        }
        if let Some(prefix) = &self.prefix {
            range.prefix.clone_from(prefix);
        }
        if let Some(start) = self.start {
            range.start = start;
        }
    }
}

/// The page label ranges of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLabelRegistry {
    ranges: Vec<PageLabelRange>,
    page_count: u32,
    leaf_size: usize,
}

impl PageLabelRegistry {
    pub fn new(ranges: Vec<PageLabelRange>, page_count: u32) -> Self {
        Self {
            ranges,
            page_count,
            leaf_size: DEFAULT_LEAF_SIZE,
        }
    }

    pub fn with_leaf_size(mut self, leaf_size: usize) -> Self {
        self.leaf_size = leaf_size;
        self
    }

    /// Reads `/PageLabels` from the catalog. `None` when the document has no labels.
    pub fn from_document(doc: &Document) -> Result<Option<Self>> {
        let catalog = doc.catalog()?;
        let Some(root) = entry(doc, catalog, b"PageLabels") else {
            return Ok(None);
        };
        let tree = NumberTree::new(doc, as_dict(doc, root)?);

        let mut ranges = Vec::new();
        for (index, value) in tree.entries()? {
            let Ok(index) = u32::try_from(index) else {
                debug!(index, "skipping page label with a negative page index");
                continue;
            };
            ranges.push(PageLabelRange::from_dict(doc, index + 1, as_dict(doc, value)?));
        }
        Ok(Some(Self::new(ranges, doc.get_pages().len() as u32)))
    }

    /// Normalizes and stores the ranges as `/PageLabels`, or removes the entry when empty.
    pub fn write_to_document(&mut self, doc: &mut Document) -> Result<()> {
        self.normalize();
        if self.ranges.is_empty() {
            catalog_mut(doc)?.remove(b"PageLabels");
            return Ok(());
        }
        let entries = self
            .ranges
            .iter()
            .map(|range| {
                (
                    i64::from(range.page_from) - 1,
                    Object::Dictionary(range.to_dict()),
                )
            })
            .collect();
        let root_id = NumberTree::write(doc, entries, self.leaf_size)?;
        catalog_mut(doc)?.set("PageLabels", root_id);
        Ok(())
    }

    pub fn ranges(&self) -> &[PageLabelRange] {
        &self.ranges
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn set_page_count(&mut self, page_count: u32) {
        self.page_count = page_count;
    }

    /// Index of the range containing `page`.
    pub fn range_index_at_page(&self, page: u32) -> Option<usize> {
        self.ranges
            .iter()
            .rposition(|range| range.page_from <= page)
    }

    pub fn start_of_range(&self, index: usize) -> u32 {
        self.ranges[index].page_from
    }

    /// Last page of the range: the page before the next range, or the last page of the document.
    pub fn end_of_range(&self, index: usize) -> u32 {
        match self.ranges.get(index + 1) {
            Some(next) => next.page_from.saturating_sub(1),
            None => self.page_count,
        }
    }

    pub fn remove_range(&mut self, index: usize) -> PageLabelRange {
        self.ranges.remove(index)
    }

    /// The label a viewer displays for `page`, if any range covers it.
    pub fn label_at(&self, page: u32) -> Option<String> {
        let range = &self.ranges[self.range_index_at_page(page)?];
        Some(range.format(range.numeral_at(page)))
    }

    /// Labels of every page, in page order.
    pub fn labels(&self) -> Vec<String> {
        (1..=self.page_count)
            .map(|page| self.label_at(page).unwrap_or_else(|| page.to_string()))
            .collect()
    }

    /// Splits the range containing `page` so that a new range starts at `page`.
    ///
    /// With `keep_labels` the new range continues the numbering, otherwise it
    /// restarts at 1. Does nothing when `page` already starts a range.
    pub fn divide_range_at_page(&mut self, page: u32, keep_labels: bool, patch: Option<&LabelPatch>) {
        let Some(index) = self.range_index_at_page(page) else {
            return;
        };
        let range = &self.ranges[index];
        if range.page_from == page {
            return;
        }
        let mut divided = PageLabelRange {
            page_from: page,
            style: range.style,
            prefix: range.prefix.clone(),
            start: keep_labels.then(|| range.numeral_at(page)),
        };
        if let Some(patch) = patch {
            patch.apply(&mut divided);
        }
        self.ranges.insert(index + 1, divided);
    }

    /// Moves every range starting at or after `page` by `delta` pages.
    pub fn shift_ranges_after_page(&mut self, page: u32, delta: i64) {
        for range in self.ranges.iter_mut().filter(|r| r.page_from >= page) {
            range.page_from = (i64::from(range.page_from) + delta).max(1) as u32;
        }
    }

    /// Restores the invariants: sorted, no empty range, first range at page 1,
    /// no range that merely continues its predecessor.
    pub fn normalize(&mut self) {
        self.ranges.sort_by_key(|range| range.page_from);

        let mut kept: Vec<PageLabelRange> = Vec::with_capacity(self.ranges.len());
        let mut ranges = std::mem::take(&mut self.ranges).into_iter().peekable();
        while let Some(range) = ranges.next() {
            let next_start = ranges
                .peek()
                .map_or(self.page_count + 1, |next| next.page_from);
            if next_start > range.page_from && range.page_from <= self.page_count {
                kept.push(range);
            }
        }

        if let Some(first) = kept.first_mut() {
            first.page_from = 1;
        }

        let mut merged: Vec<PageLabelRange> = Vec::with_capacity(kept.len());
        for range in kept {
            match merged.last() {
                Some(prev) if is_continuation(prev, &range) => {}
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }

    /// Updates the ranges for a page inserted at `page`.
    ///
    /// With `keep_labels` every existing page keeps its label and the inserted
    /// page takes over the label of the page it displaces; `patch` then adjusts
    /// the inserted page's own range. Without it the ranges simply move down.
    pub fn insert_page(&mut self, page: u32, keep_labels: bool, patch: Option<&LabelPatch>) {
        if !keep_labels {
            self.shift_ranges_after_page(page, 1);
            self.page_count += 1;
            self.normalize();
            return;
        }

        self.divide_range_at_page(page, true, None);
        self.shift_ranges_after_page(page + 1, 1);
        self.page_count += 1;

        if let Some(index) = self.range_index_at_page(page) {
            let range = &self.ranges[index];
            let displaced = PageLabelRange {
                page_from: page + 1,
                style: range.style,
                prefix: range.prefix.clone(),
                start: Some(range.numeral_at(page)),
            };
            self.ranges.insert(index + 1, displaced);
            // `page` starts a range after the divide above.
            if let Some(patch) = patch {
                patch.apply(&mut self.ranges[index]);
            }
        }
        self.normalize();
    }

    /// Updates the ranges for the removal of `page`.
    ///
    /// With `keep_labels` the pages after `page` keep their labels.
    pub fn remove_page(&mut self, page: u32, keep_labels: bool) {
        if keep_labels {
            self.divide_range_at_page(page + 1, true, None);
        }
        self.shift_ranges_after_page(page + 1, -1);
        self.page_count = self.page_count.saturating_sub(1);
        self.normalize();
    }

    /// Appends the ranges of a document whose `page_count` pages are added after ours.
    ///
    /// The appended pages keep their own labels. Pages without labels are shown
    /// with plain decimal numbers, which is what `other: None` produces.
    pub fn append(&mut self, other: Option<&PageLabelRegistry>, page_count: u32) {
        let offset = self.page_count;
        match other {
            Some(other) => self.ranges.extend(other.ranges.iter().map(|range| PageLabelRange {
                page_from: range.page_from + offset,
                ..range.clone()
            })),
            None => self.ranges.push(PageLabelRange {
                page_from: offset + 1,
                style: Some(NumberingStyle::Decimal),
                prefix: None,
                start: None,
            }),
        }
        self.page_count += page_count;
        self.normalize();
    }

    /// Labels for a document made of `pages` (1-based, ascending) taken from this one.
    ///
    /// Each page keeps the label it has here.
    pub fn extract(&self, pages: &[u32]) -> Self {
        let ranges = pages
            .iter()
            .enumerate()
            .filter_map(|(rank, &page)| {
                let range = &self.ranges[self.range_index_at_page(page)?];
                Some(PageLabelRange {
                    page_from: rank as u32 + 1,
                    style: range.style,
                    prefix: range.prefix.clone(),
                    start: Some(range.numeral_at(page)),
                })
            })
            .collect();
        let mut extracted = Self::new(ranges, pages.len() as u32).with_leaf_size(self.leaf_size);
        extracted.normalize();
        extracted
    }

    /// Labels for a document where pages without labels display their page number.
    pub fn decimal(page_count: u32) -> Self {
        Self::new(
            vec![PageLabelRange {
                style: Some(NumberingStyle::Decimal),
                ..PageLabelRange::new(1)
            }],
            page_count,
        )
    }
}

// `next` adds nothing when it keeps the style and prefix and its first numeral
// is the one `prev` would have shown anyway.
fn is_continuation(prev: &PageLabelRange, next: &PageLabelRange) -> bool {
    prev.style == next.style
        && prev.prefix == next.prefix
        && next.first_numeral() == prev.first_numeral() + (next.page_from - prev.page_from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn range(
        page_from: u32,
        style: Option<NumberingStyle>,
        prefix: Option<&str>,
        start: Option<u32>,
    ) -> PageLabelRange {
        PageLabelRange {
            page_from,
            style,
            prefix: prefix.map(str::to_string),
            start,
        }
    }

    fn chapters() -> PageLabelRegistry {
        PageLabelRegistry::new(
            vec![
                range(1, None, None, None),
                range(5, Some(NumberingStyle::Decimal), Some("Ch."), Some(1)),
            ],
            10,
        )
    }

    #[test]
    fn numbering_styles() {
        assert_eq!(NumberingStyle::UpperRoman.format(1994), "MCMXCIV");
        assert_eq!(NumberingStyle::LowerRoman.format(4), "iv");
        assert_eq!(NumberingStyle::UpperAlpha.format(1), "A");
        assert_eq!(NumberingStyle::UpperAlpha.format(26), "Z");
        assert_eq!(NumberingStyle::LowerAlpha.format(28), "bb");
        assert_eq!(NumberingStyle::Decimal.format(12), "12");
    }

    #[test]
    fn labels_follow_ranges() {
        let labels = PageLabelRegistry::new(
            vec![
                range(1, Some(NumberingStyle::LowerRoman), None, None),
                range(3, Some(NumberingStyle::Decimal), None, None),
                range(5, Some(NumberingStyle::UpperAlpha), Some("App-"), None),
            ],
            6,
        );
        insta::assert_debug_snapshot!(labels.labels(), @r###"
        [
            "i",
            "ii",
            "1",
            "2",
            "App-A",
            "App-B",
        ]
        "###);
    }

    #[test]
    fn divide_keeps_displayed_numeral() {
        let mut labels = chapters();
        labels.divide_range_at_page(7, true, None);
        assert_eq!(
            labels.ranges()[2],
            range(7, Some(NumberingStyle::Decimal), Some("Ch."), Some(3))
        );
        assert_eq!(labels.label_at(7).as_deref(), Some("Ch.3"));

        let mut restarted = chapters();
        restarted.divide_range_at_page(7, false, Some(&LabelPatch::plain()));
        assert_eq!(restarted.ranges()[2], range(7, None, None, None));
    }

    #[test]
    fn divide_at_range_start_is_noop() {
        let mut labels = chapters();
        labels.divide_range_at_page(5, true, None);
        assert_eq!(labels, chapters());
    }

    #[test]
    fn range_bounds() {
        let labels = chapters();
        assert_eq!(labels.range_index_at_page(4), Some(0));
        assert_eq!(labels.range_index_at_page(5), Some(1));
        assert_eq!(labels.start_of_range(1), 5);
        assert_eq!(labels.end_of_range(0), 4);
        assert_eq!(labels.end_of_range(1), 10);
    }

    #[test]
    fn insert_before_range_start_repeats_the_boundary_label() {
        let mut labels = chapters();
        labels.insert_page(5, true, None);

        assert_eq!(labels.page_count(), 11);
        assert_eq!(labels.label_at(5).as_deref(), Some("Ch.1"));
        assert_eq!(labels.label_at(6).as_deref(), Some("Ch.1"));
        assert_eq!(labels.label_at(7).as_deref(), Some("Ch.2"));
        assert_eq!(labels.label_at(4).as_deref(), Some(""));

        labels.remove_page(5, true);
        assert_eq!(labels, chapters());
    }

    #[test]
    fn insert_inside_range_keeps_following_labels() {
        let mut labels = PageLabelRegistry::decimal(5);
        labels.insert_page(3, true, None);
        assert_eq!(labels.labels(), vec!["1", "2", "3", "3", "4", "5"]);

        labels.remove_page(3, true);
        assert_eq!(labels, PageLabelRegistry::decimal(5));
    }

    #[test]
    fn insert_with_plain_patch() {
        let mut labels = chapters();
        labels.insert_page(7, true, Some(&LabelPatch::plain()));
        assert_eq!(labels.label_at(7).as_deref(), Some(""));
        assert_eq!(labels.label_at(8).as_deref(), Some("Ch.3"));
        assert_eq!(labels.label_at(6).as_deref(), Some("Ch.2"));
    }

    #[test]
    fn discarding_labels_shifts_numbering() {
        let mut labels = chapters();
        labels.insert_page(5, false, None);
        assert_eq!(labels.label_at(5).as_deref(), Some(""));
        assert_eq!(labels.label_at(6).as_deref(), Some("Ch.1"));

        let mut labels = PageLabelRegistry::decimal(5);
        labels.remove_page(2, false);
        assert_eq!(labels.labels(), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn remove_keeps_following_labels() {
        let mut labels = PageLabelRegistry::decimal(5);
        labels.remove_page(2, true);
        assert_eq!(labels.labels(), vec!["1", "3", "4", "5"]);
    }

    #[test]
    fn removing_a_whole_range() {
        let mut labels = PageLabelRegistry::new(
            vec![
                range(1, Some(NumberingStyle::LowerRoman), None, None),
                range(2, Some(NumberingStyle::Decimal), None, None),
            ],
            3,
        );
        labels.remove_page(1, true);
        assert_eq!(
            labels.ranges(),
            &[range(1, Some(NumberingStyle::Decimal), None, None)]
        );
    }

    #[test]
    fn normalize_merges_continuations_and_anchors_first_range() {
        let mut labels = PageLabelRegistry::new(
            vec![
                range(4, Some(NumberingStyle::Decimal), None, Some(4)),
                range(2, Some(NumberingStyle::Decimal), None, None),
                range(9, Some(NumberingStyle::Decimal), None, None),
            ],
            8,
        );
        labels.normalize();
        assert_eq!(
            labels.ranges(),
            &[range(1, Some(NumberingStyle::Decimal), None, None)]
        );
    }

    #[test]
    fn append_keeps_both_label_sets() {
        let mut labels = chapters();
        let other = PageLabelRegistry::new(
            vec![range(1, Some(NumberingStyle::LowerRoman), None, None)],
            2,
        );
        labels.append(Some(&other), 2);
        assert_eq!(labels.label_at(11).as_deref(), Some("i"));
        assert_eq!(labels.label_at(12).as_deref(), Some("ii"));

        let mut labels = chapters();
        labels.append(None, 3);
        assert_eq!(labels.label_at(13).as_deref(), Some("3"));
    }

    #[test]
    fn extract_keeps_labels() {
        let labels = chapters().extract(&[2, 6, 7]);
        assert_eq!(labels.labels(), vec!["", "Ch.2", "Ch.3"]);
        assert_eq!(labels.ranges().len(), 2);
    }

    #[test]
    fn document_round_trip() {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut kids = vec![];
        for _ in 0..10 {
            kids.push(Object::Reference(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
            })));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => 10 }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);

        assert_eq!(PageLabelRegistry::from_document(&doc).unwrap(), None);

        let mut labels = chapters().with_leaf_size(1);
        labels.write_to_document(&mut doc).unwrap();

        let read = PageLabelRegistry::from_document(&doc).unwrap().unwrap();
        assert_eq!(read.ranges(), chapters().ranges());
        assert_eq!(read.page_count(), 10);
    }

    #[test]
    fn pdf_doc_encoded_prefix_survives_a_rewrite() {
        let mut doc = crate::test_util::document_with_pages(3);
        let labels = dictionary! {
            "Nums" => vec![
                Object::Integer(0),
                Object::Dictionary(dictionary! {
                    "S" => "D",
                    // "A" followed by an em dash in PDFDocEncoding.
                    "P" => Object::String(b"A\x84".to_vec(), lopdf::StringFormat::Literal),
                }),
            ],
        };
        crate::object::catalog_mut(&mut doc).unwrap().set("PageLabels", labels);

        let mut read = PageLabelRegistry::from_document(&doc).unwrap().unwrap();
        assert_eq!(read.label_at(2).as_deref(), Some("A\u{2014}2"));

        read.write_to_document(&mut doc).unwrap();
        let reread = PageLabelRegistry::from_document(&doc).unwrap().unwrap();
        assert_eq!(reread.labels(), vec!["A\u{2014}1", "A\u{2014}2", "A\u{2014}3"]);
    }
}
