// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Fixtures shared by the unit tests.

use crate::error::{ComposeError, Result};
use crate::links::{Reference, ReferenceIndex, Storage};
use async_trait::async_trait;
use indexmap::IndexMap;
use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, ObjectId, Stream,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

fn page_content(doc: &mut Document, text: &str) -> ObjectId {
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 48.into()]),
            Operation::new("Td", vec![100.into(), 600.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()))
}

fn add_page(doc: &mut Document, parent: ObjectId, resources: ObjectId, text: &str) -> ObjectId {
    let content_id = page_content(doc, text);
    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => parent,
        "Contents" => content_id,
        "Resources" => resources,
    })
}

fn skeleton(doc: &mut Document) -> (ObjectId, ObjectId) {
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });
    (pages_id, resources_id)
}

fn finish(doc: &mut Document, pages_id: ObjectId, kids: Vec<ObjectId>, count: u32) {
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
}

/// A document with `count` pages hanging directly off the page tree root.
/// Page `n` shows the text "Page n".
pub fn document_with_pages(count: u32) -> Document {
    let mut doc = Document::with_version("1.7");
    let (pages_id, resources_id) = skeleton(&mut doc);
    let kids = (1..=count)
        .map(|n| add_page(&mut doc, pages_id, resources_id, &format!("Page {n}")))
        .collect();
    finish(&mut doc, pages_id, kids, count);
    doc
}

/// Like [`document_with_pages`], but the pages are spread over intermediate
/// `Pages` nodes holding `per_node` pages each.
pub fn document_with_nested_pages(count: u32, per_node: u32) -> Document {
    let mut doc = Document::with_version("1.7");
    let (pages_id, resources_id) = skeleton(&mut doc);
    let mut kids = Vec::new();
    let mut page = 1;
    while page <= count {
        let node_id = doc.new_object_id();
        let mut node_kids = Vec::new();
        while page <= count && node_kids.len() < per_node as usize {
            let text = format!("Page {page}");
            node_kids.push(Object::Reference(add_page(&mut doc, node_id, resources_id, &text)));
            page += 1;
        }
        let node_count = node_kids.len() as u32;
        doc.objects.insert(
            node_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Parent" => pages_id,
                "Kids" => node_kids,
                "Count" => node_count,
            }),
        );
        kids.push(node_id);
    }
    finish(&mut doc, pages_id, kids, count);
    doc
}

/// The text drawn on each page, in page order.
pub fn page_texts(doc: &Document) -> Vec<String> {
    doc.get_pages()
        .into_values()
        .map(|id| {
            let content = doc.get_page_content(id).unwrap_or_default();
            Content::decode(&content)
                .map(|content| {
                    content
                        .operations
                        .iter()
                        .filter(|op| op.operator == "Tj")
                        .filter_map(|op| op.operands.first())
                        .filter_map(|text| text.as_str().ok())
                        .map(|text| String::from_utf8_lossy(text).into_owned())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default()
        })
        .collect()
}

pub fn pdf_bytes(mut doc: Document) -> Vec<u8> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// In-memory file system.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    pub files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    /// Writes to these paths fail.
    pub read_only: Vec<PathBuf>,
}

impl MemoryStorage {
    pub fn with_files<I, P, B>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<PathBuf>,
        B: Into<Vec<u8>>,
    {
        Self {
            files: Mutex::new(
                files
                    .into_iter()
                    .map(|(path, bytes)| (path.into(), bytes.into()))
                    .collect(),
            ),
            read_only: vec![],
        }
    }

    pub fn text(&self, path: &str) -> String {
        let files = self.files.lock().unwrap();
        String::from_utf8(files[Path::new(path)].clone()).unwrap()
    }

    pub fn document(&self, path: &str) -> Document {
        let files = self.files.lock().unwrap();
        Document::load_mem(&files[Path::new(path)]).unwrap()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ComposeError::io(path, std::io::ErrorKind::NotFound.into()))
    }

    async fn write_bytes(&self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        if self.read_only.iter().any(|p| p == path) {
            return Err(ComposeError::io(
                path,
                std::io::ErrorKind::PermissionDenied.into(),
            ));
        }
        self.files.lock().unwrap().insert(path.to_path_buf(), bytes);
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ComposeError::io(path, std::io::ErrorKind::NotFound.into()))
    }
}

/// Finds every `](target...)` and `[[target...]]` link in the storage's
/// Markdown files by plain substring search.
pub struct MemoryIndex<'a> {
    pub storage: &'a MemoryStorage,
}

#[async_trait]
impl<'a> ReferenceIndex for MemoryIndex<'a> {
    async fn references_to(&self, target: &Path) -> Result<IndexMap<PathBuf, Vec<Reference>>> {
        let name = target.to_string_lossy().into_owned();
        let files = self.storage.files.lock().unwrap();
        let mut found = IndexMap::new();
        for (path, bytes) in files.iter() {
            if path.extension().map_or(true, |ext| ext != "md") {
                continue;
            }
            let text = String::from_utf8_lossy(bytes);
            let mut references = Vec::new();
            for (open, close, prefix) in [("[[", "]]", "[["), ("](", ")", "](")] {
                let mut from = 0;
                while let Some(at) = text[from..].find(open) {
                    let start = from + at;
                    let Some(len) = text[start..].find(close) else {
                        break;
                    };
                    let end = start + len + close.len();
                    if text[start + prefix.len()..].starts_with(&name) {
                        // Markdown links start at the opening bracket of the text.
                        let span_start = if open == "](" {
                            text[..start].rfind('[').unwrap()
                        } else {
                            start
                        };
                        references.push(Reference {
                            raw_link_text: text[span_start..end].to_string(),
                            span_start,
                            span_end: end,
                        });
                    }
                    from = end;
                }
            }
            references.sort_by_key(|r| r.span_start);
            if !references.is_empty() {
                found.insert(path.clone(), references);
            }
        }
        Ok(found)
    }
}
