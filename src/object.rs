// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Typed accessors over the `lopdf` object graph.
//!
//! The tree code never matches on raw `Object` variants for indirection; it goes
//! through these helpers so a dangling reference reads as `null`, the way the
//! PDF specification defines it.

use crate::error::{ComposeError, Result};
use lopdf::{decode_text_string, Dictionary, Document, Object, ObjectId};

// Deep enough for any sane producer, shallow enough to stop reference cycles.
const MAX_INDIRECTION: usize = 32;

/// Follows indirect references. `None` for `null` and for references to missing objects.
pub fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> Option<&'a Object> {
    for _ in 0..MAX_INDIRECTION {
        match obj {
            Object::Reference(id) => obj = doc.get_object(*id).ok()?,
            Object::Null => return None,
            _ => return Some(obj),
        }
    }
    None
}

/// Looks up `key` in `dict` and resolves it.
pub fn entry<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|obj| resolve(doc, obj))
}

pub fn as_dict<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Dictionary> {
    match resolve(doc, obj) {
        Some(Object::Dictionary(dict)) => Ok(dict),
        Some(Object::Stream(stream)) => Ok(&stream.dict),
        Some(other) => Err(ComposeError::structural(format!(
            "expected a dictionary, found {}",
            kind(other)
        ))),
        None => Err(ComposeError::structural("expected a dictionary, found null")),
    }
}

pub fn as_array<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Vec<Object>> {
    match resolve(doc, obj) {
        Some(Object::Array(array)) => Ok(array),
        Some(other) => Err(ComposeError::structural(format!(
            "expected an array, found {}",
            kind(other)
        ))),
        None => Err(ComposeError::structural("expected an array, found null")),
    }
}

/// Reads an indirect link such as `Parent` or `Next`.
///
/// Missing or `null` entries are `None`; any other direct object is a structural error.
pub fn reference(dict: &Dictionary, key: &[u8]) -> Result<Option<ObjectId>> {
    match dict.get(key) {
        Err(_) | Ok(Object::Null) => Ok(None),
        Ok(Object::Reference(id)) => Ok(Some(*id)),
        Ok(other) => Err(ComposeError::structural(format!(
            "/{} must be an indirect reference, found {}",
            String::from_utf8_lossy(key),
            kind(other)
        ))),
    }
}

pub fn integer(doc: &Document, obj: &Object) -> Option<i64> {
    match resolve(doc, obj)? {
        Object::Integer(i) => Some(*i),
        // Some producers write integral reals for counts and page indices.
        Object::Real(r) if r.fract() == 0.0 => Some(*r as i64),
        _ => None,
    }
}

pub fn number(doc: &Document, obj: &Object) -> Option<f32> {
    resolve(doc, obj)?.as_float().ok()
}

fn kind(obj: &Object) -> &'static str {
    match obj {
        Object::Null => "null",
        Object::Boolean(_) => "a boolean",
        Object::Integer(_) => "an integer",
        Object::Real(_) => "a real",
        Object::Name(_) => "a name",
        Object::String(..) => "a string",
        Object::Array(_) => "an array",
        Object::Dictionary(_) => "a dictionary",
        Object::Stream(_) => "a stream",
        Object::Reference(_) => "a reference",
    }
}

/// Reads a text string entry, resolving indirection.
pub fn text(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    let obj = entry(doc, dict, key)?;
    let text = decode_text_string(obj).ok()?;
    // lopdf keeps the UTF-8 byte order mark.
    Some(text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text))
}

pub fn catalog_id(doc: &Document) -> Result<ObjectId> {
    reference(&doc.trailer, b"Root")?
        .ok_or_else(|| ComposeError::structural("trailer has no /Root"))
}

pub fn catalog_mut(doc: &mut Document) -> Result<&mut Dictionary> {
    let id = catalog_id(doc)?;
    Ok(doc.get_dictionary_mut(id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, text_string, StringFormat};

    #[test]
    fn resolve_follows_reference_chains() {
        let mut doc = Document::with_version("1.7");
        let inner = doc.add_object(Object::Integer(7));
        let outer = doc.add_object(Object::Reference(inner));
        assert_eq!(
            resolve(&doc, &Object::Reference(outer)),
            Some(&Object::Integer(7))
        );
    }

    #[test]
    fn dangling_reference_reads_as_null() {
        let doc = Document::with_version("1.7");
        assert_eq!(resolve(&doc, &Object::Reference((42, 0))), None);
    }

    #[test]
    fn reference_rejects_direct_objects() {
        let dict = dictionary! { "Parent" => 3 };
        assert!(matches!(
            reference(&dict, b"Parent"),
            Err(ComposeError::Structural(_))
        ));
        assert_eq!(reference(&dict, b"Next").unwrap(), None);
    }

    #[test]
    fn text_strings_use_pdf_doc_encoding() {
        let dict = dictionary! {
            // 0x84 is an em dash in PDFDocEncoding.
            "Plain" => Object::String(b"A\x84".to_vec(), StringFormat::Literal),
            "Wide" => text_string("第一章"),
            "Utf8" => Object::String(b"\xEF\xBB\xBFKapitel \xC3\x9C".to_vec(), StringFormat::Literal),
        };
        let doc = Document::with_version("1.7");
        assert_eq!(text(&doc, &dict, b"Plain").as_deref(), Some("A\u{2014}"));
        assert_eq!(text(&doc, &dict, b"Wide").as_deref(), Some("第一章"));
        assert_eq!(text(&doc, &dict, b"Utf8").as_deref(), Some("Kapitel Ü"));
        assert_eq!(text(&doc, &dict, b"Missing"), None);
    }

    #[test]
    fn structural_errors_name_the_object_kind() {
        let doc = Document::with_version("1.7");
        let err = as_dict(&doc, &Object::Integer(3)).unwrap_err();
        assert_eq!(err.to_string(), "Malformed PDF structure: expected a dictionary, found an integer");
    }
}
