// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Parsing and re-serialization of the links notes use to point into a PDF:
//! `[[file.pdf#page=3|alias]]` and `[text](file.pdf#page=3)`, optionally
//! embedded with a leading `!`.
//!
//! Everything except the parts being rewritten is reproduced byte for byte.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;
use std::path::Path;

// Characters that would end or confuse an unbracketed Markdown link target.
const MARKDOWN_TARGET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b']')
    .add(b'`');

/// The part after `#`: `page=3&selection=1,2,3,4`, or a heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subpath {
    params: Vec<String>,
}

impl Subpath {
    pub fn parse(s: &str) -> Self {
        Self {
            params: s.split('&').map(str::to_string).collect(),
        }
    }

    pub fn page(&self) -> Option<u32> {
        self.params
            .iter()
            .find_map(|param| param.strip_prefix("page="))
            .and_then(|page| page.trim().parse().ok())
    }

    /// Sets `page`, keeping every other parameter in place.
    pub fn set_page(&mut self, page: u32) {
        let value = format!("page={page}");
        if let Some(param) = self.params.iter_mut().find(|p| p.starts_with("page=")) {
            *param = value;
        } else if self.params.iter().all(|p| p.is_empty()) {
            self.params = vec![value];
        } else {
            self.params.insert(0, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find_map(|param| param.strip_prefix(key)?.strip_prefix('='))
    }
}

impl fmt::Display for Subpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.params.join("&"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// `[[target#subpath|alias]]`
    Wiki,
    /// `[text](target#subpath)`
    Markdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkText {
    pub kind: LinkKind,
    pub embed: bool,
    /// The link target as written, without the subpath.
    pub target: String,
    pub subpath: Option<Subpath>,
    /// Wiki alias or Markdown link text.
    pub display: Option<String>,
    // Markdown only: `<target>` form, and anything after the target (a title).
    angle: bool,
    tail: String,
}

impl LinkText {
    pub fn parse(raw: &str) -> Option<Self> {
        let (embed, rest) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        if let Some(inner) = rest.strip_prefix("[[").and_then(|r| r.strip_suffix("]]")) {
            return Some(Self::parse_wiki(embed, inner));
        }
        Self::parse_markdown(embed, rest)
    }

    fn parse_wiki(embed: bool, inner: &str) -> Self {
        let (link, display) = match inner.split_once('|') {
            Some((link, alias)) => (link, Some(alias.to_string())),
            None => (inner, None),
        };
        let (target, subpath) = split_subpath(link);
        Self {
            kind: LinkKind::Wiki,
            embed,
            target,
            subpath,
            display,
            angle: false,
            tail: String::new(),
        }
    }

    fn parse_markdown(embed: bool, rest: &str) -> Option<Self> {
        let body = rest.strip_prefix('[')?.strip_suffix(')')?;
        let (text, destination) = body.split_once("](")?;

        let (link, angle, tail) = match destination.strip_prefix('<') {
            Some(quoted) => {
                let (link, tail) = quoted.split_once('>')?;
                (link, true, tail)
            }
            None => match destination.find(char::is_whitespace) {
                Some(at) => (&destination[..at], false, &destination[at..]),
                None => (destination, false, ""),
            },
        };
        let (target, subpath) = split_subpath(link);
        Some(Self {
            kind: LinkKind::Markdown,
            embed,
            target,
            subpath,
            display: Some(text.to_string()),
            angle,
            tail: tail.to_string(),
        })
    }

    /// The target as a path: Markdown targets are percent-decoded.
    pub fn path(&self) -> String {
        match self.kind {
            LinkKind::Wiki => self.target.clone(),
            LinkKind::Markdown if self.angle => self.target.clone(),
            LinkKind::Markdown => percent_decode_str(&self.target)
                .decode_utf8_lossy()
                .into_owned(),
        }
    }

    pub fn page(&self) -> Option<u32> {
        self.subpath.as_ref()?.page()
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.subpath
            .get_or_insert_with(|| Subpath::parse(""))
            .set_page(page);
        self
    }

    /// Points the link at `path`, written the way this kind of link spells paths.
    pub fn with_path(mut self, path: &str) -> Self {
        self.target = match self.kind {
            LinkKind::Markdown if !self.angle => utf8_percent_encode(path, MARKDOWN_TARGET).to_string(),
            _ => path.to_string(),
        };
        self
    }

    /// Rewrites the target for a file that moved from `old` to `new`.
    ///
    /// Inside the same folder only the file name changes, so relative and
    /// bare-name links keep their shape. Otherwise the link gets `new_path`,
    /// the spelling of `new` as seen from the linking note.
    pub fn retarget(self, old: &Path, new: &Path, new_path: &str) -> Self {
        if old == new {
            return self;
        }
        if old.parent() != new.parent() {
            return self.with_path(new_path);
        }
        let Some(new_name) = new.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return self;
        };
        let retargeted = match self.path().rsplit_once('/') {
            Some((dir, _)) => format!("{dir}/{new_name}"),
            None => new_name,
        };
        self.with_path(&retargeted)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.embed {
            out.push('!');
        }
        let subpath = self
            .subpath
            .as_ref()
            .map(|s| format!("#{s}"))
            .unwrap_or_default();
        match self.kind {
            LinkKind::Wiki => {
                out.push_str("[[");
                out.push_str(&self.target);
                out.push_str(&subpath);
                if let Some(alias) = &self.display {
                    out.push('|');
                    out.push_str(alias);
                }
                out.push_str("]]");
            }
            LinkKind::Markdown => {
                out.push('[');
                out.push_str(self.display.as_deref().unwrap_or_default());
                out.push_str("](");
                if self.angle {
                    out.push('<');
                }
                out.push_str(&self.target);
                out.push_str(&subpath);
                if self.angle {
                    out.push('>');
                }
                out.push_str(&self.tail);
                out.push(')');
            }
        }
        out
    }
}

fn split_subpath(link: &str) -> (String, Option<Subpath>) {
    match link.split_once('#') {
        Some((target, subpath)) => (target.to_string(), Some(Subpath::parse(subpath))),
        None => (link.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wiki_links() {
        let link = LinkText::parse("[[paper.pdf#page=3&selection=4,0,9,2|see here]]").unwrap();
        assert_eq!(link.kind, LinkKind::Wiki);
        assert!(!link.embed);
        assert_eq!(link.target, "paper.pdf");
        assert_eq!(link.page(), Some(3));
        assert_eq!(link.subpath.as_ref().unwrap().get("selection"), Some("4,0,9,2"));
        assert_eq!(link.display.as_deref(), Some("see here"));

        let embed = LinkText::parse("![[paper.pdf#page=1]]").unwrap();
        assert!(embed.embed);
        assert_eq!(embed.render(), "![[paper.pdf#page=1]]");
    }

    #[test]
    fn markdown_links() {
        let link = LinkText::parse("[notes](My%20Paper.pdf#page=12 \"title\")").unwrap();
        assert_eq!(link.kind, LinkKind::Markdown);
        assert_eq!(link.path(), "My Paper.pdf");
        assert_eq!(link.page(), Some(12));
        assert_eq!(link.render(), "[notes](My%20Paper.pdf#page=12 \"title\")");

        let angle = LinkText::parse("![x](<dir/My Paper.pdf#page=2>)").unwrap();
        assert!(angle.embed);
        assert_eq!(angle.path(), "dir/My Paper.pdf");
        assert_eq!(angle.with_page(5).render(), "![x](<dir/My Paper.pdf#page=5>)");

        assert_eq!(LinkText::parse("plain text"), None);
        assert_eq!(LinkText::parse("[broken](x.pdf"), None);
    }

    #[test]
    fn page_rewrite_keeps_other_params() {
        let raw = "[[a.pdf#selection=1,2&page=7&color=yellow|a]]";
        let link = LinkText::parse(raw).unwrap().with_page(8);
        assert_eq!(link.render(), "[[a.pdf#selection=1,2&page=8&color=yellow|a]]");

        let no_page = LinkText::parse("[[a.pdf#annotation=12R]]").unwrap().with_page(2);
        assert_eq!(no_page.render(), "[[a.pdf#page=2&annotation=12R]]");

        let bare = LinkText::parse("[[a.pdf]]").unwrap().with_page(4);
        assert_eq!(bare.render(), "[[a.pdf#page=4]]");
    }

    #[test]
    fn retarget_keeps_link_shape() {
        let link = LinkText::parse("[[papers/b.pdf#page=2]]").unwrap();
        let moved = link.retarget(
            Path::new("vault/papers/b.pdf"),
            Path::new("vault/papers/a.pdf"),
            "papers/a.pdf",
        );
        assert_eq!(moved.render(), "[[papers/a.pdf#page=2]]");

        let link = LinkText::parse("[b](b.pdf#page=2)").unwrap();
        let moved = link.retarget(
            Path::new("/vault/b.pdf"),
            Path::new("/vault/out/new name.pdf"),
            "out/new name.pdf",
        );
        assert_eq!(moved.render(), "[b](out/new%20name.pdf#page=2)");

        let link = LinkText::parse("[[doc.pdf#page=3]]").unwrap();
        let moved = link.retarget(
            Path::new("/vault/doc.pdf"),
            Path::new("/vault/out/part.pdf"),
            "out/part.pdf",
        );
        assert_eq!(moved.render(), "[[out/part.pdf#page=3]]");
    }

    #[test]
    fn markdown_targets_stay_linkable() {
        let link = LinkText::parse("[p](a.pdf#page=1)").unwrap().with_path("dir/a (1) 50%.pdf");
        assert_eq!(link.render(), "[p](dir/a%20%281%29%2050%25.pdf#page=1)");
        let reparsed = LinkText::parse(&link.render()).unwrap();
        assert_eq!(reparsed.path(), "dir/a (1) 50%.pdf");
        assert_eq!(reparsed.page(), Some(1));

        let angle = LinkText::parse("[p](<a.pdf#page=1>)").unwrap().with_path("a (1).pdf");
        assert_eq!(angle.render(), "[p](<a (1).pdf#page=1>)");

        let accented = LinkText::parse("[p](Caf%C3%A9.pdf)").unwrap();
        assert_eq!(accented.path(), "Café.pdf");
    }
}
