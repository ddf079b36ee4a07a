// Copyright (c) 2024 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Keeps links from other files pointing at the right page while a document changes.
//!
//! [`LinkUpdater::update_links`] runs in three phases. The snapshot reads every
//! reference to the affected files and computes its new text while page
//! numbers still mean what they meant before the edit. The mutation then runs,
//! and only if it succeeds are the planned rewrites committed.

use crate::error::{ComposeError, Result};
use crate::link_text::LinkText;
use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// A link found in a source file. Spans are byte offsets into the file's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub raw_link_text: String,
    pub span_start: usize,
    pub span_end: usize,
}

/// Answers "which files link to this one".
#[async_trait]
pub trait ReferenceIndex: Send + Sync {
    /// Every reference to `target`, grouped by the file containing it.
    async fn references_to(&self, target: &Path) -> Result<IndexMap<PathBuf, Vec<Reference>>>;

    /// How a link written in `source` spells `target`. Relative to the
    /// source's folder unless the index knows better.
    fn link_path(&self, source: &Path, target: &Path) -> String {
        let folder = source.parent().unwrap_or(Path::new(""));
        slash_path(&relative_path(folder, target))
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>>;

    async fn write_bytes(&self, path: &Path, bytes: Vec<u8>) -> Result<()>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn remove(&self, path: &Path) -> Result<()>;

    async fn read_text(&self, path: &Path) -> Result<String> {
        let bytes = self.read_bytes(path).await?;
        String::from_utf8(bytes).map_err(|e| {
            ComposeError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    async fn write_text(&self, path: &Path, text: String) -> Result<()> {
        self.write_bytes(path, text.into_bytes()).await
    }
}

/// Where a link ends up after an edit. `None` fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRemap {
    pub file: Option<PathBuf>,
    pub page_number: Option<u32>,
}

impl LinkRemap {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn page(page_number: u32) -> Self {
        Self {
            file: None,
            page_number: Some(page_number),
        }
    }

    pub fn moved(file: impl Into<PathBuf>, page_number: u32) -> Self {
        Self {
            file: Some(file.into()),
            page_number: Some(page_number),
        }
    }
}

#[derive(Debug, Clone)]
struct PlannedEdit {
    span_start: usize,
    span_end: usize,
    old_text: String,
    new_text: String,
}

/// Outcome of the commit phase.
#[derive(Debug, Default)]
pub struct LinkUpdateReport {
    /// Files rewritten, with the number of links changed in each.
    pub rewritten: IndexMap<PathBuf, usize>,
    /// Files that could not be rewritten. Their text is untouched.
    pub failed: Vec<(PathBuf, ComposeError)>,
}

impl LinkUpdateReport {
    pub fn links_rewritten(&self) -> usize {
        self.rewritten.values().sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct LinkUpdater<'a, S, I> {
    storage: &'a S,
    index: &'a I,
}

impl<'a, S: Storage, I: ReferenceIndex> LinkUpdater<'a, S, I> {
    pub fn new(storage: &'a S, index: &'a I) -> Self {
        Self { storage, index }
    }

    /// Runs `mutate` and rewrites every link into `affected` through `remap`.
    ///
    /// `remap` gets the linked file and the page the link shows (if any) as
    /// they are before the edit. When `mutate` fails its error is returned and
    /// no source file is written.
    pub async fn update_links<T, F, R>(
        &self,
        mutate: F,
        affected: &[PathBuf],
        remap: R,
    ) -> Result<(T, LinkUpdateReport)>
    where
        F: Future<Output = Result<T>>,
        R: Fn(&Path, Option<u32>) -> LinkRemap,
    {
        let plan = self.snapshot(affected, &remap).await?;
        debug!(
            files = plan.len(),
            links = plan.values().map(Vec::len).sum::<usize>(),
            "planned link rewrites"
        );

        let output = mutate.await?;

        let report = self.commit(plan).await;
        if report.links_rewritten() > 0 {
            info!(
                links = report.links_rewritten(),
                files = report.rewritten.len(),
                "rewrote links"
            );
        }
        for (path, error) in &report.failed {
            warn!(path = %path.display(), %error, "could not rewrite links");
        }
        Ok((output, report))
    }

    async fn snapshot<R>(&self, affected: &[PathBuf], remap: &R) -> Result<IndexMap<PathBuf, Vec<PlannedEdit>>>
    where
        R: Fn(&Path, Option<u32>) -> LinkRemap,
    {
        let mut plan: IndexMap<PathBuf, Vec<PlannedEdit>> = IndexMap::new();
        for file in affected {
            for (source, references) in self.index.references_to(file).await? {
                let link_path = |target: &Path| self.index.link_path(&source, target);
                for reference in references {
                    let Some(new_text) = rewrite(&reference.raw_link_text, file, remap, &link_path) else {
                        continue;
                    };
                    let edits = plan.entry(source.clone()).or_default();
                    if edits.iter().any(|e| e.span_start == reference.span_start) {
                        continue;
                    }
                    edits.push(PlannedEdit {
                        span_start: reference.span_start,
                        span_end: reference.span_end,
                        old_text: reference.raw_link_text,
                        new_text,
                    });
                }
            }
        }
        Ok(plan)
    }

    async fn commit(&self, plan: IndexMap<PathBuf, Vec<PlannedEdit>>) -> LinkUpdateReport {
        let writes = plan.into_iter().map(|(source, edits)| async move {
            let count = edits.len();
            let result = self.apply(&source, edits).await;
            (source, count, result)
        });

        let mut report = LinkUpdateReport::default();
        for (source, count, result) in join_all(writes).await {
            match result {
                Ok(()) => {
                    report.rewritten.insert(source, count);
                }
                Err(e) => report.failed.push((source, e)),
            }
        }
        report
    }

    async fn apply(&self, source: &Path, mut edits: Vec<PlannedEdit>) -> Result<()> {
        let mut text = self.storage.read_text(source).await?;
        for edit in &edits {
            if text.get(edit.span_start..edit.span_end) != Some(edit.old_text.as_str()) {
                return Err(ComposeError::StaleReference(source.to_path_buf()));
            }
        }
        // Back to front, so earlier spans stay valid.
        edits.sort_by(|a, b| b.span_start.cmp(&a.span_start));
        for edit in edits {
            text.replace_range(edit.span_start..edit.span_end, &edit.new_text);
        }
        self.storage.write_text(source, text).await
    }
}

// New text for a link into `file`, or `None` when it stays as it is.
// `link_path` spells a moved-to file the way the linking note should.
fn rewrite<R>(raw: &str, file: &Path, remap: &R, link_path: &dyn Fn(&Path) -> String) -> Option<String>
where
    R: Fn(&Path, Option<u32>) -> LinkRemap,
{
    let link = LinkText::parse(raw)?;
    let LinkRemap { file: new_file, page_number } = remap(file, link.page());
    let mut link = link;
    if let Some(new_file) = new_file {
        link = link.retarget(file, &new_file, &link_path(&new_file));
    }
    if let Some(page) = page_number {
        link = link.with_page(page);
    }
    let rendered = link.render();
    (rendered != raw).then_some(rendered)
}

/// Resolves `.` and `..` without touching the file system.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// `to` as seen from the folder `from_dir`. Both sides must be absolute or
/// both relative; otherwise `to` comes back unchanged.
pub(crate) fn relative_path(from_dir: &Path, to: &Path) -> PathBuf {
    let (from_dir, to) = (normalize(from_dir), normalize(to));
    if from_dir.is_absolute() != to.is_absolute() {
        return to;
    }
    let from: Vec<Component> = from_dir.components().collect();
    let target: Vec<Component> = to.components().collect();
    let common = from.iter().zip(&target).take_while(|(a, b)| a == b).count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component);
    }
    out
}

/// A relative path written with `/` separators, the way notes spell links.
pub(crate) fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
