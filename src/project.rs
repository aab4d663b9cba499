//! Project file system.
//!
//! Maps project-relative paths (`/Views/Home/Index.cshtml`) onto a physical
//! root directory, enumerates template items and locates the hierarchical
//! import files that apply to an item.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::FileKind;
use crate::source::SourceDocument;

pub const VIEW_IMPORTS_FILE_NAME: &str = "_ViewImports.cshtml";
pub const TEMPLATE_EXTENSION: &str = "cshtml";

/// Normalizes to a `/`-rooted path with forward slashes.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RazorProjectItem {
    /// Project-relative path, `/`-rooted.
    pub relative_path: String,
    pub physical_path: PathBuf,
    pub file_kind: FileKind,
}

impl RazorProjectItem {
    pub fn exists(&self) -> bool {
        self.physical_path.is_file()
    }

    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit_once('/')
            .map_or(self.relative_path.as_str(), |(_, name)| name)
    }

    pub fn read(&self) -> std::io::Result<SourceDocument> {
        SourceDocument::from_file(&self.physical_path, Some(self.relative_path.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct RazorProjectFileSystem {
    root: PathBuf,
}

impl RazorProjectFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Item for `path`, whether or not it exists on disk.
    pub fn get_item(&self, path: &str) -> RazorProjectItem {
        let relative_path = normalize_path(path);
        let physical_path = self.root.join(relative_path.trim_start_matches('/'));
        RazorProjectItem {
            file_kind: FileKind::from_path(&relative_path),
            relative_path,
            physical_path,
        }
    }

    /// Every template under `base_path`, sorted by relative path.
    pub fn enumerate_items(&self, base_path: &str) -> Vec<RazorProjectItem> {
        let base = self.root.join(normalize_path(base_path).trim_start_matches('/'));
        let mut items: Vec<RazorProjectItem> = WalkDir::new(&base)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == TEMPLATE_EXTENSION)
            })
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                Some(self.get_item(&relative.to_string_lossy()))
            })
            .collect();
        items.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        log::debug!("enumerated {} items under {}", items.len(), base.display());
        items
    }

    /// Existing `file_name` items in the directories from the root down to
    /// the directory of `path`, root first. `path` itself is never included.
    pub fn find_hierarchical_items(&self, path: &str, file_name: &str) -> Vec<RazorProjectItem> {
        let path = normalize_path(path);
        let directory = path.rsplit_once('/').map_or("", |(dir, _)| dir);
        let mut candidates = vec![format!("/{}", file_name)];
        let mut current = String::new();
        for segment in directory.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            candidates.push(format!("{}/{}", current, file_name));
        }
        candidates
            .into_iter()
            .filter(|candidate| *candidate != path)
            .map(|candidate| self.get_item(&candidate))
            .filter(RazorProjectItem::exists)
            .collect()
    }

    /// Parsed-ready sources of the `_ViewImports.cshtml` files for `item`.
    pub fn import_sources(&self, item: &RazorProjectItem) -> std::io::Result<Vec<SourceDocument>> {
        self.find_hierarchical_items(&item.relative_path, VIEW_IMPORTS_FILE_NAME)
            .iter()
            .map(RazorProjectItem::read)
            .collect()
    }
}
