//! Filesystem document source.
//!
//! Walks a root directory, filters files through include/exclude glob
//! sets, and loads each match as a [`DocumentInput`]. Text extraction for
//! rich formats happens upstream; everything this module reads is treated
//! as UTF-8 text.
//!
//! Document ids are derived from the path relative to the scan root, so a
//! re-scan of an edited file resolves to the same id and replaces the
//! previous version instead of accumulating a duplicate.

use std::path::{Path, PathBuf};

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::SourceConfig;
use crate::error::{Result, RetrievalError};
use crate::models::{DocumentInput, DocumentMeta};

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| RetrievalError::Config {
            reason: format!("invalid glob '{pattern}': {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| RetrievalError::Config {
        reason: format!("glob set: {e}"),
    })
}

/// Files under `root` matching the source globs, sorted by relative path
/// so scan order is stable across runs.
pub fn scan_paths(root: &Path, config: &SourceConfig) -> Result<Vec<PathBuf>> {
    let include = build_globset(&config.include_globs)?;
    let exclude = build_globset(&config.exclude_globs)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| RetrievalError::source(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        if include.is_match(&relative) && !exclude.is_match(&relative) {
            paths.push(relative);
        }
    }
    paths.sort();

    tracing::debug!(root = %root.display(), files = paths.len(), "scanned source directory");
    Ok(paths)
}

/// Load one file (given relative to `root`) as a document.
pub fn load_document(root: &Path, relative: &Path) -> Result<DocumentInput> {
    let full = root.join(relative);
    let text =
        std::fs::read_to_string(&full).map_err(|e| RetrievalError::source(&full, e))?;

    let title = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned());

    Ok(DocumentInput {
        id: document_id(relative),
        text,
        meta: DocumentMeta {
            title,
            author: None,
            page_count: None,
            source_path: relative.to_path_buf(),
            ingested_at: Utc::now(),
        },
    })
}

/// Stable document id: the relative path lowercased with every run of
/// non-alphanumeric characters collapsed to a single dash.
pub fn document_id(relative: &Path) -> String {
    let raw = relative.to_string_lossy().to_lowercase();
    let mut id = String::with_capacity(raw.len());
    let mut dash_pending = false;
    for c in raw.chars() {
        if c.is_alphanumeric() {
            if dash_pending && !id.is_empty() {
                id.push('-');
            }
            dash_pending = false;
            id.push(c);
        } else {
            dash_pending = true;
        }
    }
    id
}
