//! Loading of pre-chunked fragments from JSON-lines files.
//!
//! Chunk splitting happens upstream; each line of a `*.jsonl` file is one
//! serialized [`Fragment`]. Derived fields (hash, id, title) are filled in here
//! so producers may omit them.

use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::{Fragment, HierarchyLevel};

#[derive(Default)]
pub struct FragmentLoader {
    limit: Option<usize>,
}

impl FragmentLoader {
    pub fn new() -> Self { Self::default() }

    /// Stop after this many files.
    pub fn with_file_limit(limit: usize) -> Self { Self { limit: Some(limit) } }

    pub fn load_directory(&self, data_dir: &Path) -> Result<Vec<Fragment>> {
        let mut files = self.list_jsonl_files(data_dir);
        if files.is_empty() {
            warn!(dir = %data_dir.display(), "no .jsonl fragment files found");
            return Ok(vec![]);
        }
        if let Some(limit) = self.limit { files.truncate(limit); }
        let mut all = Vec::new();
        let mut seen = HashSet::new();
        for (file_index, file_path) in files.iter().enumerate() {
            debug!(file = %file_path.display(), n = file_index + 1, of = files.len(), "loading fragments");
            for fragment in self.load_file(file_path)? {
                if seen.insert(fragment.id.clone()) { all.push(fragment); }
                else { warn!(id = %fragment.id, "duplicate fragment id skipped"); }
            }
        }
        info!(files = files.len(), fragments = all.len(), "fragments loaded");
        Ok(all)
    }

    pub fn load_file(&self, file_path: &Path) -> Result<Vec<Fragment>> {
        let content = fs::read_to_string(file_path).with_context(|| format!("reading {}", file_path.display()))?;
        let mut out = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() { continue; }
            let fragment: Fragment = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid fragment", file_path.display(), line_no + 1))?;
            let fragment = fragment.with_derived_fields();
            Self::check(&fragment).map_err(|e| anyhow!("{}:{}: {}", file_path.display(), line_no + 1, e))?;
            out.push(fragment);
        }
        Ok(out)
    }

    fn check(fragment: &Fragment) -> Result<()> {
        if fragment.text.trim().is_empty() { return Err(anyhow!("fragment {} has empty text", fragment.id)); }
        if fragment.level == HierarchyLevel::Parent && fragment.parent_id.is_some() {
            return Err(anyhow!("PARENT fragment {} must not have a parent_id", fragment.id));
        }
        Ok(())
    }

    fn list_jsonl_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let path = entry.path(); if path.extension().and_then(|s| s.to_str()) == Some("jsonl") { files.push(path.to_path_buf()); }
        }
        files.sort(); files
    }
}
