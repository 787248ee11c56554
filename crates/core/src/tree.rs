//! Bounded directory listings for browsing a job's output.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

use crate::error::CoreError;

/// Default number of directory levels below the listed one.
pub const DEFAULT_TREE_DEPTH: usize = 4;

/// Default cap on entries returned per directory level.
pub const DEFAULT_TREE_ENTRIES: usize = 500;

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Dir,
    File,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    /// Path relative to the listing root, `/`-separated.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

/// List `root/rel_dir`, recursing up to `max_depth` levels below it.
///
/// Directories sort before files, then by lowercase name (exact name breaks
/// ties), so an unchanged directory always lists identically. Each level is
/// cut off after `max_entries` entries. Directories at the depth limit are
/// listed without `children`.
///
/// Symlinks are listed as files and never followed, so a link pointing out
/// of the root cannot expose anything beyond its own name.
///
/// `rel_dir` must already have been checked with
/// [`resolve_in_root`](crate::sandbox::resolve_in_root).
pub fn build_tree(
    root: &Path,
    rel_dir: &str,
    max_depth: usize,
    max_entries: usize,
) -> Result<Vec<TreeNode>, CoreError> {
    let base = root.join(rel_dir);
    match fs::metadata(&base) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(dir_not_found(rel_dir)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(dir_not_found(rel_dir)),
        Err(e) => return Err(CoreError::ReadFailure(format!("{}: {e}", base.display()))),
    }
    list_level(&base, rel_dir, max_depth, max_entries)
        .map_err(|e| CoreError::ReadFailure(format!("{}: {e}", base.display())))
}

struct Entry {
    name: String,
    is_dir: bool,
    size: Option<u64>,
}

fn list_level(
    dir: &Path,
    rel_dir: &str,
    depth: usize,
    max_entries: usize,
) -> io::Result<Vec<TreeNode>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let is_dir = file_type.is_dir();
        let size = if is_dir {
            None
        } else {
            entry.metadata().ok().map(|m| m.len())
        };
        entries.push(Entry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
            size,
        });
    }
    entries.sort_by(compare_entries);
    entries.truncate(max_entries);

    let mut nodes = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = join_rel(rel_dir, &entry.name);
        let node = if entry.is_dir {
            let children = if depth > 0 {
                Some(list_level(
                    &dir.join(&entry.name),
                    &path,
                    depth - 1,
                    max_entries,
                )?)
            } else {
                None
            };
            TreeNode {
                name: entry.name,
                path,
                kind: NodeKind::Dir,
                size: None,
                children,
            }
        } else {
            TreeNode {
                name: entry.name,
                path,
                kind: NodeKind::File,
                size: entry.size,
                children: None,
            }
        };
        nodes.push(node);
    }
    Ok(nodes)
}

fn compare_entries(a: &Entry, b: &Entry) -> Ordering {
    // `!is_dir` puts directories first (false < true).
    (!a.is_dir, a.name.to_lowercase(), &a.name).cmp(&(!b.is_dir, b.name.to_lowercase(), &b.name))
}

fn join_rel(rel_dir: &str, name: &str) -> String {
    let rel_dir = rel_dir.trim_matches('/');
    if rel_dir.is_empty() || rel_dir == "." {
        name.to_string()
    } else {
        format!("{rel_dir}/{name}")
    }
}

fn dir_not_found(rel_dir: &str) -> CoreError {
    CoreError::NotFound {
        entity: "Directory",
        id: rel_dir.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
