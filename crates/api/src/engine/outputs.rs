//! Read-only access to a job's output directory.
//!
//! Every client-supplied path goes through
//! [`resolve_in_root`](drylab_core::sandbox::resolve_in_root) before any
//! filesystem access. Directory walks and archive builds are blocking and
//! run on the blocking pool.

use std::path::PathBuf;

use drylab_core::archive::{build_zip, ScratchArchive};
use drylab_core::error::CoreError;
use drylab_core::job::JobStatus;
use drylab_core::preview::read_preview;
use drylab_core::sandbox::resolve_in_root;
use drylab_core::tree::{build_tree, TreeNode};
use drylab_core::types::JobId;
use serde::Serialize;

use super::manager::JobManager;

/// Directory listing of a job's output.
#[derive(Debug, Serialize)]
pub struct JobTree {
    pub root: PathBuf,
    pub tree: Vec<TreeNode>,
}

/// Text preview of one output file.
#[derive(Debug, Serialize)]
pub struct JobFile {
    pub path: String,
    pub size: u64,
    pub content: String,
    pub truncated: bool,
}

/// Accumulated log of a job.
#[derive(Debug, Serialize)]
pub struct JobLog {
    pub id: JobId,
    pub status: JobStatus,
    pub log: String,
}

/// What a download request resolves to.
#[derive(Debug)]
pub enum Download {
    /// A zip built for this request. Dropping it removes the scratch copy.
    Archive(ScratchArchive),
    /// A single regular file served as-is.
    File {
        path: PathBuf,
        file_name: String,
        size: u64,
    },
}

impl JobManager {
    /// Output directory of a job that has one.
    pub async fn output_root(&self, id: &str) -> Result<PathBuf, CoreError> {
        let job = self.get(id).await?;
        job.outdir.ok_or_else(|| CoreError::NotFound {
            entity: "OutputDirectory",
            id: id.to_string(),
        })
    }

    /// Bounded listing of the whole output directory.
    pub async fn tree(&self, id: &str) -> Result<JobTree, CoreError> {
        let root = self.output_root(id).await?;
        let max_depth = self.settings.tree_max_depth;
        let max_entries = self.settings.tree_max_entries;

        let walk_root = root.clone();
        let tree = tokio::task::spawn_blocking(move || {
            build_tree(&walk_root, "", max_depth, max_entries)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("Tree walk task failed: {e}")))??;

        Ok(JobTree { root, tree })
    }

    /// Preview of the file at `rel_path` inside the job's output directory.
    pub async fn read_file(&self, id: &str, rel_path: &str) -> Result<JobFile, CoreError> {
        let root = self.output_root(id).await?;
        let full = resolve_in_root(&root, rel_path)?;

        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Err(CoreError::NotFound {
                    entity: "File",
                    id: rel_path.to_string(),
                })
            }
        }

        let preview = read_preview(&full, self.settings.preview_max_bytes).await?;
        tracing::debug!(
            job_id = id,
            path = rel_path,
            size = preview.size,
            truncated = preview.truncated,
            "Serving file preview",
        );

        Ok(JobFile {
            path: rel_path.to_string(),
            size: preview.size,
            content: preview.content,
            truncated: preview.truncated,
        })
    }

    /// Current status and accumulated log of a job.
    pub async fn log(&self, id: &str) -> Result<JobLog, CoreError> {
        let job = self.get(id).await?;
        Ok(JobLog {
            id: job.id,
            status: job.status,
            log: job.results.log,
        })
    }

    /// Resolve a download request.
    ///
    /// No path (or an empty one) archives the whole output directory as
    /// `<id>.zip`. A directory is archived under its own name, a regular
    /// file is returned untouched.
    pub async fn download(&self, id: &str, rel_path: Option<&str>) -> Result<Download, CoreError> {
        let root = self.output_root(id).await?;

        let Some(rel_path) = rel_path.filter(|p| !p.is_empty()) else {
            return self.archive(root, format!("{id}_zip_"), id.to_string()).await;
        };

        let full = resolve_in_root(&root, rel_path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|_| CoreError::NotFound {
                entity: "Path",
                id: rel_path.to_string(),
            })?;

        let file_name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty());

        if meta.is_dir() {
            let stem = file_name.unwrap_or_else(|| "folder".to_string());
            self.archive(full, format!("{id}_zip_"), stem).await
        } else if meta.is_file() {
            Ok(Download::File {
                path: full,
                file_name: file_name.unwrap_or_else(|| "download".to_string()),
                size: meta.len(),
            })
        } else {
            Err(CoreError::NotFound {
                entity: "Path",
                id: rel_path.to_string(),
            })
        }
    }

    /// Zip `source` into a fresh scratch directory on the blocking pool.
    async fn archive(
        &self,
        source: PathBuf,
        prefix: String,
        stem: String,
    ) -> Result<Download, CoreError> {
        let scratch_parent = self.settings.archive_scratch_dir.clone();
        let archive = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&scratch_parent).map_err(|e| {
                CoreError::Internal(format!("{}: {e}", scratch_parent.display()))
            })?;
            build_zip(&source, &scratch_parent, &prefix, &stem)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("Archive task failed: {e}")))??;

        tracing::info!(
            archive = %archive.path().display(),
            file_name = archive.file_name(),
            "Built download archive",
        );
        Ok(Download::Archive(archive))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
