//! Zip packaging of a job's output for download.
//!
//! [`build_zip`] writes the archive into a fresh scratch directory and hands
//! back a [`ScratchArchive`]. The scratch directory, archive included, is
//! removed when that value is dropped, so whoever streams the archive keeps
//! it alive exactly as long as the transfer needs it.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::CoreError;

/// A finished archive living in its own scratch directory.
#[derive(Debug)]
pub struct ScratchArchive {
    path: PathBuf,
    file_name: String,
    // Removed on drop.
    dir: tempfile::TempDir,
}

impl ScratchArchive {
    /// Location of the archive on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name to offer the client, e.g. `job-001.zip`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl Drop for ScratchArchive {
    fn drop(&mut self) {
        tracing::debug!(dir = %self.dir.path().display(), "Removing scratch archive");
    }
}

/// Archive the contents of `source_dir` as `<archive_stem>.zip`.
///
/// Entries are relative to `source_dir` itself; the directory's own name
/// never appears as a top-level entry. Sub-directories get explicit entries
/// so empty ones survive extraction. Symlinks are skipped. The scratch
/// directory is created under `scratch_parent` with `scratch_prefix`.
pub fn build_zip(
    source_dir: &Path,
    scratch_parent: &Path,
    scratch_prefix: &str,
    archive_stem: &str,
) -> Result<ScratchArchive, CoreError> {
    if !source_dir.is_dir() {
        return Err(CoreError::NotFound {
            entity: "Directory",
            id: source_dir.display().to_string(),
        });
    }

    let dir = tempfile::Builder::new()
        .prefix(scratch_prefix)
        .tempdir_in(scratch_parent)
        .map_err(|e| CoreError::Internal(format!("Failed to create scratch dir: {e}")))?;
    let file_name = format!("{archive_stem}.zip");
    let path = dir.path().join(&file_name);

    let file = File::create(&path)
        .map_err(|e| CoreError::Internal(format!("{}: {e}", path.display())))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_dir_contents(&mut writer, source_dir, "", options)?;
    writer
        .finish()
        .map_err(|e| CoreError::Internal(format!("Failed to finalize archive: {e}")))?
        .flush()
        .map_err(|e| CoreError::Internal(format!("{}: {e}", path.display())))?;

    tracing::debug!(
        source = %source_dir.display(),
        archive = %path.display(),
        "Archive built",
    );

    Ok(ScratchArchive {
        path,
        file_name,
        dir,
    })
}

fn add_dir_contents<W: io::Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<(), CoreError> {
    let read_err = |e: io::Error| CoreError::ReadFailure(format!("{}: {e}", dir.display()));

    let mut entries = fs::read_dir(dir)
        .map_err(read_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_type = entry.file_type().map_err(read_err)?;
        if file_type.is_symlink() {
            continue;
        }
        let name = format!("{prefix}{}", entry.file_name().to_string_lossy());
        let path = entry.path();

        if file_type.is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|e| CoreError::Internal(format!("Failed to add {name}: {e}")))?;
            add_dir_contents(writer, &path, &format!("{name}/"), options)?;
        } else if file_type.is_file() {
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| CoreError::Internal(format!("Failed to add {name}: {e}")))?;
            let mut source = File::open(&path)
                .map_err(|e| CoreError::ReadFailure(format!("{}: {e}", path.display())))?;
            io::copy(&mut source, writer)
                .map_err(|e| CoreError::ReadFailure(format!("{}: {e}", path.display())))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
