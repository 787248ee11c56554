//! Path containment for client-supplied relative paths.
//!
//! Every file operation that takes a path from a client resolves it through
//! [`resolve_in_root`] first. The result is either a canonical path that lies
//! inside the job's output root or an `InvalidPath` error.

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::CoreError;

/// Resolve `relative` against `root`, refusing anything that lands outside it.
///
/// Both sides are canonicalized before comparison, so `..` segments and
/// symlinks pointing out of the root are caught. Absolute paths are rejected
/// outright. The containment test is component-wise: `/a/bc` is not inside
/// `/a/b`.
///
/// The target itself does not have to exist; callers decide whether a
/// missing file is `NotFound`. An empty path resolves to the root.
pub fn resolve_in_root(root: &Path, relative: &str) -> Result<PathBuf, CoreError> {
    let root = root.canonicalize().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CoreError::NotFound {
            entity: "OutputDirectory",
            id: root.display().to_string(),
        },
        _ => CoreError::ReadFailure(format!("{}: {e}", root.display())),
    })?;

    let mut current = root.clone();
    for component in Path::new(relative).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
            }
            Component::Normal(name) => {
                current = step_into(&current, name, relative)?;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid_path(relative));
            }
        }
    }

    if !current.starts_with(&root) {
        return Err(invalid_path(relative));
    }
    Ok(current)
}

/// Append one path segment, following it through the filesystem if it exists.
///
/// `current` is canonical for as long as the walk stays on existing entries,
/// which makes a later `..` equivalent to what the kernel would do. Once the
/// walk leaves existing territory, segments are applied lexically.
fn step_into(current: &Path, name: &std::ffi::OsStr, relative: &str) -> Result<PathBuf, CoreError> {
    let next = current.join(name);
    match std::fs::symlink_metadata(&next) {
        Ok(meta) => match next.canonicalize() {
            Ok(resolved) => Ok(resolved),
            // Dangling symlink: its target cannot be checked.
            Err(_) if meta.file_type().is_symlink() => Err(invalid_path(relative)),
            Err(e) => Err(CoreError::ReadFailure(format!("{}: {e}", next.display()))),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(next),
        Err(e) => Err(CoreError::ReadFailure(format!("{}: {e}", next.display()))),
    }
}

fn invalid_path(relative: &str) -> CoreError {
    CoreError::InvalidPath(format!("'{relative}' is outside the job output directory"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path().join("out");
        std::fs::create_dir_all(root.join("nested")).expect("mkdir");
        std::fs::write(root.join("nested/result.pdb"), "ATOM").expect("write");
        let canonical = root.canonicalize().expect("canonicalize");
        (dir, canonical)
    }

    #[test]
    fn empty_path_is_the_root() {
        let (_dir, root) = setup();
        assert_eq!(resolve_in_root(&root, "").expect("resolve"), root);
        assert_eq!(resolve_in_root(&root, ".").expect("resolve"), root);
    }

    #[test]
    fn inside_paths_resolve_under_root() {
        let (_dir, root) = setup();
        let resolved = resolve_in_root(&root, "nested/result.pdb").expect("resolve");
        assert_eq!(resolved, root.join("nested/result.pdb"));

        let resolved = resolve_in_root(&root, "nested/../nested/./result.pdb").expect("resolve");
        assert!(resolved.starts_with(&root));
    }

    #[test]
    fn missing_targets_still_resolve() {
        let (_dir, root) = setup();
        let resolved = resolve_in_root(&root, "nested/not-yet.txt").expect("resolve");
        assert_eq!(resolved, root.join("nested/not-yet.txt"));
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let (_dir, root) = setup();
        assert_matches!(
            resolve_in_root(&root, "../../etc/passwd"),
            Err(CoreError::InvalidPath(_))
        );
        assert_matches!(
            resolve_in_root(&root, "nested/../../out-sibling"),
            Err(CoreError::InvalidPath(_))
        );
        assert_matches!(
            resolve_in_root(&root, "missing/../../.."),
            Err(CoreError::InvalidPath(_))
        );
    }

    #[test]
    fn leaving_and_reentering_the_root_is_allowed() {
        let (_dir, root) = setup();
        let resolved = resolve_in_root(&root, "../out/nested").expect("resolve");
        assert_eq!(resolved, root.join("nested"));
    }

    #[test]
    fn absolute_paths_are_rejected() {
        let (_dir, root) = setup();
        assert_matches!(
            resolve_in_root(&root, "/etc/passwd"),
            Err(CoreError::InvalidPath(_))
        );
        let inside = root.join("nested");
        assert_matches!(
            resolve_in_root(&root, inside.to_str().expect("utf8")),
            Err(CoreError::InvalidPath(_))
        );
    }

    #[test]
    fn sibling_with_shared_prefix_is_outside() {
        let (dir, root) = setup();
        std::fs::create_dir_all(dir.path().join("outside")).expect("mkdir");
        assert_matches!(
            resolve_in_root(&root, "../outside"),
            Err(CoreError::InvalidPath(_))
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let (dir, root) = setup();
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "key").expect("write");
        std::os::unix::fs::symlink(&secret, root.join("link")).expect("symlink");
        std::os::unix::fs::symlink(dir.path().join("gone"), root.join("dangling"))
            .expect("symlink");

        assert_matches!(
            resolve_in_root(&root, "link"),
            Err(CoreError::InvalidPath(_))
        );
        assert_matches!(
            resolve_in_root(&root, "dangling"),
            Err(CoreError::InvalidPath(_))
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_within_root_is_followed() {
        let (_dir, root) = setup();
        std::os::unix::fs::symlink(root.join("nested"), root.join("alias")).expect("symlink");
        let resolved = resolve_in_root(&root, "alias/result.pdb").expect("resolve");
        assert_eq!(resolved, root.join("nested/result.pdb"));
    }

    #[test]
    fn missing_root_is_not_found() {
        let dir = tempfile::tempdir().expect("create temp dir");
        assert_matches!(
            resolve_in_root(&dir.path().join("nope"), "a"),
            Err(CoreError::NotFound { .. })
        );
    }
}
