//! Resolution of caller-supplied paths inside a worker sandbox.

use std::path::{Component, Path, PathBuf};

use super::WorkerError;

/// Resolve `relative` against `root`, refusing anything that leaves `root`.
///
/// Resolution is purely lexical: `.` is dropped, `..` pops one level, and
/// popping past the root, absolute paths or drive prefixes are rejected.
/// The filesystem is never consulted, so a rejected path costs no I/O.
/// An empty path resolves to the root itself.
///
/// # Errors
///
/// Returns [`WorkerError::PathTraversal`] when the path escapes the root.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use oxide_courier::worker::path::resolve_in_root;
///
/// let root = Path::new("/srv/workers/bot1");
/// assert_eq!(
///     resolve_in_root(root, "data/../run.py").ok(),
///     Some(root.join("run.py"))
/// );
/// assert!(resolve_in_root(root, "../bot2/run.py").is_err());
/// ```
pub fn resolve_in_root(root: &Path, relative: &str) -> Result<PathBuf, WorkerError> {
    let traversal = || WorkerError::PathTraversal(relative.to_string());

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(traversal());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(parts);
    Ok(resolved)
}

/// Check that `target` (already lexically inside `root`) stays inside once
/// symlinks are followed.
///
/// The deepest existing ancestor of `target` is canonicalized and must lie
/// under the canonical root. A dangling symlink on the way is refused, since
/// creating a file through it would land wherever it points.
///
/// # Errors
///
/// [`WorkerError::PathTraversal`] on escape, [`WorkerError::Io`] if the root
/// cannot be canonicalized.
pub async fn ensure_confined(root: &Path, target: &Path, relative: &str) -> Result<(), WorkerError> {
    let traversal = || WorkerError::PathTraversal(relative.to_string());
    let canonical_root = tokio::fs::canonicalize(root).await?;

    let mut current = target;
    loop {
        match tokio::fs::canonicalize(current).await {
            Ok(real) if real.starts_with(&canonical_root) => return Ok(()),
            Ok(_) => return Err(traversal()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if tokio::fs::symlink_metadata(current).await.is_ok() {
                    return Err(traversal());
                }
                current = current.parent().ok_or_else(traversal)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
