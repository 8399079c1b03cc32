//! Filesystem sandbox (spec.md §4.1).
//!
//! Every `fs.*` tool invocation resolves its path through [`Sandbox::resolve`]
//! before touching disk. Two checks, both mandatory:
//!
//! 1. The resolved, canonical path must sit under the sandbox root.
//! 2. No path component strictly between the root and the leaf may be a
//!    symlink — a symlink that happens to canonicalize inside the root is
//!    still rejected, since a later write could repoint it outside.
//!
//! The original Python prototype (`olympus_tools/fs.py::is_path_allowed`)
//! only does the first check via `os.path.realpath` plus a prefix
//! comparison. That is enough to catch `../../etc/passwd`, but not a
//! symlink under the root that is swapped out between the check and the
//! write (or one that simply makes audit logs point at the wrong physical
//! file). This crate adds the missing per-component walk.

use std::fs;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("path escapes sandbox root: {0}")]
    PathEscape(String),

    #[error("symlink forbidden in sandbox path: {0}")]
    SymlinkForbidden(String),

    #[error("sandbox root does not exist or is not a directory: {0}")]
    InvalidRoot(String),

    #[error("io error resolving '{path}': {message}")]
    Io { path: String, message: String },
}

impl From<SandboxError> for agentrt_core::AppError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::PathEscape(p) => agentrt_core::AppError::PathEscape(p),
            SandboxError::SymlinkForbidden(p) => agentrt_core::AppError::SymlinkForbidden(p),
            SandboxError::InvalidRoot(p) => agentrt_core::AppError::PathEscape(p),
            SandboxError::Io { path, message } => agentrt_core::AppError::ToolFailed(format!("{path}: {message}")),
        }
    }
}

/// A confined filesystem root. `fs.*` tools hold one of these rather than
/// touching `std::fs` directly with caller-supplied paths.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Open a sandbox rooted at `root`. `root` must already exist as a
    /// directory — the sandbox never creates its own root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let root = root.into();
        let canonical = fs::canonicalize(&root).map_err(|_| SandboxError::InvalidRoot(root.display().to_string()))?;
        if !canonical.is_dir() {
            return Err(SandboxError::InvalidRoot(root.display().to_string()));
        }
        Ok(Sandbox { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied relative path against the sandbox root,
    /// rejecting escapes and symlinks. Does not require the path to exist:
    /// `fs.write` needs to resolve paths whose leaf component doesn't exist
    /// yet. Existing ancestor components are still walked for symlinks.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, SandboxError> {
        let requested_path = Path::new(requested);
        if requested_path.is_absolute() {
            return Err(SandboxError::PathEscape(requested.to_string()));
        }

        let mut resolved = self.root.clone();
        for component in requested_path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() || !resolved.starts_with(&self.root) {
                        return Err(SandboxError::PathEscape(requested.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::PathEscape(requested.to_string()));
                }
            }
        }

        if !resolved.starts_with(&self.root) {
            return Err(SandboxError::PathEscape(requested.to_string()));
        }

        self.reject_symlinks_between_root_and(&resolved, requested)?;
        Ok(resolved)
    }

    /// Walk every component strictly between the root and `target`,
    /// erroring if any of them is a symlink. `target` itself is allowed to
    /// not exist (the write-target case); if it exists and is itself a
    /// symlink, that is rejected too.
    fn reject_symlinks_between_root_and(&self, target: &Path, original: &str) -> Result<(), SandboxError> {
        let relative = target
            .strip_prefix(&self.root)
            .expect("target was already confirmed to start with root");

        let mut walked = self.root.clone();
        for component in relative.components() {
            walked.push(component);
            match fs::symlink_metadata(&walked) {
                Ok(meta) => {
                    if meta.file_type().is_symlink() {
                        return Err(SandboxError::SymlinkForbidden(original.to_string()));
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    // Ancestor doesn't exist yet (fine for fs.write's leaf,
                    // or any not-yet-created intermediate directory).
                    continue;
                }
                Err(err) => {
                    return Err(SandboxError::Io {
                        path: walked.display().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[cfg(unix)]
    use std::os::unix::fs::symlink;

    fn sandbox_in(dir: &tempfile::TempDir) -> Sandbox {
        Sandbox::new(dir.path()).unwrap()
    }

    #[test]
    fn resolves_simple_relative_path_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&dir);
        let resolved = sandbox.resolve("a/b.txt").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("a/b.txt"));
    }

    #[test]
    fn rejects_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&dir);
        let err = sandbox.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, SandboxError::PathEscape(_)));
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&dir);
        let err = sandbox.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, SandboxError::PathEscape(_)));
    }

    #[test]
    fn allows_parent_dir_that_stays_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&dir);
        let resolved = sandbox.resolve("a/../b.txt").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("b.txt"));
    }

    #[test]
    fn nonexistent_leaf_resolves_for_write() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&dir);
        let resolved = sandbox.resolve("brand/new/file.txt").unwrap();
        assert!(resolved.ends_with("brand/new/file.txt"));
    }

    #[test]
    #[cfg(unix)]
    fn rejects_symlinked_ancestor_directory() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let link_path = dir.path().join("linked");
        symlink(outside.path(), &link_path).unwrap();

        let sandbox = sandbox_in(&dir);
        let err = sandbox.resolve("linked/file.txt").unwrap_err();
        assert!(matches!(err, SandboxError::SymlinkForbidden(_)));
    }

    #[test]
    #[cfg(unix)]
    fn rejects_symlink_leaf_even_if_it_resolves_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.txt");
        File::create(&real).unwrap();
        let link_path = dir.path().join("link.txt");
        symlink(&real, &link_path).unwrap();

        let sandbox = sandbox_in(&dir);
        let err = sandbox.resolve("link.txt").unwrap_err();
        assert!(matches!(err, SandboxError::SymlinkForbidden(_)));
    }

    #[test]
    fn rejects_missing_root() {
        let err = Sandbox::new("/nonexistent/path/for/agentrt/tests").unwrap_err();
        assert!(matches!(err, SandboxError::InvalidRoot(_)));
    }

    #[test]
    fn converts_into_app_error() {
        let sandbox_err = SandboxError::PathEscape("../x".to_string());
        let app_err: agentrt_core::AppError = sandbox_err.into();
        assert!(matches!(app_err, agentrt_core::AppError::PathEscape(_)));
    }
}
