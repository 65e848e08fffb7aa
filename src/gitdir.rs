//! Git common-directory discovery for `--allow-git`.
//!
//! Linked worktrees keep a `.git` file pointing at a private gitdir whose
//! `commondir` file names the shared repository directory. Granting write
//! access to that directory is what makes git operations work from inside
//! a sandboxed worktree.

use std::fs;
use std::path::{Path, PathBuf};

/// Locate the git common directory for the repository containing `start`.
/// Returns `None` outside a repository.
pub fn common_dir(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let dot_git = current.join(".git");
        if dot_git.is_dir() {
            return Some(resolve_common(&dot_git));
        }
        if dot_git.is_file() {
            let gitdir = read_gitdir_file(&dot_git, current)?;
            return Some(resolve_common(&gitdir));
        }
        dir = current.parent();
    }
    None
}

/// `.git` file format: a single `gitdir: <path>` line. Relative targets
/// resolve against the directory holding the file.
fn read_gitdir_file(dot_git: &Path, base: &Path) -> Option<PathBuf> {
    let text = fs::read_to_string(dot_git).ok()?;
    let target = text.strip_prefix("gitdir:")?.trim();
    let path = Path::new(target);
    Some(if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    })
}

/// A worktree's private gitdir carries a `commondir` file naming the shared
/// directory; a main checkout's `.git` already is the common directory.
fn resolve_common(gitdir: &Path) -> PathBuf {
    let commondir_file = gitdir.join("commondir");
    if let Ok(text) = fs::read_to_string(&commondir_file) {
        let target = Path::new(text.trim());
        let resolved = if target.is_absolute() {
            target.to_path_buf()
        } else {
            gitdir.join(target)
        };
        return fs::canonicalize(&resolved).unwrap_or(resolved);
    }
    gitdir.to_path_buf()
}
