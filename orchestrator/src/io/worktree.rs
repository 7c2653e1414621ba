//! Fresh working trees for each attempt.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::io::git::Git;

/// Source of a clean tree for one attempt.
pub trait WorkTree {
    /// Return a tree with no changes from earlier attempts.
    fn prepare(&mut self, attempt: u32) -> Result<PathBuf>;
}

impl<W: WorkTree + ?Sized> WorkTree for Box<W> {
    fn prepare(&mut self, attempt: u32) -> Result<PathBuf> {
        (**self).prepare(attempt)
    }
}

/// Restores a git checkout in place (`reset --hard` + `clean -fdx`).
#[derive(Debug, Clone)]
pub struct GitWorkTree {
    git: Git,
    /// Repository-relative paths that survive the clean (artifact dirs).
    excludes: Vec<String>,
}

impl GitWorkTree {
    pub fn new(root: impl Into<PathBuf>, excludes: Vec<String>) -> Result<Self> {
        let git = Git::new(root);
        if !git.is_repo() {
            return Err(anyhow!(
                "{} is not a git working tree",
                git.workdir().display()
            ));
        }
        Ok(Self { git, excludes })
    }
}

impl WorkTree for GitWorkTree {
    #[instrument(skip_all, fields(attempt))]
    fn prepare(&mut self, attempt: u32) -> Result<PathBuf> {
        self.git
            .restore_pristine(&self.excludes)
            .context("restore checkout")?;
        self.git.ensure_clean_except_prefixes(&self.excludes)?;
        debug!(head = %self.git.head_short_sha().unwrap_or_default(), "checkout restored");
        Ok(self.git.workdir().to_path_buf())
    }
}

/// Copies a pristine directory to `<base>/attempt-<n>` for every attempt.
#[derive(Debug, Clone)]
pub struct SnapshotWorkTree {
    pristine: PathBuf,
    base: PathBuf,
    skip: Vec<PathBuf>,
}

impl SnapshotWorkTree {
    pub fn new(pristine: impl Into<PathBuf>, base: impl Into<PathBuf>) -> Self {
        Self {
            pristine: pristine.into(),
            base: base.into(),
            skip: Vec::new(),
        }
    }

    /// Never copy `path` (for example the run's output directory).
    pub fn skipping(mut self, path: impl Into<PathBuf>) -> Self {
        self.skip.push(path.into());
        self
    }

    pub fn attempt_dir(&self, attempt: u32) -> PathBuf {
        self.base.join(format!("attempt-{attempt}"))
    }

    /// Skipped paths relative to the pristine root; those outside it drop out.
    fn relative_skips(&self) -> Result<Vec<PathBuf>> {
        let root = absolute(&self.pristine)?;
        let mut skips = Vec::new();
        for path in std::iter::once(&self.base).chain(&self.skip) {
            if let Ok(rel) = absolute(path)?.strip_prefix(&root) {
                skips.push(rel.to_path_buf());
            }
        }
        Ok(skips)
    }
}

impl WorkTree for SnapshotWorkTree {
    #[instrument(skip_all, fields(attempt))]
    fn prepare(&mut self, attempt: u32) -> Result<PathBuf> {
        let dest = self.attempt_dir(attempt);
        if dest.exists() {
            fs::remove_dir_all(&dest)
                .with_context(|| format!("remove stale tree {}", dest.display()))?;
        }
        copy_tree(&self.pristine, &dest, &self.relative_skips()?)?;
        debug!(dest = %dest.display(), "snapshot copied");
        Ok(dest)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("resolve {}", path.display()))
}

/// Recursively copy `src` into `dest`, skipping the `src`-relative `skip` paths.
fn copy_tree(src: &Path, dest: &Path, skip: &[PathBuf]) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("create directory {}", dest.display()))?;
    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !entry
                .path()
                .strip_prefix(src)
                .is_ok_and(|rel| skip.iter().any(|s| s == rel))
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("strip prefix {}", src.display()))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create directory {}", target.display()))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(src).with_context(|| format!("read link {}", src.display()))?;
    std::os::unix::fs::symlink(&link, target)
        .with_context(|| format!("create link {}", target.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    fs::copy(src, target).with_context(|| format!("copy {}", src.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_discards_previous_attempt_changes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pristine = temp.path().join("repo");
        fs::create_dir_all(pristine.join("src")).expect("mkdir");
        fs::write(pristine.join("src/lib.txt"), "original").expect("seed");

        let mut tree = SnapshotWorkTree::new(&pristine, temp.path().join("trees"));
        let first = tree.prepare(1).expect("prepare");
        fs::write(first.join("src/lib.txt"), "edited").expect("edit");
        fs::write(first.join("extra.txt"), "junk").expect("junk");

        let second = tree.prepare(2).expect("prepare");
        assert_ne!(first, second);
        assert_eq!(
            fs::read_to_string(second.join("src/lib.txt")).expect("read"),
            "original"
        );
        assert!(!second.join("extra.txt").exists());
        assert_eq!(
            fs::read_to_string(pristine.join("src/lib.txt")).expect("read"),
            "original"
        );
    }

    #[test]
    fn snapshot_skips_base_nested_in_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), "a").expect("seed");
        let base = temp.path().join(".orchestrator-trees");
        let mut tree = SnapshotWorkTree::new(temp.path(), &base);
        let dir = tree.prepare(1).expect("prepare");
        assert!(dir.join("a.txt").exists());
        assert!(!dir.join(".orchestrator-trees").exists());
    }

    #[test]
    fn snapshot_skips_output_dir_inside_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = temp.path().join("repo");
        let out = repo.join("out");
        fs::create_dir_all(out.join("attempts/1")).expect("mkdir");
        fs::write(repo.join("a.txt"), "a").expect("seed");
        fs::write(out.join("attempts/1/response.md"), "old").expect("artifact");
        fs::write(out.join("issue-7.lock"), "lock").expect("lock");

        let mut tree = SnapshotWorkTree::new(&repo, out.join("trees")).skipping(&out);
        let dir = tree.prepare(1).expect("prepare");
        assert!(dir.join("a.txt").exists());
        assert!(!dir.join("out").exists());

        let second = tree.prepare(2).expect("prepare");
        assert!(!second.join("out").exists());
        assert!(!second.join("out/trees/attempt-1").exists());
    }

    #[test]
    fn git_worktree_requires_a_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(GitWorkTree::new(temp.path(), Vec::new()).is_err());
    }
}
