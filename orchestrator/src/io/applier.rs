//! Apply a change set to a working tree.
//!
//! Operations run in declared order and stop at the first failure; earlier
//! operations stay applied. The retry loop discards the tree afterwards.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::core::errors::ApplyError;
use crate::core::path::normalize_relative;
use crate::core::types::{AppliedChange, ChangeAction, ChangeSet, FileChange};

/// What an apply call achieved before it stopped.
#[derive(Debug)]
pub struct ApplyReport {
    pub applied: Vec<AppliedChange>,
    pub error: Option<ApplyError>,
}

impl ApplyReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ChangeApplier {
    root: PathBuf,
}

impl ChangeApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Apply every change, stopping at the first error.
    #[instrument(skip_all, fields(root = %self.root.display(), changes = change_set.len()))]
    pub fn apply(&self, change_set: &ChangeSet) -> ApplyReport {
        let mut applied = Vec::with_capacity(change_set.len());
        for change in &change_set.changes {
            match self.apply_one(change) {
                Ok(done) => {
                    debug!(path = %done.path, action = %done.action, "applied change");
                    applied.push(done);
                }
                Err(err) => {
                    debug!(path = %change.path, err = %err, "change rejected");
                    return ApplyReport {
                        applied,
                        error: Some(err),
                    };
                }
            }
        }
        ApplyReport {
            applied,
            error: None,
        }
    }

    fn apply_one(&self, change: &FileChange) -> Result<AppliedChange, ApplyError> {
        let target = self.resolve(&change.path)?;
        let action = change.action;

        match action {
            ChangeAction::Create => {
                if fs::symlink_metadata(&target).is_ok() {
                    return Err(ApplyError::AlreadyExists {
                        path: change.path.clone(),
                    });
                }
                let content = change.content.clone().unwrap_or_default();
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
                        op: "create directory",
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                write_file(&target, &content)?;
                Ok(AppliedChange {
                    path: change.path.clone(),
                    action,
                    before: None,
                    after: Some(content),
                })
            }
            ChangeAction::Modify => {
                let before = read_existing(&target, change)?;
                let content = change.content.clone().unwrap_or_default();
                write_file(&target, &content)?;
                Ok(AppliedChange {
                    path: change.path.clone(),
                    action,
                    before: Some(before),
                    after: Some(content),
                })
            }
            ChangeAction::Delete => {
                let before = read_existing(&target, change)?;
                fs::remove_file(&target).map_err(|source| ApplyError::Io {
                    op: "remove",
                    path: target.clone(),
                    source,
                })?;
                Ok(AppliedChange {
                    path: change.path.clone(),
                    action,
                    before: Some(before),
                    after: None,
                })
            }
        }
    }

    /// Resolve a repository-relative path, rejecting anything that would land
    /// outside the root, lexically or through a symlinked ancestor.
    fn resolve(&self, raw: &str) -> Result<PathBuf, ApplyError> {
        let escape = || {
            warn!(target: "security", path = raw, root = %self.root.display(), "rejected path escaping repository root");
            ApplyError::PathEscape {
                path: raw.to_string(),
            }
        };

        let relative = normalize_relative(raw).ok_or_else(escape)?;
        let target = self.root.join(&relative);

        let root = self.root.canonicalize().map_err(|source| ApplyError::Io {
            op: "canonicalize",
            path: self.root.clone(),
            source,
        })?;
        // The deepest existing ancestor decides where the write really lands.
        let mut probe = target.as_path();
        let anchor = loop {
            match probe.canonicalize() {
                Ok(real) => break real,
                Err(err) if err.kind() == io::ErrorKind::NotFound => match probe.parent() {
                    Some(parent) => probe = parent,
                    None => return Err(escape()),
                },
                Err(source) => {
                    return Err(ApplyError::Io {
                        op: "canonicalize",
                        path: probe.to_path_buf(),
                        source,
                    });
                }
            }
        };
        if !anchor.starts_with(&root) {
            return Err(escape());
        }
        Ok(target)
    }
}

fn read_existing(target: &Path, change: &FileChange) -> Result<String, ApplyError> {
    let action = change.action.as_str().to_string();
    let meta = match fs::metadata(target) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ApplyError::NotFound {
                path: change.path.clone(),
                action,
            });
        }
        Err(source) => {
            return Err(ApplyError::Io {
                op: "stat",
                path: target.to_path_buf(),
                source,
            });
        }
    };
    if !meta.is_file() {
        return Err(ApplyError::NotAFile {
            path: change.path.clone(),
            action,
        });
    }
    let bytes = fs::read(target).map_err(|source| ApplyError::Io {
        op: "read",
        path: target.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_file(target: &Path, content: &str) -> Result<(), ApplyError> {
    fs::write(target, content).map_err(|source| ApplyError::Io {
        op: "write",
        path: target.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(changes: Vec<FileChange>) -> ChangeSet {
        ChangeSet {
            changes,
            explanation: String::new(),
        }
    }

    #[test]
    fn create_writes_exact_content_and_parents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let applier = ChangeApplier::new(temp.path());
        let report = applier.apply(&set(vec![FileChange::create("src/foo.txt", "hello")]));
        assert!(report.is_ok());
        assert_eq!(
            fs::read_to_string(temp.path().join("src/foo.txt")).expect("read"),
            "hello"
        );
        assert_eq!(report.applied[0].after.as_deref(), Some("hello"));
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), "old").expect("seed");
        let report =
            ChangeApplier::new(temp.path()).apply(&set(vec![FileChange::create("a.txt", "new")]));
        assert!(matches!(report.error, Some(ApplyError::AlreadyExists { .. })));
        assert_eq!(
            fs::read_to_string(temp.path().join("a.txt")).expect("read"),
            "old"
        );
    }

    #[test]
    fn modify_records_before_and_after() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), "old").expect("seed");
        let report =
            ChangeApplier::new(temp.path()).apply(&set(vec![FileChange::modify("a.txt", "new")]));
        assert!(report.is_ok());
        assert_eq!(report.applied[0].before.as_deref(), Some("old"));
        assert_eq!(
            fs::read_to_string(temp.path().join("a.txt")).expect("read"),
            "new"
        );
    }

    #[test]
    fn modify_and_delete_require_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let applier = ChangeApplier::new(temp.path());
        for change in [FileChange::modify("nope.txt", "x"), FileChange::delete("nope.txt")] {
            let report = applier.apply(&set(vec![change]));
            assert!(matches!(report.error, Some(ApplyError::NotFound { .. })));
        }
    }

    #[test]
    fn delete_never_removes_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("dir/inner")).expect("mkdir");
        let report = ChangeApplier::new(temp.path()).apply(&set(vec![FileChange::delete("dir")]));
        assert!(matches!(report.error, Some(ApplyError::NotAFile { .. })));
        assert!(temp.path().join("dir/inner").is_dir());
    }

    #[test]
    fn escaping_paths_are_rejected_without_touching_the_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).expect("mkdir");
        let applier = ChangeApplier::new(&root);
        for path in ["../outside.txt", "/tmp/abs.txt", "src/../../x.txt"] {
            let report = applier.apply(&set(vec![FileChange::create(path, "x")]));
            assert!(
                report.error.as_ref().is_some_and(ApplyError::is_path_escape),
                "{path} should escape"
            );
            assert!(report.applied.is_empty());
        }
        assert!(!temp.path().join("outside.txt").exists());
        assert_eq!(fs::read_dir(&root).expect("read_dir").count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_cannot_escape() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("repo");
        let outside = temp.path().join("outside");
        fs::create_dir_all(&root).expect("mkdir");
        fs::create_dir_all(&outside).expect("mkdir");
        std::os::unix::fs::symlink(&outside, root.join("link")).expect("symlink");

        let report =
            ChangeApplier::new(&root).apply(&set(vec![FileChange::create("link/evil.txt", "x")]));
        assert!(report.error.as_ref().is_some_and(ApplyError::is_path_escape));
        assert!(!outside.join("evil.txt").exists());
    }

    #[test]
    fn failure_keeps_earlier_operations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = ChangeApplier::new(temp.path()).apply(&set(vec![
            FileChange::create("first.txt", "1"),
            FileChange::modify("missing.txt", "2"),
            FileChange::create("third.txt", "3"),
        ]));
        assert_eq!(report.applied.len(), 1);
        assert!(matches!(report.error, Some(ApplyError::NotFound { .. })));
        assert!(temp.path().join("first.txt").exists());
        assert!(!temp.path().join("third.txt").exists());
    }
}
