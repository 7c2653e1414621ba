//! Lexical helpers for repository-relative paths.

use std::path::{Component, Path, PathBuf};

/// Normalise a repository-relative path lexically.
///
/// Drops `.` segments and empty segments. Returns `None` when the path is
/// absolute, carries a drive/root prefix, contains `..`, or is empty after
/// normalisation.
pub fn normalize_relative(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return None;
    }
    if has_windows_drive(trimmed) {
        return None;
    }

    let mut out = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => {
                if part.to_string_lossy().contains('\\') {
                    // `a\..\b` would traverse on Windows even though it is one component here.
                    let segs = part.to_string_lossy().into_owned();
                    if segs.split('\\').any(|seg| seg == "..") {
                        return None;
                    }
                }
                out.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if out.as_os_str().is_empty() {
        return None;
    }
    Some(out)
}

/// Stable identity key for duplicate detection: normalised path with `/` separators,
/// or the trimmed raw text when the path does not normalise.
pub fn identity_key(raw: &str) -> String {
    match normalize_relative(raw) {
        Some(path) => path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        None => raw.trim().to_string(),
    }
}

fn has_windows_drive(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
