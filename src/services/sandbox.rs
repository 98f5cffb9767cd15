//! Path sandbox
//!
//! Resolution is pure path arithmetic: a path that does not exist yet (a
//! file about to be created under new directories) resolves the same way
//! as an existing one. Only `is_symlink`, `ensure_real_parent` and
//! `missing_parents` look at the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};

/// Lexically normalize a path, resolving `.` and `..` without following
/// symlinks. Returns `None` when `..` climbs above the start of the path.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }

    Some(out)
}

/// Strip leading separators so the path is always treated as relative.
fn strip_leading_separators(relative_path: &str) -> &str {
    relative_path.trim_start_matches(['/', '\\'])
}

/// Resolve `relative_path` under `root`.
///
/// Fails with `PathViolation` unless the result is `root` itself or lies
/// beneath it.
pub fn resolve(root: &Path, relative_path: &str) -> Result<PathBuf> {
    let root = normalize(root).ok_or_else(|| EngineError::PathViolation(root.display().to_string()))?;
    let relative = strip_leading_separators(relative_path).replace('\\', "/");

    let relative = Path::new(&relative);
    if relative.has_root() {
        return Err(EngineError::PathViolation(relative_path.to_string()));
    }

    let candidate = normalize(&root.join(relative))
        .ok_or_else(|| EngineError::PathViolation(relative_path.to_string()))?;

    if candidate.starts_with(&root) {
        Ok(candidate)
    } else {
        Err(EngineError::PathViolation(relative_path.to_string()))
    }
}

/// Resolve a path that must name a file strictly inside `root`.
pub fn resolve_file(root: &Path, relative_path: &str) -> Result<PathBuf> {
    let resolved = resolve(root, relative_path)?;
    let root = normalize(root).unwrap_or_else(|| root.to_path_buf());
    if resolved == root {
        return Err(EngineError::PathViolation(relative_path.to_string()));
    }
    Ok(resolved)
}

/// The root-relative form of a sandboxed path, with `/` separators.
pub fn relative_key(root: &Path, relative_path: &str) -> Result<String> {
    let resolved = resolve_file(root, relative_path)?;
    let root = normalize(root).unwrap_or_else(|| root.to_path_buf());
    let relative = resolved
        .strip_prefix(&root)
        .map_err(|_| EngineError::PathViolation(relative_path.to_string()))?;

    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Whether `candidate` is `root` or lies beneath it.
pub fn is_inside(root: &Path, candidate: &Path) -> bool {
    match (normalize(root), normalize(candidate)) {
        (Some(root), Some(candidate)) => candidate.starts_with(root),
        _ => false,
    }
}

/// Whether `path` itself is a symbolic link, without following it.
pub fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

/// Fail with `PathViolation` when the nearest existing ancestor of `target`
/// resolves, through symlinks, to somewhere outside `root`.
pub fn ensure_real_parent(root: &Path, target: &Path, relative_path: &str) -> Result<()> {
    let Some(existing) = target.ancestors().skip(1).find(|a| a.exists()) else {
        return Ok(());
    };
    let canonical_root = std::fs::canonicalize(root)?;
    let canonical = std::fs::canonicalize(existing)?;
    if is_inside(&canonical_root, &canonical) {
        Ok(())
    } else {
        Err(EngineError::PathViolation(relative_path.to_string()))
    }
}

/// Directories between `root` and `target` that do not exist yet, deepest
/// first, as root-relative keys.
pub fn missing_parents(root: &Path, target: &Path) -> Vec<String> {
    let root = normalize(root).unwrap_or_else(|| root.to_path_buf());
    target
        .ancestors()
        .skip(1)
        .take_while(|dir| *dir != root && dir.starts_with(&root))
        .filter(|dir| !dir.exists() && !is_symlink(dir))
        .filter_map(|dir| dir.strip_prefix(&root).ok())
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect()
}

/// Whether either path contains the other.
pub fn overlaps(a: &Path, b: &Path) -> bool {
    is_inside(a, b) || is_inside(b, a)
}
