use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

/// Collapses `.` and `..` without touching the filesystem.
/// A `..` that would climb above the root is dropped, like `os.path.normpath` on an absolute path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Lexically absolute version of `path`, relative paths being taken from the current directory.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let abs = std::path::absolute(path)
        .with_context(|| format!("Failed to resolve absolute path for {}", path.display()))?;
    Ok(normalize(&abs))
}

/// Raw path text as written in a project file: both separators are accepted.
pub fn from_raw(raw: &str) -> PathBuf {
    PathBuf::from(raw.replace('\\', "/"))
}

/// Joins the components of a relative path with `/`, which is what both output formats use.
/// An empty path renders as `.`.
pub fn to_slash(rel: &Path) -> String {
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// `path` relative to `base` when it lies inside it (the empty path when equal).
pub fn relative_to<'a>(path: &'a Path, base: &Path) -> Option<&'a Path> {
    path.strip_prefix(base).ok()
}
