use std::path::{Component, Path, PathBuf};

pub fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

pub fn expand_home(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    if trimmed == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from(trimmed));
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(trimmed)
}

/// Expands `~`, anchors relative paths at the working directory and removes
/// `.`/`..` components lexically. Empty input stays empty.
pub fn normalize_path(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let expanded = expand_home(raw);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(expanded)
    };

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    let rendered = cleaned.to_string_lossy().to_string();
    if rendered.is_empty() {
        "/".to_string()
    } else {
        rendered
    }
}

/// Stable project identity: the normalized path, or the lower-cased name when
/// no path is known.
pub fn project_key(path: &str, name: &str) -> String {
    let normalized = normalize_path(path);
    if !normalized.is_empty() {
        return normalized;
    }
    name.trim().to_lowercase()
}

pub fn base_name(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
}
