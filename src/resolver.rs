//! Import specifier resolution.
//!
//! Relative specifiers (`./x`, `../x`) become absolute, normalized file paths.
//! Bare specifiers (`react`, `@scope/pkg`) are returned unchanged and act as
//! opaque File keys.

use std::path::{Component, Path, PathBuf};

/// Returns `true` for specifiers resolved against the importing file's directory.
pub fn is_relative_specifier(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// Resolve an import specifier as seen from `importing_file`.
///
/// If the joined path has no extension in `known_extensions`, `default_extension`
/// is appended (so `./utils.helper` becomes `utils.helper.ts`).
pub fn resolve_specifier(
    importing_file: &Path,
    specifier: &str,
    default_extension: &str,
    known_extensions: &[String],
) -> String {
    if !is_relative_specifier(specifier) {
        return specifier.to_string();
    }

    let base = importing_file.parent().unwrap_or_else(|| Path::new(""));
    let mut joined = normalize_path(&base.join(specifier));

    let has_known_ext = joined
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| known_extensions.iter().any(|k| k == ext))
        .unwrap_or(false);

    if !has_known_ext {
        let mut name = joined.as_os_str().to_os_string();
        name.push(".");
        name.push(default_extension);
        joined = PathBuf::from(name);
    }

    absolutize(&joined).to_string_lossy().to_string()
}

/// Normalize a path by resolving `.` and `..` components without requiring the path to exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else if !matches!(components.last(), Some(Component::RootDir)) {
                    components.push(component);
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize_path(&cwd.join(path)),
        Err(_) => path.to_path_buf(),
    }
}
