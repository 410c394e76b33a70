//! Resource path classification.
//!
//! # Design
//! - Pure string handling; no IO and no failure modes.
//! - A trailing separator (or an empty path) addresses a folder, anything else a file.

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Kind of location a resource path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// The service root (empty path).
    Root,
    /// A folder (path ends with the separator).
    Folder,
    /// A single file.
    File,
}

impl PathKind {
    /// Whether the path addresses a container (root or folder).
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Root | Self::Folder)
    }
}

/// Classified resource path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Classification of the path.
    pub kind: PathKind,
    /// Path relative to the service root without a leading separator.
    pub path: String,
    /// Final non-empty segment; empty for the root.
    pub leaf: String,
}

/// Classify a raw resource path as root, folder, or file.
#[must_use]
pub fn resolve(raw: &str) -> ResolvedPath {
    let path = raw.trim_start_matches(SEPARATOR).to_string();
    if path.is_empty() {
        return ResolvedPath {
            kind: PathKind::Root,
            path,
            leaf: String::new(),
        };
    }
    let kind = if path.ends_with(SEPARATOR) {
        PathKind::Folder
    } else {
        PathKind::File
    };
    let leaf = leaf_name(&path).to_string();
    ResolvedPath { kind, path, leaf }
}

/// Last non-empty segment of a path.
#[must_use]
pub fn leaf_name(path: &str) -> &str {
    path.trim_end_matches(SEPARATOR)
        .rsplit(SEPARATOR)
        .next()
        .unwrap_or_default()
}

/// Path of a child folder, always ending with the separator.
#[must_use]
pub fn folder_path(base: &str, name: &str) -> String {
    let name = name.trim_matches(SEPARATOR);
    let mut joined = container(base);
    if !name.is_empty() {
        joined.push_str(name);
        joined.push(SEPARATOR);
    }
    joined
}

/// Path of a child file.
#[must_use]
pub fn file_path(base: &str, name: &str) -> String {
    let mut joined = container(base);
    joined.push_str(name.trim_start_matches(SEPARATOR));
    joined
}

/// Folder containing a path, with a trailing separator; empty for top-level entries.
#[must_use]
pub fn parent_folder(path: &str) -> String {
    let trimmed = path.trim_end_matches(SEPARATOR);
    trimmed
        .rfind(SEPARATOR)
        .map_or_else(String::new, |idx| trimmed[..=idx].to_string())
}

/// Normalize a folder path: no leading separator, exactly one trailing separator.
#[must_use]
pub fn container(path: &str) -> String {
    let trimmed = path.trim_matches(SEPARATOR);
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}{SEPARATOR}")
    }
}

/// Whether `path` lies strictly beneath the folder `folder`.
#[must_use]
pub fn is_within(folder: &str, path: &str) -> bool {
    let folder = container(folder);
    path != folder && path.starts_with(&folder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_and_root_paths_classify_by_trailing_separator() {
        let root = resolve("");
        assert_eq!(root.kind, PathKind::Root);
        assert_eq!(root.leaf, "");
        assert_eq!(resolve("/").kind, PathKind::Root);

        for raw in ["docs/", "a/b/c/", "/docs/"] {
            let resolved = resolve(raw);
            assert_eq!(resolved.kind, PathKind::Folder, "{raw}");
            assert!(resolved.kind.is_container());
        }
        assert_eq!(resolve("a/b/c/").leaf, "c");
    }

    #[test]
    fn file_paths_take_leaf_after_last_separator() {
        for (raw, leaf) in [
            ("a.txt", "a.txt"),
            ("docs/a.txt", "a.txt"),
            ("/x/y/z.bin", "z.bin"),
            ("noext", "noext"),
        ] {
            let resolved = resolve(raw);
            assert_eq!(resolved.kind, PathKind::File, "{raw}");
            assert_eq!(resolved.leaf, leaf);
        }
        assert_eq!(resolve("/x/y/z.bin").path, "x/y/z.bin");
    }

    #[test]
    fn join_helpers_build_child_paths() {
        assert_eq!(folder_path("", "docs"), "docs/");
        assert_eq!(folder_path("a/", "b"), "a/b/");
        assert_eq!(folder_path("a", "b/"), "a/b/");
        assert_eq!(file_path("", "a.txt"), "a.txt");
        assert_eq!(file_path("docs/", "a.txt"), "docs/a.txt");
        assert_eq!(parent_folder("docs/a.txt"), "docs/");
        assert_eq!(parent_folder("docs/sub/"), "docs/");
        assert_eq!(parent_folder("a.txt"), "");
        assert_eq!(container("/docs"), "docs/");
    }

    #[test]
    fn within_excludes_the_folder_itself() {
        assert!(is_within("docs/", "docs/a.txt"));
        assert!(is_within("", "docs/"));
        assert!(!is_within("docs/", "docs/"));
        assert!(!is_within("docs/", "docsx/a.txt"));
    }
}
