//! Conversions between flat [`Files`] snapshots and the sandbox mount tree.
//!
//! Everything here is pure: no sandbox access, no shared state.

use crate::model::{FileContent, FileNode, FileSystemTree, Files, FilesDiff};

/// Build the nested tree the sandbox `mount` call expects.
///
/// Empty path segments are ignored, so `/a//b.txt` and `a/b.txt` land on the
/// same node. A later entry wins if a file and a folder collide on one name.
#[must_use]
pub fn to_file_tree(files: &Files) -> FileSystemTree {
    let mut root = FileSystemTree::new();
    for (path, content) in files {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        insert_path(&mut root, &segments, content);
    }
    root
}

fn insert_path(tree: &mut FileSystemTree, segments: &[&str], content: &FileContent) {
    match segments {
        [] => {}
        [file_name] => {
            tree.insert(
                (*file_name).to_string(),
                FileNode::File {
                    contents: content.clone(),
                },
            );
        }
        [folder, rest @ ..] => {
            let node = tree
                .entry((*folder).to_string())
                .or_insert_with(empty_directory);
            if matches!(node, FileNode::File { .. }) {
                *node = empty_directory();
            }
            if let FileNode::Directory { directory } = node {
                insert_path(directory, rest, content);
            }
        }
    }
}

fn empty_directory() -> FileNode {
    FileNode::Directory {
        directory: FileSystemTree::new(),
    }
}

/// Flatten a mount tree back into absolute-style paths.
#[must_use]
pub fn flatten_file_tree(tree: &FileSystemTree) -> Files {
    let mut files = Files::new();
    flatten_into(tree, "", &mut files);
    files
}

fn flatten_into(tree: &FileSystemTree, prefix: &str, files: &mut Files) {
    for (name, node) in tree {
        let path = format!("{prefix}/{name}");
        match node {
            FileNode::File { contents } => {
                files.insert(path, contents.clone());
            }
            FileNode::Directory { directory } => flatten_into(directory, &path, files),
        }
    }
}

/// Compute what must be removed and what must be (re)written to go from
/// `previous` to `next`.
#[must_use]
pub fn diff_files(previous: &Files, next: &Files) -> FilesDiff {
    let removed = previous
        .keys()
        .filter(|path| !next.contains_key(*path))
        .cloned()
        .collect();

    let added_or_modified = next
        .iter()
        .filter(|(path, content)| previous.get(*path) != Some(*content))
        .map(|(path, content)| (path.clone(), content.clone()))
        .collect();

    FilesDiff {
        removed,
        added_or_modified,
    }
}

/// Overlay `files` on top of `template`.
#[must_use]
pub fn merge_files(template: Option<&Files>, files: Option<&Files>) -> Files {
    let mut merged = template.cloned().unwrap_or_default();
    if let Some(files) = files {
        merged.extend(files.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Strip the leading `/` used by [`Files`] keys.
#[must_use]
pub fn relative_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Normalize a sandbox-relative name (`src/a.js`, `./src/a.js`) to a [`Files`] key.
#[must_use]
pub fn absolute_path(name: &str) -> String {
    let trimmed = name.trim_start_matches("./").trim_start_matches('/');
    format!("/{trimmed}")
}

/// Parent folder of an absolute-style path, or `None` at the root.
#[must_use]
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => None,
        Some(index) => trimmed.get(..index),
    }
}

/// Content as UTF-8 if possible, binary otherwise.
#[must_use]
pub fn content_from_bytes(bytes: Vec<u8>) -> FileContent {
    match String::from_utf8(bytes) {
        Ok(text) => FileContent::Text(text),
        Err(err) => FileContent::Binary(err.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> Files {
        entries
            .iter()
            .map(|(path, content)| ((*path).to_string(), FileContent::from(*content)))
            .collect()
    }

    #[test]
    fn diff_of_identical_maps_is_empty() {
        let a = files(&[("/a.txt", "1"), ("/src/b.js", "2")]);
        assert!(diff_files(&a, &a).is_empty());
    }

    #[test]
    fn changed_file_is_modified_not_removed() {
        let before = files(&[("/a.txt", "1")]);
        let after = files(&[("/a.txt", "2"), ("/b.txt", "x")]);
        let diff = diff_files(&before, &after);
        assert!(diff.removed.is_empty());
        assert_eq!(diff.added_or_modified, after);
    }

    #[test]
    fn diff_partitions_keys() {
        let before = files(&[("/keep", "k"), ("/gone", "g"), ("/edit", "1")]);
        let after = files(&[("/keep", "k"), ("/edit", "2"), ("/new", "n")]);
        let diff = diff_files(&before, &after);
        assert_eq!(diff.removed, vec!["/gone".to_string()]);
        assert_eq!(diff.added_or_modified, files(&[("/edit", "2"), ("/new", "n")]));
    }

    #[test]
    fn binary_change_is_detected() {
        let mut before = Files::new();
        before.insert("/img.png".into(), FileContent::Binary(vec![1, 2]));
        let mut after = Files::new();
        after.insert("/img.png".into(), FileContent::Binary(vec![1, 3]));
        assert_eq!(diff_files(&before, &after).added_or_modified.len(), 1);
    }

    #[test]
    fn tree_nests_directories() {
        let tree = to_file_tree(&files(&[("/src/lib/a.js", "a"), ("/index.html", "i")]));
        let Some(FileNode::Directory { directory: src }) = tree.get("src") else {
            panic!("src should be a directory");
        };
        assert!(matches!(src.get("lib"), Some(FileNode::Directory { .. })));
        assert!(matches!(tree.get("index.html"), Some(FileNode::File { .. })));
    }

    #[test]
    fn tree_round_trips() {
        let input = files(&[
            ("/a.txt", "1"),
            ("/src/index.js", "2"),
            ("/src/components/App.jsx", "3"),
            ("/src/components/nested/deep/x.css", "4"),
        ]);
        assert_eq!(flatten_file_tree(&to_file_tree(&input)), input);
    }

    #[test]
    fn merge_prefers_lesson_files() {
        let template = files(&[("/a", "template"), ("/t", "t")]);
        let lesson = files(&[("/a", "lesson")]);
        let merged = merge_files(Some(&template), Some(&lesson));
        assert_eq!(merged, files(&[("/a", "lesson"), ("/t", "t")]));
    }

    #[test]
    fn path_helpers() {
        assert_eq!(absolute_path("./src/a.js"), "/src/a.js");
        assert_eq!(absolute_path("src/a.js"), "/src/a.js");
        assert_eq!(relative_path("/src/a.js"), "src/a.js");
        assert_eq!(parent_path("/src/a.js"), Some("/src"));
        assert_eq!(parent_path("/a.js"), None);
    }
}
