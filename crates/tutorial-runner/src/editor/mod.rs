//! Editor-facing document store.
//!
//! Holds the documents and folders shown in the editor and file tree. The
//! runner's filesystem watcher pushes out-of-band sandbox changes in here.

use crate::files::parent_path;
use crate::model::{FileContent, Files};
use crate::observable::Observable;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditorDocument {
    pub content: FileContent,
    /// Content is being read from the sandbox.
    pub loading: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditorEntry {
    File(EditorDocument),
    Folder,
}

pub type EditorEntries = BTreeMap<String, EditorEntry>;

#[derive(Debug, Default)]
pub struct EditorStore {
    entries: Observable<EditorEntries>,
    selected: Observable<Option<String>>,
}

fn insert_ancestors(entries: &mut EditorEntries, path: &str) -> bool {
    let mut changed = false;
    let mut current = parent_path(path);
    while let Some(folder) = current {
        if !entries.contains_key(folder) {
            entries.insert(folder.to_string(), EditorEntry::Folder);
            changed = true;
        }
        current = parent_path(folder);
    }
    changed
}

impl EditorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> &Observable<EditorEntries> {
        &self.entries
    }

    #[must_use]
    pub fn selected(&self) -> &Observable<Option<String>> {
        &self.selected
    }

    /// Replace every entry with `files` and the folders containing them.
    pub fn set_documents(&self, files: &Files) {
        let mut entries = EditorEntries::new();
        for (path, content) in files {
            insert_ancestors(&mut entries, path);
            entries.insert(
                path.clone(),
                EditorEntry::File(EditorDocument {
                    content: content.clone(),
                    loading: false,
                }),
            );
        }
        self.entries.set(entries);
    }

    /// Update a tracked document. Returns `false` if `path` is not a tracked
    /// file or the content is unchanged.
    pub fn update_document(&self, path: &str, content: FileContent) -> bool {
        self.entries.update_if(|entries| match entries.get_mut(path) {
            Some(EditorEntry::File(doc)) if doc.content != content || doc.loading => {
                doc.content = content;
                doc.loading = false;
                true
            }
            _ => false,
        })
    }

    /// Add a file; without content it is marked as loading.
    pub fn add_file(&self, path: &str, content: Option<FileContent>) {
        self.entries.update(|entries| {
            insert_ancestors(entries, path);
            let loading = content.is_none();
            entries.insert(
                path.to_string(),
                EditorEntry::File(EditorDocument {
                    content: content.unwrap_or_else(|| FileContent::Text(String::new())),
                    loading,
                }),
            );
        });
    }

    pub fn add_folder(&self, path: &str) {
        self.entries.update_if(|entries| {
            let mut changed = insert_ancestors(entries, path);
            if !entries.contains_key(path) {
                entries.insert(path.to_string(), EditorEntry::Folder);
                changed = true;
            }
            changed
        });
    }

    /// Remove an entry and, for folders, everything below it.
    pub fn delete_entry(&self, path: &str) -> bool {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let removed = self.entries.update_if(|entries| {
            let before = entries.len();
            entries.retain(|key, _| key != path && !key.starts_with(&prefix));
            entries.len() != before
        });
        if removed {
            self.selected.update_if(|selected| match selected {
                Some(current) if current == path || current.starts_with(&prefix) => {
                    *selected = None;
                    true
                }
                _ => false,
            });
        }
        removed
    }

    #[must_use]
    pub fn tracks_file(&self, path: &str) -> bool {
        self.entries
            .with(|entries| matches!(entries.get(path), Some(EditorEntry::File(_))))
    }

    #[must_use]
    pub fn has_entry(&self, path: &str) -> bool {
        self.entries.with(|entries| entries.contains_key(path))
    }

    #[must_use]
    pub fn document(&self, path: &str) -> Option<EditorDocument> {
        self.entries.with(|entries| match entries.get(path) {
            Some(EditorEntry::File(doc)) => Some(doc.clone()),
            _ => None,
        })
    }

    /// Current file contents, folders excluded.
    #[must_use]
    pub fn documents(&self) -> Files {
        self.entries.with(|entries| {
            entries
                .iter()
                .filter_map(|(path, entry)| match entry {
                    EditorEntry::File(doc) => Some((path.clone(), doc.content.clone())),
                    EditorEntry::Folder => None,
                })
                .collect()
        })
    }

    /// Select a tracked file; unknown paths are ignored.
    pub fn select(&self, path: Option<&str>) {
        match path {
            Some(path) if self.tracks_file(path) => {
                self.selected.set_if_changed(Some(path.to_string()));
            }
            Some(_) => {}
            None => {
                self.selected.set_if_changed(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EditorStore {
        let store = EditorStore::new();
        let mut files = Files::new();
        files.insert("/src/index.js".into(), "console.log(1)".into());
        files.insert("/package.json".into(), "{}".into());
        store.set_documents(&files);
        store
    }

    #[test]
    fn documents_get_folder_entries() {
        let store = store();
        assert!(store.has_entry("/src"));
        assert!(store.tracks_file("/src/index.js"));
        assert!(!store.tracks_file("/src"));
        assert_eq!(store.documents().len(), 2);
    }

    #[test]
    fn add_file_synthesizes_ancestors() {
        let store = store();
        store.add_file("/a/b/c.txt", None);
        assert!(store.has_entry("/a"));
        assert!(store.has_entry("/a/b"));
        assert_eq!(store.document("/a/b/c.txt").map(|d| d.loading), Some(true));
        assert!(store.update_document("/a/b/c.txt", "hi".into()));
        assert_eq!(store.document("/a/b/c.txt").map(|d| d.loading), Some(false));
    }

    #[test]
    fn delete_folder_removes_descendants() {
        let store = store();
        store.select(Some("/src/index.js"));
        assert!(store.delete_entry("/src"));
        assert!(!store.has_entry("/src/index.js"));
        assert_eq!(store.selected().get(), None);
        assert!(!store.delete_entry("/missing"));
    }

    #[test]
    fn unchanged_update_is_ignored() {
        let store = store();
        assert!(!store.update_document("/package.json", "{}".into()));
        assert!(!store.update_document("/untracked", "x".into()));
    }
}
