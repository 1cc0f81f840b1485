use crate::model::{FileContent, Files};
use serde_json::Value;

/// Tracks the dependency manifest so setup commands rerun when it changes.
///
/// Only the first path ending in `/package.json` seen per update is
/// considered; single-app templates are the supported case.
#[derive(Clone, Debug, Default)]
pub(crate) struct PackageJsonTracker {
    path: Option<String>,
    content: Option<String>,
    dirty: bool,
}

impl PackageJsonTracker {
    pub(crate) fn observe(&mut self, files: &Files) {
        let Some((path, content)) = files.iter().find(|(path, _)| path.ends_with("/package.json"))
        else {
            return;
        };
        let text = content.as_text().map(str::to_string);
        if self.content == text && self.path.as_deref() == Some(path.as_str()) {
            return;
        }
        self.path = Some(path.clone());
        self.content = text;
        self.dirty = true;
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

/// Add `stackblitz.startCommand` to a manifest that lacks one.
///
/// Returns `None` when the manifest is not a JSON object or already carries
/// a start command.
pub(crate) fn inject_start_command(manifest: &str, start_command: &str) -> Option<String> {
    let mut value: Value = serde_json::from_str(manifest).ok()?;
    let root = value.as_object_mut()?;
    let stackblitz = root
        .entry("stackblitz")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let stackblitz = stackblitz.as_object_mut()?;
    if stackblitz.contains_key("startCommand") {
        return None;
    }
    stackblitz.insert("startCommand".to_string(), Value::String(start_command.to_string()));
    serde_json::to_string_pretty(&value).ok()
}

/// Exported project: relative paths, template first, lesson files on top.
pub(crate) fn build_snapshot(
    merged: Files,
    package_json: Option<&str>,
    start_command: &str,
) -> Files {
    let mut snapshot: Files = merged
        .into_iter()
        .map(|(path, content)| (path.trim_start_matches('/').to_string(), content))
        .collect();
    let Some(manifest_path) = package_json.map(|path| path.trim_start_matches('/')) else {
        return snapshot;
    };
    if start_command.is_empty() {
        return snapshot;
    }
    let injected = match snapshot.get(manifest_path) {
        Some(FileContent::Text(text)) => inject_start_command(text, start_command),
        _ => None,
    };
    if let Some(updated) = injected {
        snapshot.insert(manifest_path.to_string(), FileContent::Text(updated));
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_flags_first_manifest_change() {
        let mut tracker = PackageJsonTracker::default();
        let mut files = Files::new();
        files.insert("/package.json".into(), "{}".into());
        tracker.observe(&files);
        assert!(tracker.is_dirty());
        tracker.clear();
        tracker.observe(&files);
        assert!(!tracker.is_dirty());
        files.insert("/package.json".into(), r#"{"name":"x"}"#.into());
        tracker.observe(&files);
        assert!(tracker.is_dirty());
    }

    #[test]
    fn start_command_is_injected_when_absent() {
        let out = inject_start_command(r#"{"name":"app"}"#, "npm install && npm start")
            .and_then(|text| serde_json::from_str::<Value>(&text).ok());
        assert_eq!(
            out.as_ref().and_then(|v| v["stackblitz"]["startCommand"].as_str()),
            Some("npm install && npm start")
        );
    }

    #[test]
    fn existing_start_command_is_kept() {
        let manifest = r#"{"stackblitz":{"startCommand":"custom"}}"#;
        assert_eq!(inject_start_command(manifest, "npm start"), None);
        assert_eq!(inject_start_command("not json", "npm start"), None);
    }
}
