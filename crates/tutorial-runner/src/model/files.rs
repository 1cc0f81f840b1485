use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Flat snapshot of a file set keyed by absolute-style path (`/src/index.js`).
pub type Files = BTreeMap<String, FileContent>;

/// Content of a single file: UTF-8 text or raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl From<&str> for FileContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FileContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

const BASE64_ENCODING: &str = "base64";

#[derive(Serialize, Deserialize)]
struct EncodedBinary {
    encoding: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Encoded(EncodedBinary),
}

impl Serialize for FileContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Binary(bytes) => EncodedBinary {
                encoding: BASE64_ENCODING.to_string(),
                content: BASE64_STD.encode(bytes),
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FileContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match WireContent::deserialize(deserializer)? {
            WireContent::Text(text) => Ok(Self::Text(text)),
            WireContent::Encoded(encoded) => {
                if encoded.encoding != BASE64_ENCODING {
                    return Err(serde::de::Error::custom(format!(
                        "unsupported file encoding '{}'",
                        encoded.encoding
                    )));
                }
                BASE64_STD
                    .decode(encoded.content.as_bytes())
                    .map(Self::Binary)
                    .map_err(serde::de::Error::custom)
            }
        }
    }
}

/// Hierarchical tree in the shape the sandbox `mount` call expects.
pub type FileSystemTree = BTreeMap<String, FileNode>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileNode {
    File { contents: FileContent },
    Directory { directory: FileSystemTree },
}

/// Minimal sandbox mutation between two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilesDiff {
    pub removed: Vec<String>,
    pub added_or_modified: Files,
}

impl FilesDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added_or_modified.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_serializes_as_bare_string() {
        let value = serde_json::to_value(FileContent::from("hi")).ok();
        assert_eq!(value, Some(serde_json::json!("hi")));
    }

    #[test]
    fn binary_uses_base64_envelope() {
        let content = FileContent::Binary(vec![0, 159, 146, 150]);
        let json = serde_json::to_value(&content).unwrap_or_default();
        assert_eq!(json["encoding"], "base64");
        let back: Option<FileContent> = serde_json::from_value(json).ok();
        assert_eq!(back, Some(content));
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let json = serde_json::json!({ "encoding": "hex", "content": "00" });
        assert!(serde_json::from_value::<FileContent>(json).is_err());
    }

    #[test]
    fn tree_nodes_use_mount_format() {
        let mut tree = FileSystemTree::new();
        tree.insert(
            "a.txt".to_string(),
            FileNode::File {
                contents: "1".into(),
            },
        );
        let json = serde_json::to_value(&tree).unwrap_or_default();
        assert_eq!(json, serde_json::json!({ "a.txt": { "file": { "contents": "1" } } }));
    }
}
