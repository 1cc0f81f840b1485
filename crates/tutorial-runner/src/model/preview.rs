use serde::{Deserialize, Serialize};

/// Preview section of lesson data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreviewSchema {
    /// `false` hides previews, `true` shows one per opened port.
    Enabled(bool),
    List(Vec<PreviewInput>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreviewInput {
    /// `3000`
    Port(u16),
    /// `"3000/about"`
    PortPath(String),
    /// `[3000, "Home"]`
    Titled(u16, String),
    /// `{ port: 3000, title: "Home", pathname: "/about" }`
    Descriptor {
        port: u16,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        pathname: Option<String>,
    },
}

/// Authored preview after normalization, before any port is known to be open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreviewTarget {
    pub port: u16,
    pub title: Option<String>,
    pub pathname: Option<String>,
}

impl PreviewInput {
    /// Returns `None` for a malformed `"port/path"` string.
    #[must_use]
    pub fn to_target(&self) -> Option<PreviewTarget> {
        match self {
            Self::Port(port) => Some(PreviewTarget {
                port: *port,
                title: None,
                pathname: None,
            }),
            Self::PortPath(raw) => {
                let (port, path) = match raw.split_once('/') {
                    Some((port, path)) => (port, Some(format!("/{path}"))),
                    None => (raw.as_str(), None),
                };
                let port = port.trim().parse().ok()?;
                Some(PreviewTarget {
                    port,
                    title: None,
                    pathname: path,
                })
            }
            Self::Titled(port, title) => Some(PreviewTarget {
                port: *port,
                title: Some(title.clone()),
                pathname: None,
            }),
            Self::Descriptor {
                port,
                title,
                pathname,
            } => Some(PreviewTarget {
                port: *port,
                title: title.clone(),
                pathname: pathname.clone(),
            }),
        }
    }
}
