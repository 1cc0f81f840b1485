//! Preview list derived from the authored preview schema and the sandbox's
//! open ports.

use crate::model::{PreviewSchema, PreviewTarget};
use crate::observable::Observable;
use crate::sandbox::{PortEvent, PortEventKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewInfo {
    pub port: u16,
    pub title: Option<String>,
    pub pathname: Option<String>,
    pub ready: bool,
    pub base_url: Option<String>,
}

impl PreviewInfo {
    fn pending(target: PreviewTarget) -> Self {
        Self {
            port: target.port,
            title: target.title,
            pathname: target.pathname,
            ready: false,
            base_url: None,
        }
    }

    /// Full URL once the port is open.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        let base = self.base_url.as_deref()?.trim_end_matches('/');
        Some(match self.pathname.as_deref() {
            Some(path) if path.starts_with('/') => format!("{base}{path}"),
            Some(path) => format!("{base}/{path}"),
            None => base.to_string(),
        })
    }
}

#[derive(Clone, Debug, Default)]
enum Mode {
    Hidden,
    #[default]
    Auto,
    Listed(Vec<PreviewTarget>),
}

#[derive(Debug, Default)]
struct PreviewState {
    mode: Mode,
    open_ports: BTreeMap<u16, String>,
}

impl PreviewState {
    fn derive(&self) -> Vec<PreviewInfo> {
        match &self.mode {
            Mode::Hidden => Vec::new(),
            Mode::Auto => self
                .open_ports
                .iter()
                .map(|(port, url)| PreviewInfo {
                    port: *port,
                    title: None,
                    pathname: None,
                    ready: true,
                    base_url: Some(url.clone()),
                })
                .collect(),
            Mode::Listed(targets) => targets
                .iter()
                .cloned()
                .map(|target| {
                    let mut info = PreviewInfo::pending(target);
                    if let Some(url) = self.open_ports.get(&info.port) {
                        info.ready = true;
                        info.base_url = Some(url.clone());
                    }
                    info
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PreviewsController {
    state: Mutex<PreviewState>,
    previews: Observable<Vec<PreviewInfo>>,
}

impl PreviewsController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn previews(&self) -> &Observable<Vec<PreviewInfo>> {
        &self.previews
    }

    pub fn set_previews(&self, schema: Option<&PreviewSchema>) {
        let mode = match schema {
            Some(PreviewSchema::Enabled(false)) => Mode::Hidden,
            None | Some(PreviewSchema::Enabled(true)) => Mode::Auto,
            Some(PreviewSchema::List(inputs)) => {
                Mode::Listed(inputs.iter().filter_map(|input| input.to_target()).collect())
            }
        };
        let derived = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.mode = mode;
            state.derive()
        };
        self.previews.set_if_changed(derived);
    }

    pub fn on_port_event(&self, event: &PortEvent) {
        let derived = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match event.kind {
                PortEventKind::Open => {
                    state.open_ports.insert(event.port, event.url.clone());
                }
                PortEventKind::Close => {
                    state.open_ports.remove(&event.port);
                }
            }
            state.derive()
        };
        self.previews.set_if_changed(derived);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PreviewInput;

    fn open(port: u16) -> PortEvent {
        PortEvent {
            port,
            kind: PortEventKind::Open,
            url: format!("http://localhost:{port}"),
        }
    }

    #[test]
    fn listed_previews_become_ready_on_port_open() {
        let controller = PreviewsController::new();
        controller.set_previews(Some(&PreviewSchema::List(vec![PreviewInput::PortPath(
            "3000/about".into(),
        )])));
        assert!(!controller.previews().get()[0].ready);

        controller.on_port_event(&open(3000));
        let previews = controller.previews().get();
        assert!(previews[0].ready);
        assert_eq!(previews[0].url().as_deref(), Some("http://localhost:3000/about"));
    }

    #[test]
    fn auto_mode_tracks_open_ports() {
        let controller = PreviewsController::new();
        controller.on_port_event(&open(5173));
        assert_eq!(controller.previews().get().len(), 1);
        controller.on_port_event(&PortEvent {
            kind: PortEventKind::Close,
            ..open(5173)
        });
        assert!(controller.previews().get().is_empty());
    }

    #[test]
    fn hidden_previews_ignore_ports() {
        let controller = PreviewsController::new();
        controller.set_previews(Some(&PreviewSchema::Enabled(false)));
        controller.on_port_event(&open(3000));
        assert!(controller.previews().get().is_empty());
    }

    #[test]
    fn unrelated_port_does_not_notify() {
        let controller = PreviewsController::new();
        controller.set_previews(Some(&PreviewSchema::List(vec![PreviewInput::Port(3000)])));
        let rx = controller.previews().subscribe();
        controller.on_port_event(&open(8080));
        assert!(!rx.has_changed().unwrap_or(true));
    }
}
