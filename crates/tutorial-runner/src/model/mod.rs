pub mod commands;
pub mod config;
pub mod files;
pub mod ids;
pub mod lesson;
pub mod preview;
pub mod terminal;

pub use commands::*;
pub use config::*;
pub use files::*;
pub use ids::{PanelId, RunId};
pub use lesson::*;
pub use preview::*;
pub use terminal::*;
