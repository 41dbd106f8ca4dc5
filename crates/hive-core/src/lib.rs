pub mod ansi;
pub mod config;
pub mod daemon_ipc;
pub mod model;
pub mod paths;

pub use model::{
    ColorProfile, PaneItem, PaneSnapshot, PaneStatus, PaneViewKey, PaneViewRequest,
    PaneViewResponse, ProjectGroup, SessionItem, SessionSnapshot, SessionStatus, StateSnapshot,
    ViewMode,
};
