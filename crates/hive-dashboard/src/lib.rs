pub mod agent_state;
pub mod app;
pub mod daemon;
pub mod groups;
pub mod pane_view;
pub mod refresh;
pub mod selection;
pub mod status;
pub mod ui;
