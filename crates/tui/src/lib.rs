//! Terminal front end for the detection loop.

mod app;
mod confirm;
pub mod event;
pub mod ui;

pub use app::App;
pub use confirm::{ConfirmDialog, PendingAction};
