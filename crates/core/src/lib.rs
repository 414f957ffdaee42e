//! Screen-watching auto clicker: finds a template image on screen and clicks it
//! inside a single named target window.

pub mod capture;
pub mod clicker;
pub mod debug;
pub mod logger;
pub mod matcher;
pub mod orchestrator;
pub mod platform;
pub mod settings;
pub mod sleep;
pub mod types;
pub mod window;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
