//! Shared helpers.
//!
//! - `gate`: the pause/stop signal observed at every suspension point.

use std::sync::{Mutex, MutexGuard};

pub mod gate;

pub use gate::{Gate, Halted, RunSignal};

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
