#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Tactile: a humanized input automation engine.
//!
//! Workflows are trees of actions (moves, clicks, keystrokes, waits, loops, conditionals
//! and screen detections) interpreted by a cooperative engine that can be paused,
//! resumed, stopped or emergency-stopped at any suspension point.
//! - `config`: Workflow and settings models, loader, validation and schema helpers.
//! - `input`: Humanized pointer paths, click jitter, typing timing and input devices.
//! - `detect`: Screen capture, template cache, NCC matching and pixel scans.
//! - `executor`: The execution engine, its session, events and errors.
//! - `sources`: Control-command sources (stdin, control file).
//! - `utils`: The pause/stop gate and small shared helpers.
//!
//! Use `tactile::prelude::*` to bring commonly used items into scope quickly.

/// Public module: configuration (models, loader, schema helpers).
pub mod config;
/// Public module: screen detection.
pub mod detect;
/// Public module: execution engine.
pub mod executor;
/// Public module: humanized input.
pub mod input;
/// Public module: control sources (stdin, control file).
pub mod sources;
/// Public module: utilities (run signal gate, lock helper).
pub mod utils;

/// Crate-level constants for consumers that want to inspect package metadata at runtime.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version (e.g., "0.1.0").
#[inline]
pub const fn version() -> &'static str {
    PKG_VERSION
}

/// Parse a plain level name (trace|debug|info|warn|error).
pub fn parse_level(s: &str) -> Option<tracing::Level> {
    use tracing::Level;
    match s.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize tracing (logging) with a reasonable default.
/// - `level` wins when given; otherwise `RUST_LOG` is read as a plain level.
/// - Falls back to `info` level.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_tracing_with(level: Option<tracing::Level>) {
    let level = level
        .or_else(|| std::env::var("RUST_LOG").ok().as_deref().and_then(parse_level))
        .unwrap_or(tracing::Level::INFO);

    // Ignore the error if the global subscriber was already set.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

/// [`init_tracing_with`] without an explicit level.
pub fn init_tracing() {
    init_tracing_with(None);
}

/// A convenient set of exports for most consumers.
///
/// Bring this into scope with:
/// `use tactile::prelude::*;`
pub mod prelude {
    // Common result/error handling
    pub use anyhow::{Context, Error, Result, anyhow, bail, ensure};

    // Serialization
    pub use serde::{Deserialize, Serialize};

    // Tracing macros
    pub use tracing::{debug, error, info, instrument, trace, warn};

    // Timing helpers
    pub use std::time::Duration;
    pub use tokio::time::sleep;

    // External crates (namespaced) if callers want direct access
    pub use crate as tactile;
    pub use enigo;
    pub use image;
    pub use rand;

    // Frequently used internal modules and types
    pub use crate::config::{Action, ActionKind, Settings, Workflow};
    pub use crate::executor::{Engine, EngineEvent, EngineHandle, ExecuteOptions, SessionState};
    pub use crate::{config, detect, executor, input, sources, utils};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_levels() {
        assert_eq!(parse_level("Warning"), Some(tracing::Level::WARN));
        assert_eq!(parse_level(" trace "), Some(tracing::Level::TRACE));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn init_is_idempotent() {
        init_tracing();
        init_tracing_with(Some(tracing::Level::DEBUG));
    }
}
