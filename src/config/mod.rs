//! Configuration module for Tactile.
//!
//! This module wires together the data models (workflow documents and engine settings)
//! and the loading/validation helpers used throughout the crate.
//!
//! Example:
//! use tactile::config::{Workflow, load_from_path};
//!
//! let wf = load_from_path("workflows/login.json")?;

pub mod loader;
pub mod models;

// Re-export core data models
pub use models::{
    Action, ActionKind, ClickSettings, ClickType, Condition, ConditionKind, ConditionalAction,
    DelayRange, DetectionSettings, DurationSpec, EngineSettings, ErrorPolicy, ImageDetectAction,
    JitterMode, KeyboardAction, KeyboardMode, LoopAction, MouseButton, MouseClickAction,
    MouseMoveAction, MouseSettings, MoveMode, OvershootSettings, PixelDetectAction,
    PointerTarget, Rect, Rgb, Settings, TypingSettings, WaitAction, WaitTarget, WaitUntil,
    Workflow,
};

// Re-export loader utilities
pub use loader::{
    generate_schema, generate_settings_schema, load_from_path, load_from_path_async,
    load_from_reader, load_from_str, load_settings_from_path_async, settings_from_str,
    validate_settings, validate_workflow, write_schema_to_writer,
};
