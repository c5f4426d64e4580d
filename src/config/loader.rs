use anyhow::{Context, Result, bail, ensure};
use schemars::{Schema, schema_for};
use serde_valid::Validate;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

use super::models::{
    Action, ActionKind, Condition, ConditionKind, DelayRange, KeyboardMode, MoveMode,
    PointerTarget, Settings, WaitTarget, Workflow,
};

/// Load a workflow from a string slice.
pub fn load_from_str(s: &str) -> Result<Workflow> {
    let wf: Workflow =
        serde_json::from_str(s).context("Failed to parse JSON workflow string into Workflow")?;
    validate_workflow(&wf)?;
    Ok(wf)
}

/// Load a workflow from any reader (e.g., a file).
pub fn load_from_reader<R: Read>(reader: R) -> Result<Workflow> {
    let wf: Workflow =
        serde_json::from_reader(reader).context("Failed to parse JSON workflow from reader")?;
    validate_workflow(&wf)?;
    Ok(wf)
}

/// Load a workflow from a file path synchronously.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Workflow> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref)
        .with_context(|| format!("Failed to open workflow file {}", path_ref.display()))?;
    let wf = load_from_reader(file)?;
    debug!(target: "tactile::config", "Loaded workflow from {}", path_ref.display());
    Ok(wf)
}

/// Load a workflow from a file path asynchronously (Tokio).
pub async fn load_from_path_async<P: AsRef<Path>>(path: P) -> Result<Workflow> {
    use tokio::fs;
    let path_ref = path.as_ref();
    let bytes = fs::read(path_ref)
        .await
        .with_context(|| format!("Failed to read workflow file {}", path_ref.display()))?;
    let wf: Workflow = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse JSON workflow from {}", path_ref.display()))?;
    validate_workflow(&wf)?;
    debug!(target: "tactile::config", "Loaded workflow from {}", path_ref.display());
    Ok(wf)
}

/// Load and validate settings from a JSON string. Missing fields take their defaults.
pub fn settings_from_str(s: &str) -> Result<Settings> {
    let settings: Settings =
        serde_json::from_str(s).context("Failed to parse JSON settings string")?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Load and validate settings from a file path asynchronously (Tokio).
pub async fn load_settings_from_path_async<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    let bytes = tokio::fs::read(path_ref)
        .await
        .with_context(|| format!("Failed to read settings file {}", path_ref.display()))?;
    let settings: Settings = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse JSON settings from {}", path_ref.display()))?;
    validate_settings(&settings)?;
    debug!(target: "tactile::config", "Loaded settings from {}", path_ref.display());
    Ok(settings)
}

/// Generate the JSON Schema for the Workflow model (for external validation or tooling).
pub fn generate_schema() -> Schema {
    schema_for!(Workflow)
}

/// Generate the JSON Schema for the Settings model.
pub fn generate_settings_schema() -> Schema {
    schema_for!(Settings)
}

/// Write the JSON Schema for the Workflow model to any writer (pretty-printed).
pub fn write_schema_to_writer<W: Write>(mut writer: W) -> Result<()> {
    let schema = generate_schema();
    let json = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
    writer
        .write_all(json.as_bytes())
        .context("Failed to write schema to writer")?;
    Ok(())
}

/// Range checks declared on the settings models, plus `min <= max` on every range.
pub fn validate_settings(settings: &Settings) -> Result<()> {
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid settings: {e}"))?;

    let ranges = [
        ("mouse.overshoot.pause", settings.mouse.overshoot.pause),
        ("click.pressDuration", settings.click.press_duration),
        ("click.doubleClickGap", settings.click.double_click_gap),
        ("click.settle", settings.click.settle),
        ("typing.extraPause", settings.typing.extra_pause),
        ("typing.hesitation", settings.typing.hesitation),
        ("typing.keyHold", settings.typing.key_hold),
        (
            "typing.delay",
            DelayRange::new(settings.typing.min_delay, settings.typing.max_delay),
        ),
    ];
    for (name, range) in ranges {
        check_range(&range).with_context(|| format!("Invalid settings range '{name}'"))?;
    }
    ensure!(
        settings.mouse.min_wait <= settings.mouse.max_wait,
        "Invalid settings: mouse.minWait must not exceed mouse.maxWait"
    );
    ensure!(
        settings.mouse.overshoot.multiplier_min <= settings.mouse.overshoot.multiplier_max,
        "Invalid settings: overshoot multiplierMin must not exceed multiplierMax"
    );
    Ok(())
}

/// Structural checks the type system cannot express:
/// - required fields per mode (text for typing, key for key modes, image ids for image targets)
/// - `min <= max` on every delay range
/// - loops declare a count or `infinite`
/// - conditionals carry a condition
pub fn validate_workflow(wf: &Workflow) -> Result<()> {
    check_range(&wf.loop_delay).context("Invalid workflow loopDelay")?;
    validate_actions(&wf.actions).with_context(|| format!("Invalid workflow '{}'", wf.name))
}

fn validate_actions(actions: &[Action]) -> Result<()> {
    for (idx, action) in actions.iter().enumerate() {
        validate_action(action)
            .with_context(|| format!("Invalid '{}' action at index {}", action.tag(), idx))?;
    }
    Ok(())
}

fn validate_action(action: &Action) -> Result<()> {
    if let Some(delay) = &action.delay {
        check_range(delay).context("Invalid delay")?;
    }
    if let Some(condition) = &action.condition {
        validate_condition(condition)?;
    }

    match &action.kind {
        ActionKind::MouseMove(m) => {
            ensure!(!m.target.is_unset(), "Mouse moves require a target");
            validate_target(&m.target)
        }
        ActionKind::MouseClick(c) => {
            if let super::models::ClickType::Hold(range) = &c.click_type {
                check_range(range).context("Invalid hold duration")?;
            }
            validate_target(&c.target)
        }
        ActionKind::Keyboard(k) => {
            match k.mode {
                KeyboardMode::Type => {
                    ensure!(k.text.is_some(), "Keyboard mode 'type' requires `text`");
                }
                KeyboardMode::Press | KeyboardMode::Hold | KeyboardMode::Release => {
                    ensure!(
                        k.key.as_deref().is_some_and(|s| !s.trim().is_empty()),
                        "Keyboard key modes require a non-empty `key`"
                    );
                }
                KeyboardMode::HoldAndAct => {
                    ensure!(
                        k.key.as_deref().is_some_and(|s| !s.trim().is_empty()),
                        "Keyboard mode 'hold_and_act' requires a non-empty `key`"
                    );
                    validate_actions(&k.actions).context("Invalid nested keyboard actions")?;
                }
            }
            Ok(())
        }
        ActionKind::Wait(w) => {
            match w.wait_for {
                Some(WaitTarget::Image) => {
                    ensure!(
                        w.image_id.as_deref().is_some_and(|s| !s.is_empty()),
                        "Waiting for an image requires `imageId`"
                    );
                }
                Some(WaitTarget::Pixel) => {
                    ensure!(w.color.is_some(), "Waiting for a pixel requires `color`");
                }
                None => {
                    let Some(duration) = &w.duration else {
                        bail!("Wait requires `duration` or `waitFor`");
                    };
                    check_range(&duration.range()).context("Invalid wait duration")?;
                }
            }
            Ok(())
        }
        ActionKind::Conditional(c) => {
            ensure!(
                action.condition.is_some(),
                "Conditional actions require a `condition`"
            );
            validate_actions(&c.then_actions).context("Invalid thenActions")?;
            validate_actions(&c.else_actions).context("Invalid elseActions")
        }
        ActionKind::Loop(l) => {
            ensure!(
                l.infinite || l.count.is_some(),
                "Loop requires `count` or `infinite: true`"
            );
            validate_actions(&l.actions).context("Invalid loop actions")
        }
        ActionKind::ImageDetect(d) => {
            ensure!(!d.image_id.is_empty(), "Image detection requires `imageId`");
            validate_confidence(d.confidence)
        }
        ActionKind::PixelDetect(_) => Ok(()),
    }
}

fn validate_target(target: &PointerTarget) -> Result<()> {
    match target.mode() {
        MoveMode::Point => {
            ensure!(
                target.x.is_some() == target.y.is_some(),
                "Point targets need both `x` and `y`"
            );
        }
        MoveMode::Bounds => {
            let Some(b) = target.bounds else {
                bail!("moveMode 'bounds' requires `bounds`");
            };
            ensure!(
                b.width > 0 && b.height > 0,
                "Bounds must have a positive size"
            );
        }
        MoveMode::Image => {}
    }
    Ok(())
}

fn validate_condition(condition: &Condition) -> Result<()> {
    match condition.kind {
        ConditionKind::ImagePresent | ConditionKind::ImageAbsent => ensure!(
            condition.image_id.as_deref().is_some_and(|s| !s.is_empty()),
            "Image conditions require `imageId`"
        ),
        ConditionKind::PixelMatch => {
            ensure!(condition.color.is_some(), "Pixel conditions require `color`")
        }
    }
    validate_confidence(condition.confidence)
}

fn validate_confidence(confidence: Option<f64>) -> Result<()> {
    if let Some(c) = confidence {
        ensure!(
            (0.0..=1.0).contains(&c),
            "Confidence must be within [0, 1], got {c}"
        );
    }
    Ok(())
}

fn check_range(range: &DelayRange) -> Result<()> {
    ensure!(
        range.min <= range.max,
        "Range min ({}) exceeds max ({})",
        range.min,
        range.max
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_workflow() {
        let wf = load_from_str(
            r#"{"name":"w","actions":[{"type":"mouse_click","x":1,"y":2},{"type":"wait","duration":5}]}"#,
        )
        .unwrap();
        assert_eq!(wf.loop_count, 1);
        assert_eq!(wf.actions.len(), 2);
    }

    #[test]
    fn rejects_type_mode_without_text() {
        let err = load_from_str(r#"{"actions":[{"type":"keyboard","mode":"type"}]}"#).unwrap_err();
        assert!(format!("{err:#}").contains("requires `text`"));
    }

    #[test]
    fn rejects_inverted_range_in_nested_action() {
        let err = load_from_str(
            r#"{"actions":[{"type":"loop","count":2,"actions":[
                {"type":"wait","duration":{"min":10,"max":5}}]}]}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("exceeds max"));
    }

    #[test]
    fn rejects_loop_without_count() {
        assert!(load_from_str(r#"{"actions":[{"type":"loop","actions":[]}]}"#).is_err());
    }

    #[test]
    fn rejects_conditional_without_condition() {
        assert!(load_from_str(r#"{"actions":[{"type":"conditional","thenActions":[]}]}"#).is_err());
    }

    #[test]
    fn settings_fill_defaults_and_check_ranges() {
        let s = settings_from_str(r#"{"click":{"jitterRadius":5.0}}"#).unwrap();
        assert_eq!(s.click.jitter_radius, 5.0);
        assert_eq!(s.engine.wait_tick_ms, 50);

        assert!(settings_from_str(r#"{"typing":{"minDelay":300,"maxDelay":100}}"#).is_err());
        assert!(settings_from_str(r#"{"mouse":{"speed":0.0}}"#).is_err());
    }

    #[test]
    fn schema_mentions_action_tags() {
        let mut buf = Vec::new();
        write_schema_to_writer(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("image_detect"));
        assert!(text.contains("hold_and_act"));
    }
}
