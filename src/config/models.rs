use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::path::PathBuf;

/// A workflow document: a named, ordered list of actions repeated `loop_count` times.
///
/// The engine treats a workflow as an immutable snapshot for the duration of one run.
/// A `loop_count` of `0` repeats the action list until the run is stopped.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Human-readable workflow name (used in logs and events).
    #[serde(default)]
    pub name: String,

    /// Number of passes over `actions` (default: 1; 0 = until stopped).
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,

    /// Delay between passes, in milliseconds.
    #[serde(default)]
    pub loop_delay: DelayRange,

    /// Top-level action list.
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_loop_count() -> u32 {
    1
}

/// Inclusive millisecond range `[min, max]`.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DelayRange {
    pub min: u64,
    pub max: u64,
}

impl DelayRange {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub const fn fixed(ms: u64) -> Self {
        Self { min: ms, max: ms }
    }

    /// Bounds ordered low-to-high, tolerating a swapped pair.
    pub fn ordered(&self) -> (u64, u64) {
        if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        }
    }

    pub fn is_zero(&self) -> bool {
        self.min == 0 && self.max == 0
    }
}

/// What to do when an action fails.
///
/// Serialized as the boolean `continueOnError` flag of the action schema.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Unwind through all enclosing frames and fail the run.
    #[default]
    Abort,
    /// Log the error and continue with the next sibling.
    Continue,
}

mod error_policy_flag {
    use super::ErrorPolicy;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(policy: &ErrorPolicy, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bool(*policy == ErrorPolicy::Continue)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<ErrorPolicy, D::Error> {
        Ok(if bool::deserialize(d)? {
            ErrorPolicy::Continue
        } else {
            ErrorPolicy::Abort
        })
    }
}

/// One node of the action tree.
///
/// The fields shared by every variant live here; the variant payload is flattened in
/// and selected by the `type` tag. For `conditional` actions, `condition` is the branch
/// condition rather than a gate. For `loop` actions, `delay` is the inter-iteration delay.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Delay applied after the action completes, before the next one is dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelayRange>,

    /// Swallow errors raised by this action (default: false).
    #[serde(
        default,
        rename = "continueOnError",
        with = "error_policy_flag"
    )]
    #[schemars(with = "bool")]
    pub on_error: ErrorPolicy,

    /// Gate evaluated against the screen before dispatch; the action is skipped when false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    /// Wrap a payload with default shared fields.
    pub fn new(kind: ActionKind) -> Self {
        Self {
            name: None,
            delay: None,
            on_error: ErrorPolicy::Abort,
            condition: None,
            kind,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_delay(mut self, delay: DelayRange) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.on_error = ErrorPolicy::Continue;
        self
    }

    /// The schema tag of this action (e.g. `"mouse_click"`).
    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }

    /// Label used in logs and events: the name if present, otherwise the tag.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.tag().to_string())
    }
}

/// Action payloads, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Move the pointer along a humanized path.
    MouseMove(MouseMoveAction),
    /// Click (single, double or hold) a mouse button.
    MouseClick(MouseClickAction),
    /// Type text, press/hold/release keys, or hold a key around nested actions.
    Keyboard(KeyboardAction),
    /// Sleep for a duration, or poll the screen until an image/pixel appears or disappears.
    Wait(WaitAction),
    /// Run `thenActions` or `elseActions` depending on the action's `condition`.
    Conditional(ConditionalAction),
    /// Repeat nested actions.
    Loop(LoopAction),
    /// Locate a template image on screen.
    ImageDetect(ImageDetectAction),
    /// Locate a pixel of a given color on screen.
    PixelDetect(PixelDetectAction),
}

impl ActionKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ActionKind::MouseMove(_) => "mouse_move",
            ActionKind::MouseClick(_) => "mouse_click",
            ActionKind::Keyboard(_) => "keyboard",
            ActionKind::Wait(_) => "wait",
            ActionKind::Conditional(_) => "conditional",
            ActionKind::Loop(_) => "loop",
            ActionKind::ImageDetect(_) => "image_detect",
            ActionKind::PixelDetect(_) => "pixel_detect",
        }
    }
}

/// How a pointer target is resolved.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MoveMode {
    /// Explicit `x`/`y`.
    #[default]
    Point,
    /// Uniformly random point inside `bounds`.
    Bounds,
    /// Uniformly random point inside a detection result's bounds.
    Image,
}

/// Where a pointer action should land.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PointerTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_mode: Option<MoveMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Rect>,
    /// With `moveMode: "image"`, search this template first instead of reusing the last result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

impl PointerTarget {
    pub fn point(x: i32, y: i32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    /// True when nothing locates the target (clicks then use the pointer anchor).
    pub fn is_unset(&self) -> bool {
        self.x.is_none()
            && self.y.is_none()
            && self.move_mode.is_none()
            && self.bounds.is_none()
            && self.image_id.is_none()
    }

    /// Explicit `moveMode`, otherwise inferred from which fields are present.
    pub fn mode(&self) -> MoveMode {
        match self.move_mode {
            Some(mode) => mode,
            None if self.bounds.is_some() => MoveMode::Bounds,
            None if self.image_id.is_some() => MoveMode::Image,
            None => MoveMode::Point,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MouseMoveAction {
    #[serde(flatten)]
    pub target: PointerTarget,
    /// Total movement duration in milliseconds; the path is fitted to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Override the overshoot setting for this movement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overshoot: Option<bool>,
}

/// Single, double, or press-and-hold.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClickType {
    #[default]
    Single,
    Double,
    /// Hold the button for a random duration within the range.
    Hold(DelayRange),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MouseClickAction {
    #[serde(default)]
    pub button: MouseButton,
    #[serde(default)]
    pub click_type: ClickType,
    #[serde(flatten)]
    pub target: PointerTarget,
    /// Apply click jitter (default: true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<bool>,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyboardMode {
    /// Type `text` with humanized inter-key delays.
    Type,
    /// Press and release the combo in `key`.
    Press,
    /// Press the combo in `key` and leave it held.
    Hold,
    /// Release the combo in `key`.
    Release,
    /// Hold `key` while running `actions`, releasing it afterwards in every case.
    HoldAndAct,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardAction {
    pub mode: KeyboardMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Key or combo, e.g. `"enter"` or `"ctrl+shift+s"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Repeat count for `press` (default: 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Nested actions for `hold_and_act`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

/// Either a fixed number of milliseconds or a `{min, max}` range.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(untagged)]
pub enum DurationSpec {
    Fixed(u64),
    Range(DelayRange),
}

impl DurationSpec {
    pub fn range(&self) -> DelayRange {
        match *self {
            DurationSpec::Fixed(ms) => DelayRange::fixed(ms),
            DurationSpec::Range(r) => r,
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitTarget {
    Image,
    Pixel,
}

#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    #[default]
    Appear,
    Disappear,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WaitAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<DurationSpec>,
    /// Poll the screen instead of sleeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<WaitTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Rect>,
    #[serde(default)]
    pub until: WaitUntil,
    /// Poll timeout in milliseconds (default: detection timeout setting).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Poll interval in milliseconds (default: detection poll interval setting).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default)]
    pub fail_on_timeout: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalAction {
    #[serde(default)]
    pub then_actions: Vec<Action>,
    #[serde(default)]
    pub else_actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoopAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default)]
    pub infinite: bool,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetectAction {
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down: Option<bool>,
    #[serde(default)]
    pub fail_on_not_found: bool,
    #[serde(default)]
    pub wait_until_found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PixelDetectAction {
    pub color: Rgb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Rect>,
    #[serde(default)]
    pub fail_on_not_found: bool,
    #[serde(default)]
    pub wait_until_found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    ImagePresent,
    ImageAbsent,
    PixelMatch,
}

/// A screen predicate used by gates, conditionals and waits.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Rect>,
}

impl Condition {
    pub fn image_present(image_id: impl Into<String>) -> Self {
        Self::image(ConditionKind::ImagePresent, image_id)
    }

    pub fn image_absent(image_id: impl Into<String>) -> Self {
        Self::image(ConditionKind::ImageAbsent, image_id)
    }

    pub fn pixel_match(color: Rgb) -> Self {
        Self {
            kind: ConditionKind::PixelMatch,
            image_id: None,
            color: Some(color),
            tolerance: None,
            confidence: None,
            region: None,
        }
    }

    fn image(kind: ConditionKind, image_id: impl Into<String>) -> Self {
        Self {
            kind,
            image_id: Some(image_id.into()),
            color: None,
            tolerance: None,
            confidence: None,
            region: None,
        }
    }
}

/// A rectangle region on screen.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && py >= self.y && px < self.x + self.width && py < self.y + self.height
    }
}

/// An 8-bit RGB color.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Mouse button enumeration.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

// --- Settings ---

/// Engine-wide tuning. Flows one-way into the simulator and detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[validate]
    pub mouse: MouseSettings,
    #[validate]
    pub click: ClickSettings,
    #[validate]
    pub typing: TypingSettings,
    #[validate]
    pub detection: DetectionSettings,
    #[validate]
    pub engine: EngineSettings,
    /// Seed for all randomness; omit for an OS-seeded generator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Wind/gravity path parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct MouseSettings {
    /// Speed multiplier; step delays are divided by it.
    #[validate(exclusive_minimum = 0.0)]
    pub speed: f64,
    #[validate(minimum = 0.0)]
    pub gravity: f64,
    #[validate(minimum = 0.0)]
    pub wind: f64,
    /// Minimum per-step delay in milliseconds.
    #[validate(minimum = 0.0)]
    pub min_wait: f64,
    /// Maximum per-step delay in milliseconds.
    #[validate(minimum = 0.0)]
    pub max_wait: f64,
    /// Step cap in pixels.
    #[validate(exclusive_minimum = 0.0)]
    pub max_step: f64,
    /// Radius around the target where wind is damped and steps shrink.
    #[validate(minimum = 0.0)]
    pub target_area: f64,
    /// Estimated cost of one pointer write, used when fitting a path to a duration.
    #[validate(minimum = 0.0)]
    pub step_overhead_ms: f64,
    #[validate]
    pub overshoot: OvershootSettings,
    /// Clamp for overshoot points (usually the virtual screen).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_bounds: Option<Rect>,
}

impl Default for MouseSettings {
    fn default() -> Self {
        Self {
            speed: 1.0,
            gravity: 9.0,
            wind: 3.0,
            min_wait: 2.0,
            max_wait: 10.0,
            max_step: 10.0,
            target_area: 8.0,
            step_overhead_ms: 1.0,
            overshoot: OvershootSettings::default(),
            screen_bounds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct OvershootSettings {
    pub enabled: bool,
    /// Base probability, scaled up with travel distance.
    #[validate(minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub probability: f64,
    /// Travel distance at which the base probability applies in full.
    #[validate(exclusive_minimum = 0.0)]
    pub reference_distance: f64,
    /// Movements shorter than this never overshoot.
    #[validate(minimum = 0.0)]
    pub min_distance: f64,
    #[validate(minimum = 0.0)]
    pub multiplier_min: f64,
    #[validate(minimum = 0.0)]
    pub multiplier_max: f64,
    pub pause: DelayRange,
    /// Scale applied to wind and step cap for the corrective path.
    #[validate(exclusive_minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub correction_scale: f64,
}

impl Default for OvershootSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.3,
            reference_distance: 600.0,
            min_distance: 120.0,
            multiplier_min: 0.03,
            multiplier_max: 0.09,
            pause: DelayRange::new(40, 140),
            correction_scale: 0.5,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JitterMode {
    /// 2D Gaussian, magnitude clamped to the radius.
    #[default]
    Gaussian,
    /// Uniform over the disc of the radius.
    Uniform,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct ClickSettings {
    #[validate(minimum = 0.0)]
    pub jitter_radius: f64,
    /// Standard deviation for Gaussian jitter (default: radius / 3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_sigma: Option<f64>,
    pub jitter_mode: JitterMode,
    pub press_duration: DelayRange,
    pub double_click_gap: DelayRange,
    /// Pause between arriving at the target and pressing.
    pub settle: DelayRange,
}

impl Default for ClickSettings {
    fn default() -> Self {
        Self {
            jitter_radius: 3.0,
            jitter_sigma: None,
            jitter_mode: JitterMode::Gaussian,
            press_duration: DelayRange::new(40, 110),
            double_click_gap: DelayRange::new(60, 140),
            settle: DelayRange::new(20, 70),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct TypingSettings {
    pub min_delay: u64,
    pub max_delay: u64,
    /// Standard deviation of the base delay (default: a quarter of the range).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    #[validate(minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub burst_probability: f64,
    #[validate(minimum = 1)]
    pub burst_length_max: u32,
    /// Multiplier applied to keystrokes inside a burst.
    #[validate(exclusive_minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub burst_factor: f64,
    /// Extra pause after punctuation and before capital letters.
    pub extra_pause: DelayRange,
    #[validate(minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub hesitation_probability: f64,
    pub hesitation: DelayRange,
    /// How long each key stays down.
    pub key_hold: DelayRange,
}

impl Default for TypingSettings {
    fn default() -> Self {
        Self {
            min_delay: 40,
            max_delay: 180,
            std_dev: None,
            burst_probability: 0.08,
            burst_length_max: 4,
            burst_factor: 0.55,
            extra_pause: DelayRange::new(30, 120),
            hesitation_probability: 0.02,
            hesitation: DelayRange::new(300, 900),
            key_hold: DelayRange::new(15, 45),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionSettings {
    /// Default match threshold.
    #[validate(minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub confidence: f64,
    pub pixel_tolerance: u8,
    #[validate(minimum = 1)]
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    /// Downscale frames and templates before matching by default.
    pub scale_down: bool,
    /// Directory template ids are resolved against.
    pub images_dir: PathBuf,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence: 0.8,
            pixel_tolerance: 10,
            poll_interval_ms: 250,
            timeout_ms: 10_000,
            scale_down: false,
            images_dir: PathBuf::from("images"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Resolution of the wait countdown.
    #[validate(minimum = 1)]
    pub wait_tick_ms: u64,
    /// Simulated duration of a primitive in dry-run mode.
    pub dry_run_step_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            wait_tick_ms: 50,
            dry_run_step_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_actions_with_shared_fields() {
        let v = json!({
            "type": "mouse_click",
            "name": "ok button",
            "button": "right",
            "clickType": {"hold": {"min": 100, "max": 200}},
            "x": 10,
            "y": 20,
            "continueOnError": true,
            "delay": {"min": 5, "max": 10}
        });
        let a: Action = serde_json::from_value(v).unwrap();
        assert_eq!(a.name.as_deref(), Some("ok button"));
        assert_eq!(a.on_error, ErrorPolicy::Continue);
        assert_eq!(a.delay, Some(DelayRange::new(5, 10)));
        match a.kind {
            ActionKind::MouseClick(c) => {
                assert_eq!(c.button, MouseButton::Right);
                assert_eq!(c.click_type, ClickType::Hold(DelayRange::new(100, 200)));
                assert_eq!(c.target, PointerTarget::point(10, 20));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn wait_duration_accepts_number_or_range() {
        let a: Action = serde_json::from_value(json!({"type": "wait", "duration": 250})).unwrap();
        let ActionKind::Wait(w) = a.kind else {
            panic!("expected wait")
        };
        assert_eq!(w.duration, Some(DurationSpec::Fixed(250)));

        let a: Action =
            serde_json::from_value(json!({"type": "wait", "duration": {"min": 1, "max": 2}}))
                .unwrap();
        let ActionKind::Wait(w) = a.kind else {
            panic!("expected wait")
        };
        assert_eq!(w.duration.unwrap().range(), DelayRange::new(1, 2));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let r = serde_json::from_value::<Action>(json!({"type": "teleport"}));
        assert!(r.is_err());
    }

    #[test]
    fn nested_conditional_and_loop_round_trip_through_json() {
        let v = json!({
            "name": "wf",
            "loopCount": 3,
            "actions": [{
                "type": "conditional",
                "condition": {"type": "image_present", "imageId": "ok"},
                "thenActions": [{"type": "loop", "count": 2, "delay": {"min": 1, "max": 1},
                                 "actions": [{"type": "keyboard", "mode": "press", "key": "enter"}]}],
                "elseActions": []
            }]
        });
        let wf: Workflow = serde_json::from_value(v).unwrap();
        assert_eq!(wf.loop_count, 3);
        let first = &wf.actions[0];
        assert_eq!(first.condition, Some(Condition::image_present("ok")));
        let ActionKind::Conditional(c) = &first.kind else {
            panic!("expected conditional")
        };
        assert_eq!(c.then_actions[0].delay, Some(DelayRange::fixed(1)));
        assert_eq!(c.then_actions[0].tag(), "loop");
    }

    #[test]
    fn default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
        let mut s = Settings::default();
        s.detection.confidence = 1.5;
        assert!(s.validate().is_err());
    }
}
