use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use super::InputError;
use super::device::{SharedDevice, with_device};
use super::keys::Key;
use super::path::{PathPoint, fit_to_duration, humanized_path};
use super::timing::{TypingModel, click_jitter, uniform_delay};
use crate::config::{
    ClickSettings, ClickType, DelayRange, MouseButton, MouseSettings, Rect, Settings,
    TypingSettings,
};
use crate::utils::Gate;

/// Per-movement options.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MoveOptions {
    /// Fit the path to this total duration (ms).
    pub duration: Option<u64>,
    /// Override the overshoot setting.
    pub overshoot: Option<bool>,
}

/// Composes path generation, jitter and typing timing into device-level operations.
///
/// Every operation runs to completion; between steps it only parks while paused, or
/// aborts with [`InputError::Halted`] after an emergency stop.
pub struct InputSimulator {
    device: SharedDevice,
    mouse: MouseSettings,
    click: ClickSettings,
    typing: TypingSettings,
    rng: StdRng,
    typing_model: TypingModel,
    gate: Gate,
}

impl InputSimulator {
    pub fn new(device: SharedDevice, settings: &Settings, gate: Gate) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            device,
            mouse: settings.mouse.clone(),
            click: settings.click.clone(),
            typing: settings.typing.clone(),
            rng,
            typing_model: TypingModel::new(),
            gate,
        }
    }

    pub fn update_settings(&mut self, settings: &Settings) {
        self.mouse = settings.mouse.clone();
        self.click = settings.click.clone();
        self.typing = settings.typing.clone();
        if let Some(seed) = settings.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Random duration from an inclusive millisecond range.
    pub fn sample_delay(&mut self, range: DelayRange) -> Duration {
        uniform_delay(&mut self.rng, range)
    }

    /// Uniformly random integer point inside `rect`.
    pub fn random_point_in(&mut self, rect: Rect) -> (i32, i32) {
        let x = rect.x + self.rng.random_range(0..rect.width.max(1));
        let y = rect.y + self.rng.random_range(0..rect.height.max(1));
        (x, y)
    }

    pub fn position(&self) -> Result<(i32, i32), InputError> {
        with_device(&self.device, |d| d.position())
    }

    /// Move the pointer along a humanized path to `(x, y)`.
    pub async fn move_to(&mut self, x: i32, y: i32, opts: MoveOptions) -> Result<(), InputError> {
        let from = self.position()?;
        if from == (x, y) {
            return Ok(());
        }
        let overshoot = opts.overshoot.unwrap_or(self.mouse.overshoot.enabled);
        let mut path = humanized_path(
            &mut self.rng,
            &self.mouse,
            (from.0 as f64, from.1 as f64),
            (x as f64, y as f64),
            overshoot,
        );
        if let Some(ms) = opts.duration {
            path = fit_to_duration(path, ms as f64, self.mouse.step_overhead_ms);
        }
        debug!(
            target: "tactile::input",
            from = ?from, to = ?(x, y), points = path.len(), "move_to"
        );
        self.follow(&path).await
    }

    async fn follow(&mut self, path: &[PathPoint]) -> Result<(), InputError> {
        for p in path {
            with_device(&self.device, |d| d.move_to(p.x, p.y))?;
            self.gate
                .pace(Duration::from_secs_f64(p.delay_ms.max(0.0) / 1000.0))
                .await?;
        }
        Ok(())
    }

    /// Click at `at` (moving there first, with jitter when requested), or at the current
    /// position when `at` is `None`. Returns the point that was clicked.
    pub async fn click(
        &mut self,
        button: MouseButton,
        click_type: ClickType,
        at: Option<(i32, i32)>,
        jitter: bool,
    ) -> Result<(i32, i32), InputError> {
        let point = match at {
            Some((x, y)) => {
                let (dx, dy) = if jitter {
                    click_jitter(
                        &mut self.rng,
                        self.click.jitter_radius,
                        self.click.jitter_sigma,
                        self.click.jitter_mode,
                    )
                } else {
                    (0, 0)
                };
                let target = (x + dx, y + dy);
                self.move_to(target.0, target.1, MoveOptions::default())
                    .await?;
                let settle = self.sample_delay(self.click.settle);
                self.gate.pace(settle).await?;
                target
            }
            None => self.position()?,
        };

        trace!(target: "tactile::input", ?button, ?click_type, ?point, "click");
        match click_type {
            ClickType::Single => self.press_release(button, self.click.press_duration).await?,
            ClickType::Double => {
                self.press_release(button, self.click.press_duration).await?;
                let gap = self.sample_delay(self.click.double_click_gap);
                self.gate.pace(gap).await?;
                self.press_release(button, self.click.press_duration).await?;
            }
            ClickType::Hold(range) => self.press_release(button, range).await?,
        }
        Ok(point)
    }

    async fn press_release(
        &mut self,
        button: MouseButton,
        hold: DelayRange,
    ) -> Result<(), InputError> {
        with_device(&self.device, |d| d.press_button(button))?;
        let hold = self.sample_delay(hold);
        let paced = self.gate.pace(hold).await;
        // The button must come back up even when halted mid-hold.
        with_device(&self.device, |d| d.release_button(button))?;
        paced.map_err(InputError::from)
    }

    /// Press and release a combo: keys go down in order and come up in reverse.
    pub async fn press_combo(&mut self, keys: &[Key]) -> Result<(), InputError> {
        trace!(target: "tactile::input", ?keys, "press_combo");
        self.hold_keys(keys).await?;
        let hold = self.sample_delay(self.typing.key_hold);
        let paced = self.gate.pace(hold).await;
        self.release_keys(keys)?;
        paced.map_err(InputError::from)
    }

    /// Press keys in order and leave them held.
    pub async fn hold_keys(&mut self, keys: &[Key]) -> Result<(), InputError> {
        for (i, key) in keys.iter().enumerate() {
            with_device(&self.device, |d| d.press_key(*key))?;
            if i + 1 < keys.len() {
                let gap = self.sample_delay(self.typing.key_hold);
                self.gate.pace(gap).await?;
            }
        }
        Ok(())
    }

    /// Release keys in reverse order. Every key is attempted; the first failure is returned.
    pub fn release_keys(&mut self, keys: &[Key]) -> Result<(), InputError> {
        let mut first_err = None;
        for key in keys.iter().rev() {
            if let Err(e) = with_device(&self.device, |d| d.release_key(*key)) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Type text one character at a time with humanized delays.
    pub async fn type_text(&mut self, text: &str) -> Result<(), InputError> {
        debug!(target: "tactile::input", chars = text.chars().count(), "type_text");
        self.typing_model.reset();
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            let s: &str = ch.encode_utf8(&mut buf);
            with_device(&self.device, |d| d.text(s))?;
            let delay = self
                .typing_model
                .next_delay(&mut self.rng, &self.typing, ch);
            self.gate.pace(delay.total()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::device::{DeviceEvent, RecordingDevice, share};

    fn seeded() -> Settings {
        Settings {
            seed: Some(99),
            ..Settings::default()
        }
    }

    fn simulator(device: &RecordingDevice) -> InputSimulator {
        InputSimulator::new(share(device.clone()), &seeded(), Gate::open())
    }

    #[tokio::test(start_paused = true)]
    async fn move_ends_on_target() {
        let device = RecordingDevice::at(0, 0);
        let mut sim = simulator(&device);
        sim.move_to(640, 360, MoveOptions::default()).await.unwrap();
        assert_eq!(device.current_position(), (640, 360));
        assert!(device.events().len() > 10);
    }

    #[tokio::test(start_paused = true)]
    async fn move_with_duration_takes_that_long() {
        let device = RecordingDevice::at(0, 0);
        let mut sim = simulator(&device);
        let started = tokio::time::Instant::now();
        let opts = MoveOptions {
            duration: Some(500),
            overshoot: Some(false),
        };
        sim.move_to(800, 100, opts).await.unwrap();
        let elapsed = started.elapsed();
        // Delays sum to the budget minus the estimated overhead, which a mock device doesn't incur.
        assert!(elapsed <= Duration::from_millis(505), "{elapsed:?}");
        assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn click_without_point_clicks_in_place() {
        let device = RecordingDevice::at(12, 34);
        let mut sim = simulator(&device);
        let at = sim
            .click(MouseButton::Left, ClickType::Double, None, true)
            .await
            .unwrap();
        assert_eq!(at, (12, 34));
        assert_eq!(
            device.events(),
            vec![
                DeviceEvent::ButtonDown(MouseButton::Left),
                DeviceEvent::ButtonUp(MouseButton::Left),
                DeviceEvent::ButtonDown(MouseButton::Left),
                DeviceEvent::ButtonUp(MouseButton::Left),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn jittered_click_stays_within_radius() {
        let device = RecordingDevice::at(0, 0);
        let mut sim = simulator(&device);
        for _ in 0..20 {
            let (x, y) = sim
                .click(MouseButton::Right, ClickType::Single, Some((300, 300)), true)
                .await
                .unwrap();
            let d = ((x - 300) as f64).hypot((y - 300) as f64);
            assert!(d <= Settings::default().click.jitter_radius);
            assert_eq!(device.current_position(), (x, y));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn combo_releases_in_reverse_order() {
        let device = RecordingDevice::new();
        let mut sim = simulator(&device);
        sim.press_combo(&[Key::Control, Key::Char('c')]).await.unwrap();
        assert_eq!(
            device.events(),
            vec![
                DeviceEvent::KeyDown(Key::Control),
                DeviceEvent::KeyDown(Key::Char('c')),
                DeviceEvent::KeyUp(Key::Char('c')),
                DeviceEvent::KeyUp(Key::Control),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn typing_sends_each_character() {
        let device = RecordingDevice::new();
        let mut sim = simulator(&device);
        sim.type_text("Hi!").await.unwrap();
        assert_eq!(
            device.events(),
            vec![
                DeviceEvent::Text("H".into()),
                DeviceEvent::Text("i".into()),
                DeviceEvent::Text("!".into()),
            ]
        );
    }
}
