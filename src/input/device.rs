//! Input-injection capability and its implementations.
//!
//! - [`InputDevice`]: what the simulator needs from the platform.
//! - [`EnigoDevice`]: real input through Enigo, driven from a dedicated thread so the
//!   device handle can be shared across async tasks.
//! - [`RecordingDevice`]: in-memory device that records every call (headless runs, tests).

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use enigo::{
    Button as EButton, Coordinate, Direction, Enigo, Key as EKey, Keyboard as _, Mouse as _,
    Settings as EnigoSettings,
};
use tracing::{trace, warn};

use super::InputError;
use super::keys::Key;
use crate::config::MouseButton;

/// Buttons released by an emergency stop.
pub const ALL_BUTTONS: [MouseButton; 3] =
    [MouseButton::Left, MouseButton::Right, MouseButton::Middle];

/// Pointer and keyboard event injection.
pub trait InputDevice: Send {
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), InputError>;
    fn position(&mut self) -> Result<(i32, i32), InputError>;
    fn press_button(&mut self, button: MouseButton) -> Result<(), InputError>;
    fn release_button(&mut self, button: MouseButton) -> Result<(), InputError>;
    fn press_key(&mut self, key: Key) -> Result<(), InputError>;
    fn release_key(&mut self, key: Key) -> Result<(), InputError>;
    /// Type literal text in one call (no per-key timing).
    fn text(&mut self, text: &str) -> Result<(), InputError>;

    /// Release every mouse button and modifier key, attempting each independently.
    /// Returns how many releases failed.
    fn release_all(&mut self) -> usize {
        let mut failures = 0;
        for button in ALL_BUTTONS {
            if let Err(e) = self.release_button(button) {
                warn!(target: "tactile::input", ?button, error = %e, "Release failed");
                failures += 1;
            }
        }
        for key in Key::MODIFIERS {
            if let Err(e) = self.release_key(key) {
                warn!(target: "tactile::input", %key, error = %e, "Release failed");
                failures += 1;
            }
        }
        failures
    }
}

/// A device shared between the simulator and the emergency-stop path.
pub type SharedDevice = Arc<Mutex<dyn InputDevice>>;

pub fn share<D: InputDevice + 'static>(device: D) -> SharedDevice {
    Arc::new(Mutex::new(device))
}

/// Run `f` against the shared device, holding the lock for this call only.
pub fn with_device<T>(
    device: &SharedDevice,
    f: impl FnOnce(&mut dyn InputDevice) -> Result<T, InputError>,
) -> Result<T, InputError> {
    let mut guard = device
        .lock()
        .map_err(|_| InputError::Device("input device lock poisoned".into()))?;
    f(&mut *guard)
}

// --- Enigo ---

enum Request {
    MoveTo(i32, i32),
    Position,
    Button(MouseButton, Direction),
    Key(Key, Direction),
    Text(String),
}

type Reply = Result<Option<(i32, i32)>, InputError>;

/// Enigo-backed device. Enigo lives on its own thread; calls are forwarded over a channel
/// and block until the thread answers.
pub struct EnigoDevice {
    tx: mpsc::Sender<(Request, mpsc::Sender<Reply>)>,
}

impl EnigoDevice {
    /// Start the input thread and initialize Enigo on it.
    pub fn spawn() -> Result<Self, InputError> {
        let (tx, rx) = mpsc::channel::<(Request, mpsc::Sender<Reply>)>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), InputError>>();

        thread::Builder::new()
            .name("tactile-input".into())
            .spawn(move || {
                trace!(target: "tactile::input", "Initializing Enigo");
                let mut enigo = match Enigo::new(&EnigoSettings::default()) {
                    Ok(enigo) => {
                        let _ = ready_tx.send(Ok(()));
                        enigo
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(InputError::Device(format!(
                            "Failed to initialize Enigo: {e}"
                        ))));
                        return;
                    }
                };
                for (request, reply) in rx {
                    let _ = reply.send(handle(&mut enigo, request));
                }
                trace!(target: "tactile::input", "Input thread exiting");
            })
            .map_err(|e| InputError::Device(format!("Failed to spawn input thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| InputError::Device("Input thread exited during startup".into()))??;
        Ok(Self { tx })
    }

    fn call(&self, request: Request) -> Reply {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send((request, reply_tx))
            .map_err(|_| InputError::Device("Input thread is gone".into()))?;
        reply_rx
            .recv()
            .map_err(|_| InputError::Device("Input thread dropped the request".into()))?
    }
}

fn handle(enigo: &mut Enigo, request: Request) -> Reply {
    let failed = |e: enigo::InputError| InputError::Device(e.to_string());
    match request {
        Request::MoveTo(x, y) => enigo.move_mouse(x, y, Coordinate::Abs).map_err(failed)?,
        Request::Position => return enigo.location().map(Some).map_err(failed),
        Request::Button(b, d) => enigo.button(map_mouse_button(b), d).map_err(failed)?,
        Request::Key(k, d) => enigo.key(map_key(k), d).map_err(failed)?,
        Request::Text(t) => enigo.text(&t).map_err(failed)?,
    }
    Ok(None)
}

impl InputDevice for EnigoDevice {
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), InputError> {
        self.call(Request::MoveTo(x, y)).map(|_| ())
    }

    fn position(&mut self) -> Result<(i32, i32), InputError> {
        self.call(Request::Position)?
            .ok_or_else(|| InputError::Device("No pointer location returned".into()))
    }

    fn press_button(&mut self, button: MouseButton) -> Result<(), InputError> {
        self.call(Request::Button(button, Direction::Press)).map(|_| ())
    }

    fn release_button(&mut self, button: MouseButton) -> Result<(), InputError> {
        self.call(Request::Button(button, Direction::Release))
            .map(|_| ())
    }

    fn press_key(&mut self, key: Key) -> Result<(), InputError> {
        self.call(Request::Key(key, Direction::Press)).map(|_| ())
    }

    fn release_key(&mut self, key: Key) -> Result<(), InputError> {
        self.call(Request::Key(key, Direction::Release)).map(|_| ())
    }

    fn text(&mut self, text: &str) -> Result<(), InputError> {
        self.call(Request::Text(text.to_string())).map(|_| ())
    }
}

fn map_mouse_button(btn: MouseButton) -> EButton {
    match btn {
        MouseButton::Left => EButton::Left,
        MouseButton::Middle => EButton::Middle,
        MouseButton::Right => EButton::Right,
    }
}

fn map_key(key: Key) -> EKey {
    match key {
        Key::Control => EKey::Control,
        Key::Shift => EKey::Shift,
        Key::Alt => EKey::Alt,
        Key::Meta => EKey::Meta,
        Key::Enter => EKey::Return,
        Key::Tab => EKey::Tab,
        Key::Escape => EKey::Escape,
        Key::Backspace => EKey::Backspace,
        Key::Delete => EKey::Delete,
        Key::Space => EKey::Space,
        Key::Up => EKey::UpArrow,
        Key::Down => EKey::DownArrow,
        Key::Left => EKey::LeftArrow,
        Key::Right => EKey::RightArrow,
        Key::Home => EKey::Home,
        Key::End => EKey::End,
        Key::PageUp => EKey::PageUp,
        Key::PageDown => EKey::PageDown,
        Key::CapsLock => EKey::CapsLock,
        Key::F(n) => match n {
            1 => EKey::F1,
            2 => EKey::F2,
            3 => EKey::F3,
            4 => EKey::F4,
            5 => EKey::F5,
            6 => EKey::F6,
            7 => EKey::F7,
            8 => EKey::F8,
            9 => EKey::F9,
            10 => EKey::F10,
            11 => EKey::F11,
            _ => EKey::F12,
        },
        Key::Char(c) => EKey::Unicode(c),
    }
}

// --- Recording ---

/// One call observed by a [`RecordingDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Move(i32, i32),
    ButtonDown(MouseButton),
    ButtonUp(MouseButton),
    KeyDown(Key),
    KeyUp(Key),
    Text(String),
}

#[derive(Debug, Default)]
struct Recording {
    position: (i32, i32),
    events: Vec<DeviceEvent>,
    fail_presses: bool,
    fail_releases: bool,
}

/// In-memory device. Clones share the same log, so a test can keep one clone and hand
/// the other to the engine.
#[derive(Debug, Clone, Default)]
pub struct RecordingDevice {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(x: i32, y: i32) -> Self {
        let device = Self::default();
        device.lock().position = (x, y);
        device
    }

    /// Make every release call fail (emergency-stop tests).
    pub fn fail_releases(&self, fail: bool) {
        self.lock().fail_releases = fail;
    }

    /// Make every button or key press fail.
    pub fn fail_presses(&self, fail: bool) {
        self.lock().fail_presses = fail;
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.lock().events.clone()
    }

    pub fn clear(&self) {
        self.lock().events.clear();
    }

    /// Last pointer position written.
    pub fn current_position(&self) -> (i32, i32) {
        self.lock().position
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        // A poisoned recorder only means a test thread panicked mid-call; keep the log.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: DeviceEvent) -> Result<(), InputError> {
        let mut rec = self.lock();
        let is_release = matches!(event, DeviceEvent::ButtonUp(_) | DeviceEvent::KeyUp(_));
        if rec.fail_releases && is_release {
            return Err(InputError::Device("injected release failure".into()));
        }
        let is_press = matches!(event, DeviceEvent::ButtonDown(_) | DeviceEvent::KeyDown(_));
        if rec.fail_presses && is_press {
            return Err(InputError::Device("injected press failure".into()));
        }
        if let DeviceEvent::Move(x, y) = event {
            rec.position = (x, y);
        }
        rec.events.push(event);
        Ok(())
    }
}

impl InputDevice for RecordingDevice {
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), InputError> {
        self.record(DeviceEvent::Move(x, y))
    }

    fn position(&mut self) -> Result<(i32, i32), InputError> {
        Ok(self.lock().position)
    }

    fn press_button(&mut self, button: MouseButton) -> Result<(), InputError> {
        self.record(DeviceEvent::ButtonDown(button))
    }

    fn release_button(&mut self, button: MouseButton) -> Result<(), InputError> {
        self.record(DeviceEvent::ButtonUp(button))
    }

    fn press_key(&mut self, key: Key) -> Result<(), InputError> {
        self.record(DeviceEvent::KeyDown(key))
    }

    fn release_key(&mut self, key: Key) -> Result<(), InputError> {
        self.record(DeviceEvent::KeyUp(key))
    }

    fn text(&mut self, text: &str) -> Result<(), InputError> {
        self.record(DeviceEvent::Text(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_all_attempts_everything_despite_failures() {
        let device = RecordingDevice::new();
        device.fail_releases(true);
        let mut handle = device.clone();
        assert_eq!(handle.release_all(), ALL_BUTTONS.len() + Key::MODIFIERS.len());

        device.fail_releases(false);
        assert_eq!(handle.release_all(), 0);
        assert_eq!(device.events().len(), 7);
    }

    #[test]
    fn shared_device_tracks_position() {
        let device = RecordingDevice::at(5, 6);
        let shared = share(device.clone());
        assert_eq!(with_device(&shared, |d| d.position()).unwrap(), (5, 6));
        with_device(&shared, |d| d.move_to(7, 8)).unwrap();
        assert_eq!(device.current_position(), (7, 8));
        assert_eq!(device.events(), vec![DeviceEvent::Move(7, 8)]);
    }
}
