/*!
Humanized input.

Layers, leaves first:
- `timing`: Gaussian sampler, click jitter, typing-delay model
- `path`: wind/gravity path generation, speed curve, duration fitting, overshoot
- `keys`: key names and combos
- `device`: the input-injection capability (Enigo, in-memory recorder)
- `simulator`: `InputSimulator`, which composes all of the above into device-level
  operations (move, click, press, type, hold/release, emergency release)
*/

use thiserror::Error;

use crate::utils::Halted;

pub mod device;
pub mod keys;
pub mod path;
pub mod simulator;
pub mod timing;

pub use device::{DeviceEvent, EnigoDevice, InputDevice, RecordingDevice, SharedDevice, share};
pub use keys::{Key, parse_combo};
pub use simulator::{InputSimulator, MoveOptions};

/// Input errors.
#[derive(Debug, Error)]
pub enum InputError {
    /// Injection failed at the platform boundary.
    #[error("Input device error: {0}")]
    Device(String),

    #[error("Unknown key: '{0}'")]
    UnknownKey(String),

    #[error("Input halted by emergency stop")]
    Halted,
}

impl From<Halted> for InputError {
    fn from(_: Halted) -> Self {
        InputError::Halted
    }
}
