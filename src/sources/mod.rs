/*!
Control sources (orchestration layer).

This module defines `ControlCommand`, the `ControlSource` trait and the helpers that
route commands to a running engine. Concrete sources live in their own files:

- `file.rs`         -> `FileSource`  (poll a control file, delete it after reading)
- `stdin_source.rs` -> `StdinSource` (one command per line from standard input)

Each source is responsible for:
- Parsing raw lines into `ControlCommand`s (`parse_command`)
- Pushing commands via `Sender<ControlCommand>` while respecting backpressure
- Logging malformed input and continuing (never panicking inside tasks)
- Ending cleanly when the channel closes or the cancellation token fires
*/

use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::{EngineError, EngineHandle, StatusSnapshot};

pub mod file;
pub mod stdin_source;

pub use file::FileSource;
pub use stdin_source::StdinSource;

/// A request to change the state of the running workflow.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Pause,
    Resume,
    Stop,
    #[serde(alias = "emergency_stop", alias = "halt")]
    Emergency,
    Status,
}

#[derive(Debug, Error)]
#[error("Unrecognized control command: '{0}'")]
pub struct UnknownCommand(pub String);

impl FromStr for ControlCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(ControlCommand::Pause),
            "resume" => Ok(ControlCommand::Resume),
            "stop" => Ok(ControlCommand::Stop),
            "emergency" | "emergency_stop" | "halt" => Ok(ControlCommand::Emergency),
            "status" => Ok(ControlCommand::Status),
            _ => Err(UnknownCommand(s.trim().to_string())),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    command: ControlCommand,
}

/// Parse one line: a bare word (`pause`), a JSON string (`"pause"`) or an object
/// (`{"command":"pause"}`). Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ControlCommand>, UnknownCommand> {
    let raw = line.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if raw.starts_with('{') {
        return serde_json::from_str::<Envelope>(raw)
            .map(|e| Some(e.command))
            .map_err(|_| UnknownCommand(raw.to_string()));
    }
    if raw.starts_with('"') {
        return serde_json::from_str::<ControlCommand>(raw)
            .map(Some)
            .map_err(|_| UnknownCommand(raw.to_string()));
    }
    raw.parse().map(Some)
}

/// Trait implemented by all control sources.
///
/// A source spawns a task that produces commands into the channel until its input
/// ends, the receiver goes away, or `cancel` fires.
pub trait ControlSource: Send + Sync {
    /// Static human-readable identifier (used in logs).
    fn name(&self) -> &'static str;

    /// Start the source in the background.
    fn start(&self, sender: Sender<ControlCommand>, cancel: CancellationToken) -> JoinHandle<()>;
}

/// Spawn every source, returning their `JoinHandle`s.
pub fn spawn_all_sources(
    sources: &[Box<dyn ControlSource>],
    sender: Sender<ControlCommand>,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    sources
        .iter()
        .map(|src| {
            info!(
                target: "tactile::sources",
                source = %src.name(),
                "Starting control source"
            );
            src.start(sender.clone(), cancel.child_token())
        })
        .collect()
}

/// Apply a command to the engine. `Status` returns the current snapshot.
pub fn apply_command(
    handle: &EngineHandle,
    command: ControlCommand,
) -> Result<Option<StatusSnapshot>, EngineError> {
    info!(target: "tactile::sources", ?command, "Control command");
    match command {
        ControlCommand::Pause => handle.pause()?,
        ControlCommand::Resume => handle.resume()?,
        ControlCommand::Stop => handle.stop()?,
        ControlCommand::Emergency => {
            let failures = handle.emergency_stop();
            if failures > 0 {
                warn!(target: "tactile::sources", failures, "Some releases failed");
            }
        }
        ControlCommand::Status => return Ok(Some(handle.status())),
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::detect::{MemoryTemplateLoader, StaticFrameGrabber};
    use crate::executor::{Engine, SessionState};
    use crate::input::{RecordingDevice, share};
    use image::RgbaImage;

    #[test]
    fn accepts_every_spelling() {
        let cases = [
            (" Pause ", ControlCommand::Pause),
            ("\"resume\"", ControlCommand::Resume),
            (r#"{"command":"stop"}"#, ControlCommand::Stop),
            ("halt", ControlCommand::Emergency),
            (r#"{"command":"emergency_stop"}"#, ControlCommand::Emergency),
            ("STATUS", ControlCommand::Status),
        ];
        for (line, expected) in cases {
            assert_eq!(parse_command(line).unwrap(), Some(expected), "{line}");
        }
        assert_eq!(parse_command("   ").unwrap(), None);
        assert!(parse_command("jump").is_err());
        assert!(parse_command(r#"{"command":"jump"}"#).is_err());
    }

    #[test]
    fn applies_commands_to_an_idle_engine() {
        let engine = Engine::new(
            Settings::default(),
            share(RecordingDevice::new()),
            Box::new(StaticFrameGrabber::new(RgbaImage::new(4, 4))),
            Box::new(MemoryTemplateLoader::new()),
        );
        let handle = engine.handle();

        let status = apply_command(&handle, ControlCommand::Status).unwrap();
        assert_eq!(status.map(|s| s.state), Some(SessionState::Idle));
        assert!(matches!(
            apply_command(&handle, ControlCommand::Pause),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert_eq!(apply_command(&handle, ControlCommand::Emergency).unwrap(), None);
    }
}
