#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/*!
Workflow execution.

This module wires together:
- `session`: the mutable state of the active run and its status snapshot
- `events`: lifecycle and progress notifications broadcast to subscribers
- `error`: engine errors and the policy of which ones `continueOnError` may discard
- `runtime`: `Engine`, the recursive interpreter, and `EngineHandle`, its control surface

Typical usage:
- Construct an `Engine` with settings, an input device, a frame grabber and a template loader.
- Subscribe to events and keep a handle for pause/resume/stop from other tasks.
- Call `Engine::execute` with a validated `Workflow`.

Example:
```no_run
use tactile::config::{Settings, load_from_path};
use tactile::detect::{FsTemplateLoader, XcapGrabber};
use tactile::executor::{Engine, ExecuteOptions};
use tactile::input::{RecordingDevice, share};

# async fn run() -> anyhow::Result<()> {
let workflow = load_from_path("workflows/login.json")?;
let engine = Engine::new(
    Settings::default(),
    share(RecordingDevice::new()),
    Box::new(XcapGrabber::new()),
    Box::new(FsTemplateLoader),
);
let handle = engine.handle();
tokio::spawn(async move {
    tokio::signal::ctrl_c().await.ok();
    handle.emergency_stop();
});
let outcome = engine.execute(&workflow, ExecuteOptions { dry_run: true }).await?;
println!("{outcome:?}");
# Ok(())
# }
```
*/

pub mod error;
pub mod events;
pub mod runtime;
pub mod session;


pub use error::EngineError;
pub use events::{EngineEvent, LoopScope};
pub use runtime::{Engine, EngineHandle, ExecuteOptions, RunOutcome, RunStatus};
pub use session::{ActionPath, ExecutionSession, SessionState, StatusSnapshot};
