use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tactile::config::{self as cfg, Settings};
use tactile::detect::{FsTemplateLoader, XcapGrabber};
use tactile::executor::{Engine, ExecuteOptions};
use tactile::input::{EnigoDevice, RecordingDevice, SharedDevice, share};
use tactile::sources::{self, ControlCommand, ControlSource, FileSource, StdinSource};

/// Tactile CLI
#[derive(Debug, Parser)]
#[command(
    name = tactile::PKG_NAME,
    version = tactile::PKG_VERSION,
    about = "Run humanized input workflows with screen detection"
)]
struct Args {
    /// Path to the JSON workflow file
    #[arg(short = 'w', long = "workflow", required_unless_present = "print_schema")]
    workflow: Option<PathBuf>,

    /// Path to a JSON settings file (defaults apply when omitted)
    #[arg(short = 's', long = "settings")]
    settings: Option<PathBuf>,

    /// Walk the workflow without injecting input or capturing the screen
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Directory holding template images (overrides settings)
    #[arg(long = "images-dir")]
    images_dir: Option<PathBuf>,

    /// Print every engine event to stdout as a JSON line
    #[arg(long = "events")]
    events: bool,

    /// Poll this file for control commands (pause, resume, stop, emergency, status)
    #[arg(long = "control-file")]
    control_file: Option<PathBuf>,

    /// Read control commands from stdin, one per line
    #[arg(long = "stdin-control")]
    stdin_control: bool,

    /// Set log level (e.g., trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Print the JSON Schema for workflows and exit
    #[arg(long = "print-schema")]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = args.log_level.as_deref().and_then(tactile::parse_level);
    tactile::init_tracing_with(level);
    if let (Some(raw), None) = (&args.log_level, level) {
        warn!(level = %raw, "Unknown log level, using default");
    }

    if args.print_schema {
        let schema = cfg::generate_schema();
        let json = serde_json::to_string_pretty(&schema)?;
        println!("{json}");
        return Ok(());
    }

    let Some(workflow_path) = &args.workflow else {
        anyhow::bail!("--workflow is required");
    };
    info!(
        version = tactile::PKG_VERSION,
        workflow = %workflow_path.display(),
        dry_run = args.dry_run,
        "Starting Tactile"
    );

    let workflow = cfg::load_from_path_async(workflow_path).await?;
    let mut settings = match &args.settings {
        Some(path) => cfg::load_settings_from_path_async(path).await?,
        None => Settings::default(),
    };
    if let Some(dir) = &args.images_dir {
        settings.detection.images_dir = dir.clone();
    }
    debug!(target: "tactile", "Workflow and settings loaded");

    // Dry runs never touch the device; avoid requiring a display for them.
    let device: SharedDevice = if args.dry_run {
        share(RecordingDevice::new())
    } else {
        share(EnigoDevice::spawn().context("Failed to initialize input device")?)
    };
    let engine = Arc::new(Engine::new(
        settings,
        device,
        Box::new(XcapGrabber::new()),
        Box::new(FsTemplateLoader),
    ));
    let handle = engine.handle();

    if args.events {
        let mut rx = engine.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "Failed to serialize event"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event printer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // Control sources
    let mut controls: Vec<Box<dyn ControlSource>> = Vec::new();
    if let Some(path) = &args.control_file {
        controls.push(Box::new(FileSource::new(path.clone(), None)));
    }
    if args.stdin_control {
        controls.push(Box::new(StdinSource::new()));
    }
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<ControlCommand>(32);
    let _sources = sources::spawn_all_sources(&controls, tx, &cancel);
    let control_handle = handle.clone();
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match sources::apply_command(&control_handle, command) {
                Ok(Some(status)) => match serde_json::to_string(&status) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "Failed to serialize status"),
                },
                Ok(None) => {}
                Err(e) => warn!(?command, error = %e, "Control command rejected"),
            }
        }
    });

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, emergency stop");
            ctrl_c_handle.emergency_stop();
        }
    });

    let result = engine
        .execute(
            &workflow,
            ExecuteOptions {
                dry_run: args.dry_run,
            },
        )
        .await;
    cancel.cancel();

    match result {
        Ok(outcome) => {
            info!(
                status = ?outcome.status,
                loops = outcome.loops_completed,
                actions = outcome.actions_executed,
                emergency = outcome.emergency,
                "Tactile exited"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Workflow failed");
            Err(e).context(format!("Workflow '{}' failed", workflow.name))
        }
    }
}
