//! File control source.
//!
//! Polls a single control-file path at a fixed interval.
//!
//! Behavior:
//! - When the file exists and has content, each non-blank line is parsed as a command and
//!   forwarded in order; the file is then deleted so the next command requires
//!   recreating it.
//! - Unrecognized lines are logged (warn) and skipped; the rest of the file still applies.
//! - A missing file is silent (the common case between commands).
//!
//! Cancellation / Exit:
//! - The task ends when the cancellation token fires or the channel closes.
//!
//! Typical use from a shell while a run is active:
//!     echo pause > /tmp/tactile.ctl

use std::path::PathBuf;
use std::time::Duration;

use tokio::{fs as afs, sync::mpsc::Sender, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use super::{ControlCommand, ControlSource, parse_command};

/// Source that polls a control file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    poll_ms: u64,
}

impl FileSource {
    /// Create a new `FileSource`.
    ///
    /// `poll_ms` defaults to 100ms, minimum 10ms.
    pub fn new(path: impl Into<PathBuf>, poll_ms: Option<u64>) -> Self {
        Self {
            path: path.into(),
            poll_ms: poll_ms.unwrap_or(100).max(10),
        }
    }

    pub fn poll_ms(&self) -> u64 {
        self.poll_ms
    }
}

impl ControlSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn start(&self, sender: Sender<ControlCommand>, cancel: CancellationToken) -> JoinHandle<()> {
        let path = self.path.clone();
        let interval = Duration::from_millis(self.poll_ms);

        tokio::spawn(async move {
            info!(
                target: "tactile::sources",
                path = %path.display(), poll_ms = interval.as_millis() as u64,
                "FileSource task started"
            );

            'poll: loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(interval) => {}
                }

                let content = match afs::read_to_string(&path).await {
                    Ok(c) => c,
                    // Missing: nothing queued.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        warn!(
                            target: "tactile::sources",
                            path = %path.display(), error = %e,
                            "Failed to read control file"
                        );
                        continue;
                    }
                };
                if content.trim().is_empty() {
                    trace!(target: "tactile::sources", path = %path.display(), "Control file empty");
                    continue;
                }
                if let Err(e) = afs::remove_file(&path).await {
                    warn!(
                        target: "tactile::sources",
                        path = %path.display(), error = %e,
                        "Failed to delete control file"
                    );
                }

                for line in content.lines() {
                    match parse_command(line) {
                        Ok(Some(command)) => {
                            if sender.send(command).await.is_err() {
                                trace!(target: "tactile::sources", "Command channel closed");
                                break 'poll;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(
                            target: "tactile::sources",
                            path = %path.display(), error = %e,
                            "Ignoring control line"
                        ),
                    }
                }
            }

            info!(target: "tactile::sources", path = %path.display(), "FileSource task ended");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn poll_interval_has_a_floor() {
        assert_eq!(FileSource::new("x", Some(50)).poll_ms(), 50);
        assert_eq!(FileSource::new("y", Some(1)).poll_ms(), 10);
        assert_eq!(FileSource::new("z", None).poll_ms(), 100);
    }

    #[tokio::test]
    async fn reads_commands_and_consumes_the_file() {
        let path = std::env::temp_dir().join(format!("tactile-ctl-{}.txt", std::process::id()));
        std::fs::write(&path, "pause\nbogus\n{\"command\":\"resume\"}\n").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = FileSource::new(&path, Some(10)).start(tx, cancel.clone());

        assert_eq!(rx.recv().await, Some(ControlCommand::Pause));
        assert_eq!(rx.recv().await, Some(ControlCommand::Resume));
        assert!(!path.exists());

        cancel.cancel();
        task.await.unwrap();
    }
}
