//! Stdin control source.
//!
//! Reads one control command per line from standard input: bare words (`pause`),
//! JSON strings or `{"command": ".."}` objects.
//!
//! Behavior:
//! - Blank lines are ignored; unrecognized lines are logged with `warn!` and skipped.
//! - EOF, a closed channel, or cancellation ends the task.
//!
//! Useful for driving a run from a terminal or a pipe:
//!     tactile --workflow wf.json --stdin-control

use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc::Sender,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use super::{ControlCommand, ControlSource, parse_command};

/// Source that reads control commands from stdin.
#[derive(Debug, Clone, Default)]
pub struct StdinSource;

impl StdinSource {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ControlSource for StdinSource {
    fn name(&self) -> &'static str {
        "stdin"
    }

    fn start(&self, sender: Sender<ControlCommand>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(target: "tactile::sources", "StdinSource task started");
            read_commands(BufReader::new(io::stdin()), sender, cancel).await;
            trace!(target: "tactile::sources", "StdinSource task ended");
        })
    }
}

/// Forward commands read line by line from `reader` until EOF, a closed channel, or
/// cancellation.
pub async fn read_commands<R>(reader: R, sender: Sender<ControlCommand>, cancel: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match next {
            Ok(Some(line)) => match parse_command(&line) {
                Ok(Some(command)) => {
                    if sender.send(command).await.is_err() {
                        trace!(target: "tactile::sources", "Command channel closed");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(target: "tactile::sources", error = %e, "Ignoring input line"),
            },
            Ok(None) => {
                info!(target: "tactile::sources", "EOF on control input");
                break;
            }
            Err(e) => {
                warn!(target: "tactile::sources", error = %e, "Error reading control input");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn forwards_parsed_lines_until_eof() {
        let (tx, mut rx) = mpsc::channel(8);
        let input: &[u8] = b"pause\n\njump\n{\"command\":\"resume\"}\nstop\n";
        read_commands(input, tx, CancellationToken::new()).await;

        let mut got = Vec::new();
        while let Some(cmd) = rx.recv().await {
            got.push(cmd);
        }
        assert_eq!(
            got,
            vec![ControlCommand::Pause, ControlCommand::Resume, ControlCommand::Stop]
        );
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let (tx, _rx) = mpsc::channel(1);
        let (_writer, reader) = io::duplex(64);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(read_commands(BufReader::new(reader), tx, cancel.clone()));
        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn name() {
        assert_eq!(StdinSource::new().name(), "stdin");
    }
}
