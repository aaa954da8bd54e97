//! Newline-delimited JSON output

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{Error, Result};

/// Spawn the single task that owns the output stream
///
/// Each string sent on the returned channel is written as one line and
/// flushed, so concurrent producers never interleave partial lines. The
/// task ends once every sender is dropped.
pub fn spawn_line_writer<W>(mut writer: W) -> (mpsc::UnboundedSender<String>, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| Error::Transport(format!("Failed to write output: {e}")))?;
            writer
                .write_all(b"\n")
                .await
                .map_err(|e| Error::Transport(format!("Failed to write output: {e}")))?;
            writer
                .flush()
                .await
                .map_err(|e| Error::Transport(format!("Failed to flush output: {e}")))?;
        }

        debug!("Output writer finished");
        Ok(())
    });

    (tx, handle)
}
