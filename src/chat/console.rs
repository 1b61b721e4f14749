//! Line-oriented console channel: each stdin line is a chat message from the
//! local user, each reply is written back as `bot_name: text`.

use super::bridge::ChatBridge;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run until EOF or cancellation. Blank lines are skipped.
pub async fn run_console<R, W>(
    bridge: &ChatBridge,
    user_name: &str,
    reader: R,
    mut writer: W,
    cancel: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("Console input closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = bridge.handle_message(user_name, line).await;
        writer
            .write_all(format!("{}: {}\n", bridge.bot_name(), reply).as_bytes())
            .await?;
        writer.flush().await?;
    }
    Ok(())
}
