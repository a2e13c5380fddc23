/// IPC gateway: accepts trigger connections one at a time and forwards each
/// valid message to the engine queue.
///
/// Each connection is read and validated before the next accept, so
/// concurrent senders queue up at the OS level. Nothing is written back to
/// the sender; a bad message is logged and the connection is closed.
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::event::EngineEvent;
use crate::ipc::{IpcListener, IpcMessage, MessageError};

/// Upper bound on one message, newline included.
pub const MAX_MESSAGE_BYTES: u64 = 64 * 1024;
/// How long a client may take to deliver its message.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Runs the accept loop until `shutdown` flips to `true` or the engine goes away.
///
/// A connection is finished once its message is queued; the engine dispatches
/// it afterwards, in queue order, while the next connection is accepted.
pub async fn run(
    mut listener: IpcListener,
    tx: mpsc::Sender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("[ipc] Listening for triggers");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[ipc] Accept failed: {e}");
                sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        let Some(event) = handle_connection(stream).await else { continue };
        if tx.send(event).await.is_err() {
            break;
        }
    }
    debug!("[ipc] Stopped");
}

/// Reads and validates one message. Returns the event to forward, if any.
/// The stream is dropped (closing the connection) on return.
pub async fn handle_connection<S: AsyncRead + Unpin>(stream: S) -> Option<EngineEvent> {
    let raw = match timeout(READ_TIMEOUT, read_message(stream)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            warn!("[ipc] Failed to read message: {e}");
            return None;
        }
        Err(_) => {
            warn!("[ipc] Client sent nothing within {READ_TIMEOUT:?}");
            return None;
        }
    };

    // A second instance checking for a listener connects and hangs up.
    if raw.trim().is_empty() {
        debug!("[ipc] Empty connection");
        return None;
    }

    match IpcMessage::parse(&raw) {
        Ok(IpcMessage::Console { name }) => {
            let name = name.trim().to_lowercase();
            info!(console = %name, "[ipc] Console trigger received");
            Some(EngineEvent::Console(name))
        }
        Ok(IpcMessage::Level { value }) => {
            info!(value, "[ipc] Level trigger received");
            Some(EngineEvent::Level(value))
        }
        Err(MessageError::UnsupportedType(kind)) => {
            warn!("[ipc] Ignoring message with unsupported type '{kind}'");
            None
        }
        Err(e) => {
            warn!("[ipc] {e}");
            None
        }
    }
}

async fn read_message<S: AsyncRead + Unpin>(stream: S) -> io::Result<String> {
    let mut reader = BufReader::new(stream.take(MAX_MESSAGE_BYTES));
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{self, tests::unique_endpoint};
    use tokio::io::AsyncWriteExt;

    async fn handle_bytes(bytes: &[u8]) -> Option<EngineEvent> {
        handle_connection(bytes).await
    }

    #[tokio::test]
    async fn console_message_is_normalized() {
        let event = handle_bytes(b"{\"type\":\"console\",\"name\":\" SNES \"}\n").await;
        assert_eq!(event, Some(EngineEvent::Console("snes".into())));
    }

    #[tokio::test]
    async fn message_without_newline_is_read_to_eof() {
        let event = handle_bytes(br#"{"type":"level","value":12}"#).await;
        assert_eq!(event, Some(EngineEvent::Level(12.0)));
    }

    #[tokio::test]
    async fn only_the_first_line_counts() {
        let event = handle_bytes(
            b"{\"type\":\"console\",\"name\":\"snes\"}\n{\"type\":\"console\",\"name\":\"n64\"}\n",
        )
        .await;
        assert_eq!(event, Some(EngineEvent::Console("snes".into())));
    }

    #[tokio::test]
    async fn malformed_unsupported_and_empty_are_dropped() {
        assert_eq!(handle_bytes(b"garbage\n").await, None);
        assert_eq!(handle_bytes(b"{\"type\":\"shutdown\"}\n").await, None);
        assert_eq!(handle_bytes(b"").await, None);
        assert_eq!(handle_bytes(&[0xff, 0xfe, b'\n']).await, None);
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let mut big = b"{\"type\":\"console\",\"name\":\"".to_vec();
        big.extend(std::iter::repeat(b'a').take(MAX_MESSAGE_BYTES as usize));
        big.extend(b"\"}\n");
        assert_eq!(handle_bytes(&big).await, None);
    }

    #[tokio::test]
    async fn gateway_forwards_and_keeps_listening() {
        let endpoint = unique_endpoint("gateway");
        let listener = ipc::bind(&endpoint).await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(listener, tx, stop_rx));

        // A malformed message must not stop the gateway.
        let mut bad = ipc::connect(&endpoint).await.unwrap();
        bad.write_all(b"{oops\n").await.unwrap();
        bad.shutdown().await.unwrap();
        drop(bad);

        ipc::send(&endpoint, &IpcMessage::Console { name: "snes".into() }).await.unwrap();
        ipc::send(&endpoint, &IpcMessage::Level { value: 3.0 }).await.unwrap();

        assert_eq!(rx.recv().await, Some(EngineEvent::Console("snes".into())));
        assert_eq!(rx.recv().await, Some(EngineEvent::Level(3.0)));

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
