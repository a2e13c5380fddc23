/// Local IPC channel between external triggers and the running engine.
///
/// One well-known endpoint per user session, with at most one listener. The
/// listener that binds it first owns it, which gives the daemon its
/// single-instance guarantee.
///
///   - Windows: named pipe `\\.\pipe\runlights_ipc`
///   - Unix:    domain socket `<runtime dir>/runlights_ipc.sock`
///
/// Each connection carries one newline-terminated JSON message and is then closed.
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::AsyncWriteExt;

pub const CHANNEL_NAME: &str = "runlights_ipc";

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("another RunLights instance is already listening")]
    AlreadyRunning,
    #[error("RunLights is not running (no listener on the IPC channel)")]
    NotListening,
    #[error("IPC I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Address of the local channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcEndpoint {
    address: String,
}

impl IpcEndpoint {
    /// Platform address for the channel called `name`.
    pub fn named(name: &str) -> Self {
        Self { address: imp::address_for(name) }
    }

    /// Uses `address` verbatim (a socket path on Unix, a pipe path on Windows).
    pub fn at(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Default for IpcEndpoint {
    fn default() -> Self {
        Self::named(CHANNEL_NAME)
    }
}

/// Messages accepted on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcMessage {
    /// Select the console/system bound under `name`.
    Console { name: String },
    /// Feed a numeric level into the active fullfade mode.
    Level { value: f64 },
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unsupported message type '{0}'")]
    UnsupportedType(String),
    #[error("console message has an empty name")]
    MissingName,
}

impl IpcMessage {
    /// Parses one message, distinguishing unknown `type`s from broken JSON.
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        let value: serde_json::Value =
            serde_json::from_str(raw.trim()).map_err(|e| MessageError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| MessageError::Malformed("missing string field 'type'".into()))?;
        if !matches!(kind, "console" | "level") {
            return Err(MessageError::UnsupportedType(kind.to_string()));
        }

        let message: IpcMessage =
            serde_json::from_value(value).map_err(|e| MessageError::Malformed(e.to_string()))?;
        match &message {
            IpcMessage::Console { name } if name.trim().is_empty() => Err(MessageError::MissingName),
            _ => Ok(message),
        }
    }

    /// Wire form: compact JSON plus a trailing newline.
    pub fn encode(&self) -> String {
        // Serializing a plain enum of strings and floats cannot fail.
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

/// Exclusive listener on the channel.
pub struct IpcListener {
    inner: imp::Listener,
}

pub type ServerStream = imp::ServerStream;
pub type ClientStream = imp::ClientStream;

impl IpcListener {
    /// Waits for the next client connection.
    pub async fn accept(&mut self) -> io::Result<ServerStream> {
        self.inner.accept().await
    }
}

/// Becomes the sole listener on `endpoint`, or fails with [`IpcError::AlreadyRunning`].
pub async fn bind(endpoint: &IpcEndpoint) -> Result<IpcListener, IpcError> {
    Ok(IpcListener { inner: imp::bind(&endpoint.address).await? })
}

/// Connects to a running engine, or fails with [`IpcError::NotListening`].
pub async fn connect(endpoint: &IpcEndpoint) -> Result<ClientStream, IpcError> {
    imp::connect(&endpoint.address).await
}

/// Delivers one message. No acknowledgement is expected.
pub async fn send(endpoint: &IpcEndpoint, message: &IpcMessage) -> Result<(), IpcError> {
    let mut stream = connect(endpoint).await?;
    stream.write_all(message.encode().as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

// ── Unix implementation ────────────────────────────────────────────────────────

#[cfg(unix)]
mod imp {
    use std::io;
    use std::path::PathBuf;
    use tokio::net::{UnixListener, UnixStream};

    use super::IpcError;

    pub type ServerStream = UnixStream;
    pub type ClientStream = UnixStream;

    pub fn address_for(name: &str) -> String {
        let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
        dir.join(format!("{name}.sock")).to_string_lossy().into_owned()
    }

    pub struct Listener {
        inner: UnixListener,
        path: PathBuf,
    }

    impl Listener {
        pub async fn accept(&mut self) -> io::Result<UnixStream> {
            let (stream, _) = self.inner.accept().await?;
            Ok(stream)
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    pub async fn bind(address: &str) -> Result<Listener, IpcError> {
        let path = PathBuf::from(address);
        if path.exists() {
            // A socket file with a live listener behind it means another instance.
            // One nobody answers on is left over from a crash and can go.
            if UnixStream::connect(&path).await.is_ok() {
                return Err(IpcError::AlreadyRunning);
            }
            std::fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let inner = UnixListener::bind(&path).map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse => IpcError::AlreadyRunning,
            _ => IpcError::Io(e),
        })?;
        Ok(Listener { inner, path })
    }

    pub async fn connect(address: &str) -> Result<UnixStream, IpcError> {
        UnixStream::connect(address).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => IpcError::NotListening,
            _ => IpcError::Io(e),
        })
    }
}

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::io;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };
    use tokio::time::{sleep, Duration};
    use windows::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_PIPE_BUSY};

    use super::IpcError;

    pub type ServerStream = NamedPipeServer;
    pub type ClientStream = NamedPipeClient;

    const BUSY_RETRIES: u32 = 20;
    const BUSY_BACKOFF: Duration = Duration::from_millis(50);

    pub fn address_for(name: &str) -> String {
        format!(r"\\.\pipe\{name}")
    }

    /// Holds the next unconnected pipe instance so a client can always find one.
    pub struct Listener {
        address: String,
        next: NamedPipeServer,
    }

    impl Listener {
        pub async fn accept(&mut self) -> io::Result<NamedPipeServer> {
            self.next.connect().await?;
            let fresh = ServerOptions::new().create(&self.address)?;
            Ok(std::mem::replace(&mut self.next, fresh))
        }
    }

    pub async fn bind(address: &str) -> Result<Listener, IpcError> {
        match ServerOptions::new().first_pipe_instance(true).create(address) {
            Ok(next) => Ok(Listener { address: address.to_string(), next }),
            Err(e) if e.raw_os_error() == Some(ERROR_ACCESS_DENIED.0 as i32) => {
                Err(IpcError::AlreadyRunning)
            }
            Err(e) => Err(IpcError::Io(e)),
        }
    }

    pub async fn connect(address: &str) -> Result<NamedPipeClient, IpcError> {
        let mut attempts = 0;
        loop {
            match ClientOptions::new().open(address) {
                Ok(client) => return Ok(client),
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY.0 as i32) => {
                    attempts += 1;
                    if attempts >= BUSY_RETRIES {
                        return Err(IpcError::Io(e));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(IpcError::NotListening),
                Err(e) => return Err(IpcError::Io(e)),
            }
            sleep(BUSY_BACKOFF).await;
        }
    }
}
