//! Serial command source: turns a UART into a stream of received chunks.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::config::{DataBits, FlowControl, Parity, SerialSettings, StopBits};

const READ_BUFFER_SIZE: usize = 256;

/// Sending half of a [`CommandStream`].
pub type ChunkSender = mpsc::UnboundedSender<Vec<u8>>;

/// Errors opening the serial line.
#[derive(Debug, Error)]
pub enum SerialError {
    /// A configured value has no equivalent on this platform.
    #[error("unsupported {field} setting: {value}")]
    Unsupported {
        /// Setting name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
    /// The port could not be opened.
    #[error("cannot open {port}: {source}")]
    Open {
        /// Port identifier.
        port: String,
        /// Driver error.
        source: tokio_serial::Error,
    },
}

/// Received chunks, in arrival order, for a single subscriber.
#[derive(Debug)]
pub struct CommandStream {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl CommandStream {
    /// Create a stream fed by the returned sender.
    #[must_use]
    pub fn channel() -> (ChunkSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next chunk. `None` once the line is gone.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// An opened serial line that has not been subscribed to yet.
pub struct SerialCommandSource {
    port: SerialStream,
    name: String,
}

impl std::fmt::Debug for SerialCommandSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialCommandSource")
            .field("port", &"<SerialStream>")
            .field("name", &self.name)
            .finish()
    }
}

impl SerialCommandSource {
    /// Open the port described by `settings`.
    ///
    /// Must be called from within a tokio runtime. There is no retry; the
    /// caller decides whether to go on without serial input.
    pub fn open(settings: &SerialSettings) -> Result<Self, SerialError> {
        let port = tokio_serial::new(settings.port_name.as_str(), settings.baud_rate)
            .data_bits(data_bits(settings.data_bits)?)
            .parity(parity(settings.parity)?)
            .stop_bits(stop_bits(settings.stop_bits)?)
            .flow_control(flow_control(settings.flow_control)?)
            .open_native_async()
            .map_err(|source| SerialError::Open {
                port: settings.port_name.clone(),
                source,
            })?;

        info!("connected to {settings}");

        Ok(Self {
            port,
            name: settings.port_name.clone(),
        })
    }

    /// Start delivering chunks to the one and only subscriber.
    ///
    /// Spawns the reader task on the current runtime.
    #[must_use]
    pub fn subscribe(self) -> CommandStream {
        let (tx, stream) = CommandStream::channel();
        tokio::spawn(forward_chunks(self.port, self.name, tx));
        stream
    }
}

/// Forward every successful read as one chunk until EOF, a read error, or
/// the subscriber going away.
pub async fn forward_chunks<R>(mut reader: R, name: String, tx: ChunkSender)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                info!(port = %name, "serial line closed");
                break;
            }
            Ok(n) => {
                let chunk = buf.get(..n).unwrap_or_default().to_vec();
                debug!(port = %name, bytes = n, "serial data received");
                if tx.send(chunk).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(port = %name, "serial read failed: {err}");
                break;
            }
        }
    }
}

fn unsupported(field: &'static str, value: impl std::fmt::Debug) -> SerialError {
    SerialError::Unsupported {
        field,
        value: format!("{value:?}"),
    }
}

fn data_bits(bits: DataBits) -> Result<tokio_serial::DataBits, SerialError> {
    match bits {
        DataBits::Five => Ok(tokio_serial::DataBits::Five),
        DataBits::Six => Ok(tokio_serial::DataBits::Six),
        DataBits::Seven => Ok(tokio_serial::DataBits::Seven),
        DataBits::Eight => Ok(tokio_serial::DataBits::Eight),
        DataBits::Unknown => Err(unsupported("data bits", bits)),
    }
}

fn parity(parity: Parity) -> Result<tokio_serial::Parity, SerialError> {
    match parity {
        Parity::None => Ok(tokio_serial::Parity::None),
        Parity::Even => Ok(tokio_serial::Parity::Even),
        Parity::Odd => Ok(tokio_serial::Parity::Odd),
        Parity::Space | Parity::Mark | Parity::Unknown => Err(unsupported("parity", parity)),
    }
}

fn stop_bits(bits: StopBits) -> Result<tokio_serial::StopBits, SerialError> {
    match bits {
        StopBits::One => Ok(tokio_serial::StopBits::One),
        StopBits::Two => Ok(tokio_serial::StopBits::Two),
        StopBits::OneAndHalf | StopBits::Unknown => Err(unsupported("stop bits", bits)),
    }
}

fn flow_control(flow: FlowControl) -> Result<tokio_serial::FlowControl, SerialError> {
    match flow {
        FlowControl::None => Ok(tokio_serial::FlowControl::None),
        FlowControl::Hardware => Ok(tokio_serial::FlowControl::Hardware),
        FlowControl::Software => Ok(tokio_serial::FlowControl::Software),
        FlowControl::Unknown => Err(unsupported("flow control", flow)),
    }
}
