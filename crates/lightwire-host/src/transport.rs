//! Serial transport bridge.
//!
//! `serialport` is blocking, so [`SerialLink`] runs two threads per port and
//! bridges them to an in-memory async pipe:
//!
//! ```text
//! device --read()--> rx thread --+                  +--> FrameReader
//!                                 |  tokio duplex    |
//! device <--write()-- tx thread <-+------------------+<-- FrameWriter
//! ```
//!
//! The pipeline only ever sees an `AsyncRead + AsyncWrite` stream, the same
//! contract tests satisfy with `tokio::io::duplex`. Device errors cross the
//! bridge too: a failed read surfaces from `poll_read` once the pipe drains,
//! and a failed write makes every later `poll_write`/`poll_flush` fail.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use lightwire_protocol::DEFAULT_READ_BUFFER;
use serde::Serialize;
use serialport::{DataBits, FlowControl, Parity, SerialPortType, StopBits};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{HostError, HostResult};

/// Default device path for the sensor board.
#[cfg(windows)]
pub const DEFAULT_DEVICE: &str = "COM5";
/// Default device path for the sensor board.
#[cfg(not(windows))]
pub const DEFAULT_DEVICE: &str = "/dev/ttyACM0";

/// Default line speed.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial link configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Device path (`/dev/ttyACM0`, `COM5`, ...).
    pub path: String,

    pub baud_rate: u32,

    /// How long a blocking read waits before re-checking for shutdown.
    pub poll_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl LinkConfig {
    /// Creates a configuration for the given device path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Builder: set baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Builder: set read poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// An open serial port exposed as an async byte stream.
///
/// Dropping the link closes the port: the rx thread stops at its next poll
/// and the tx thread stops once the pipe is closed.
pub struct SerialLink {
    stream: DuplexStream,
    state: Arc<LinkState>,
    path: String,
}

/// State shared between the link and its device threads.
struct LinkState {
    running: AtomicBool,
    read_fault: OnceLock<Fault>,
    write_fault: OnceLock<Fault>,
}

/// A device error, kept so it can be reported on the async side.
#[derive(Debug)]
struct Fault {
    kind: io::ErrorKind,
    message: String,
}

impl Fault {
    fn new(e: &io::Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }

    fn read_error(&self) -> io::Error {
        io::Error::new(self.kind, format!("serial read failed: {}", self.message))
    }

    /// Never `BrokenPipe`: the writer stage reads that as a clean close.
    fn write_error(&self) -> io::Error {
        io::Error::other(format!("serial write failed: {}", self.message))
    }
}

impl SerialLink {
    /// Opens and configures the port (8N1, no flow control).
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: &LinkConfig) -> HostResult<Self> {
        let port = serialport::new(&config.path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.poll_interval)
            .open()?;
        let writer = port.try_clone()?;

        info!(path = %config.path, baud = config.baud_rate, "Opened serial port");

        Self::bridge(config.path.clone(), port, writer)
    }

    /// Bridges a blocking reader/writer pair to an async stream.
    ///
    /// Reads that time out are retried. A zero-length read ends the stream
    /// cleanly; any other read error ends it with that error.
    pub fn bridge<R, W>(path: impl Into<String>, reader: R, writer: W) -> HostResult<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|_| HostError::config("serial link must be opened inside a tokio runtime"))?;
        let path = path.into();
        let (stream, bridge) = tokio::io::duplex(DEFAULT_READ_BUFFER);
        let (bridge_rx, bridge_tx) = tokio::io::split(bridge);
        let state = Arc::new(LinkState {
            running: AtomicBool::new(true),
            read_fault: OnceLock::new(),
            write_fault: OnceLock::new(),
        });

        {
            let state = state.clone();
            let runtime = runtime.clone();
            let path = path.clone();
            thread::Builder::new()
                .name("lightwire-serial-rx".into())
                .spawn(move || rx_loop(reader, bridge_tx, runtime, state, path))?;
        }
        {
            let state = state.clone();
            let path = path.clone();
            thread::Builder::new()
                .name("lightwire-serial-tx".into())
                .spawn(move || tx_loop(writer, bridge_rx, runtime, state, path))?;
        }

        Ok(Self {
            stream,
            state,
            path,
        })
    }

    /// Returns true while the device side of the link is still readable.
    pub fn is_open(&self) -> bool {
        self.state.running.load(Ordering::Relaxed)
    }

    /// Returns true once a write to the device has failed.
    pub fn write_failed(&self) -> bool {
        self.state.write_fault.get().is_some()
    }

    /// Device path this link was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Relaxed);
        debug!(path = %self.path, "Closing serial link");
    }
}

fn rx_loop<R: Read>(
    mut reader: R,
    mut pipe: tokio::io::WriteHalf<DuplexStream>,
    runtime: Handle,
    state: Arc<LinkState>,
    path: String,
) {
    let mut buf = vec![0u8; DEFAULT_READ_BUFFER];

    while state.running.load(Ordering::Relaxed) {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                info!(path = %path, "Serial device closed");
                break;
            }
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                continue;
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Serial read failed");
                // Set before the shutdown below so the reader sees it at EOF.
                let _ = state.read_fault.set(Fault::new(&e));
                break;
            }
        };

        if runtime.block_on(pipe.write_all(&buf[..n])).is_err() {
            debug!(path = %path, "Host side of serial link dropped");
            break;
        }
    }

    state.running.store(false, Ordering::Relaxed);
    // Signals end of stream to the frame reader.
    let _ = runtime.block_on(pipe.shutdown());
}

fn tx_loop<W: Write>(
    mut writer: W,
    mut pipe: tokio::io::ReadHalf<DuplexStream>,
    runtime: Handle,
    state: Arc<LinkState>,
    path: String,
) {
    let mut buf = vec![0u8; DEFAULT_READ_BUFFER];

    loop {
        let n = match runtime.block_on(pipe.read(&mut buf)) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if let Err(e) = writer.write_all(&buf[..n]).and_then(|()| writer.flush()) {
            warn!(path = %path, error = %e, "Serial write failed");
            let _ = state.write_fault.set(Fault::new(&e));
            break;
        }
    }

    debug!(path = %path, "Serial writer stopped");
}

impl AsyncRead for SerialLink {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.stream).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {
                match self.state.read_fault.get() {
                    Some(fault) => Poll::Ready(Err(fault.read_error())),
                    None => Poll::Ready(Ok(())),
                }
            }
            other => other,
        }
    }
}

impl AsyncWrite for SerialLink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(fault) = self.state.write_fault.get() {
            return Poll::Ready(Err(fault.write_error()));
        }
        if !self.is_open() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial link closed",
            )));
        }
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(fault) = self.state.write_fault.get() {
            return Poll::Ready(Err(fault.write_error()));
        }
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// A serial port found on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSummary {
    pub name: String,
    /// `usb`, `bluetooth`, `pci` or `unknown`.
    pub kind: &'static str,
    /// USB product string, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

/// Lists the serial ports the OS reports.
pub fn available_ports() -> HostResult<Vec<PortSummary>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let (kind, product) = match port.port_type {
                SerialPortType::UsbPort(usb) => ("usb", usb.product),
                SerialPortType::BluetoothPort => ("bluetooth", None),
                SerialPortType::PciPort => ("pci", None),
                SerialPortType::Unknown => ("unknown", None),
            };
            PortSummary {
                name: port.port_name,
                kind,
                product,
            }
        })
        .collect())
}
