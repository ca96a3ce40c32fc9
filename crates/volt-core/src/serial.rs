//! Serial Port Abstractions for Instrument Drivers
//!
//! Shared types and helpers for async serial communication, so the supply and
//! meter drivers do not duplicate port plumbing.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//! - [`SharedPort`]: Mutex-protected serial port with buffered reading
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a port with spawn_blocking, classifying failures
//! - [`drain_serial_buffer`]: Discard stale bytes before a query
//! - [`resource_to_port`]: Strip a VISA `ASRL...::INSTR` wrapper
//!
//! # Example
//!
//! ```rust,ignore
//! use volt_core::serial::{open_serial_async, wrap_shared};
//!
//! let port = open_serial_async("/dev/ttyACM0", 115200, "meter").await?;
//! let shared = wrap_shared(Box::new(port));
//! ```

use crate::error::{FaultKind, InstrumentError, InstrumentResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Serial port shared between the methods of one driver.
///
/// `BufReader` gives line-oriented reads for the LF-terminated SCPI replies.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Create a SharedPort from a type-erased serial port.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Accept either a bare port path or a VISA serial resource string.
///
/// `ASRL/dev/ttyUSB0::INSTR` and `/dev/ttyUSB0` both yield `/dev/ttyUSB0`.
pub fn resource_to_port(address: &str) -> &str {
    let trimmed = address.trim();
    let without_prefix = trimmed.strip_prefix("ASRL").unwrap_or(trimmed);
    without_prefix
        .strip_suffix("::INSTR")
        .unwrap_or(without_prefix)
}

fn classify_serial_error(device: &str, port_path: &str, err: &tokio_serial::Error) -> InstrumentError {
    let kind = match err.kind {
        tokio_serial::ErrorKind::NoDevice => FaultKind::NotFound,
        tokio_serial::ErrorKind::InvalidInput => FaultKind::Rejected,
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => FaultKind::NotFound,
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::TimedOut) => FaultKind::Timeout,
        _ => FaultKind::Io,
    };
    InstrumentError::new(
        device,
        kind,
        format!("failed to open serial port {}: {}", port_path, err),
    )
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// `NotFound` when the port does not exist, `Timeout` when the OS reports a
/// timeout, `Io` otherwise.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> InstrumentResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| classify_serial_error(&device_name_owned, &port_path_owned, &e))
    })
    .await
    .map_err(|e| InstrumentError::io(device_name, format!("serial open task failed: {}", e)))?
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards until nothing arrives within `timeout`. Returns the
/// number of bytes discarded. Read errors end the drain silently; the next
/// real read will surface them.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout: Duration) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + timeout;
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    if total_discarded > 0 {
        tracing::trace!(bytes = total_discarded, "discarded stale serial input");
    }
    total_discarded
}
