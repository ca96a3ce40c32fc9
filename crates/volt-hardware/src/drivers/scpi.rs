//! LF-terminated SCPI line transport shared by the serial drivers.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::trace;
use volt_core::error::{InstrumentError, InstrumentResult};
use volt_core::serial::{drain_serial_buffer, SharedPort};

/// How long a pre-query drain waits for stray bytes.
const DRAIN_WINDOW: Duration = Duration::from_millis(5);

/// A serial port speaking one SCPI command per line.
pub struct ScpiPort {
    port: SharedPort,
    device: &'static str,
    write_timeout: Duration,
}

impl ScpiPort {
    pub fn new(port: SharedPort, device: &'static str, write_timeout: Duration) -> Self {
        Self {
            port,
            device,
            write_timeout,
        }
    }

    /// Send `command` followed by LF. No reply is read.
    pub async fn write_line(&self, command: &str) -> InstrumentResult<()> {
        let mut port = self.port.lock().await;
        self.write_locked(&mut port, command).await
    }

    /// Send `command` and read one reply line.
    ///
    /// `Ok(None)` when nothing arrived within `window`. When `drain` is set,
    /// stale input is discarded before the command goes out.
    pub async fn query(
        &self,
        command: &str,
        window: Duration,
        drain: bool,
    ) -> InstrumentResult<Option<String>> {
        let mut port = self.port.lock().await;

        if drain {
            drain_serial_buffer(&mut *port, DRAIN_WINDOW).await;
        }
        self.write_locked(&mut port, command).await?;

        let mut response = String::new();
        match tokio::time::timeout(window, port.read_line(&mut response)).await {
            Err(_) => {
                trace!(device = self.device, command, "no reply within window");
                Ok(None)
            }
            Ok(Err(e)) => Err(InstrumentError::from_io(self.device, &e)),
            Ok(Ok(0)) => Err(InstrumentError::io(
                self.device,
                format!("port closed while waiting for reply to {}", command),
            )),
            Ok(Ok(_)) => {
                let trimmed = response.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
        }
    }

    async fn write_locked(
        &self,
        port: &mut tokio::io::BufReader<volt_core::serial::DynSerial>,
        command: &str,
    ) -> InstrumentResult<()> {
        let line = format!("{}\n", command);
        let write = async {
            let inner = port.get_mut();
            inner.write_all(line.as_bytes()).await?;
            inner.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => {
                trace!(device = self.device, command, "sent");
                Ok(())
            }
            Ok(Err(e)) => Err(InstrumentError::from_io(self.device, &e)),
            Err(_) => Err(InstrumentError::timeout(
                self.device,
                format!("write of {} timed out", command),
            )),
        }
    }
}
