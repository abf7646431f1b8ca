//! Transport layer for I/O abstraction
//!
//! Each controller owns exactly one `Transport`; no two threads drive the
//! same handle. Link reset is done by closing and reopening the handle
//! (`reopen`), which clears the host-side transmit buffer and forces the
//! MCU's input state machine to resynchronize.

use crate::error::{Error, Result};

mod mock;
mod serial;
#[cfg(target_os = "linux")]
mod spi;

pub use mock::MockTransport;
pub use serial::{resolve_port, SerialTransport};
#[cfg(target_os = "linux")]
pub use spi::SpiTransport;

/// Transport trait for device communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read (0 on timeout)
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Check if data is available to read
    fn available(&mut self) -> Result<usize> {
        Ok(0)
    }

    /// Whether the underlying handle is currently open
    fn is_open(&self) -> bool;

    /// Close and reopen the underlying handle
    fn reopen(&mut self) -> Result<()>;

    /// Read exactly `buffer.len()` bytes, failing with `Timeout` if the
    /// link stalls. Each underlying `read` blocks up to the transport's
    /// own timeout, so the total wait is bounded.
    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        let mut stalls = 0;
        while filled < buffer.len() {
            let n = self.read(&mut buffer[filled..])?;
            if n == 0 {
                stalls += 1;
                if stalls >= 3 {
                    return Err(Error::Timeout);
                }
            } else {
                stalls = 0;
                filled += n;
            }
        }
        Ok(())
    }

    /// Read a single byte
    fn read_byte(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }
}
