//! Serial transport implementation

use super::Transport;
use crate::error::{Error, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Find the port path of a device by its USB serial number.
///
/// The MCU boards enumerate on different paths across boots, so the
/// configuration records serial numbers and we scan for them here.
pub fn resolve_port(serial_num: &str) -> Result<String> {
    for port in serialport::available_ports()? {
        if let serialport::SerialPortType::UsbPort(info) = &port.port_type {
            if info.serial_number.as_deref() == Some(serial_num) {
                log::info!("Found {} on {}", serial_num, port.port_name);
                return Ok(port.port_name);
            }
        }
    }
    Err(Error::Config(format!(
        "no serial device with serial number {}",
        serial_num
    )))
}

fn open_port(path: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialPort>> {
    let port = serialport::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(timeout)
        .open()?;
    Ok(port)
}

/// Serial transport for UART communication
///
/// The handle is `None` only transiently during `reopen`; the old handle
/// must be dropped before the new open so the tty's exclusive lock is
/// released.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    path: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialTransport {
    /// Open a serial port with a 200ms read timeout
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyACM0")
    /// * `baud_rate` - Baud rate (e.g., 115200)
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        Self::open_with_timeout(path, baud_rate, Duration::from_millis(200))
    }

    /// Open a serial port with an explicit read timeout
    pub fn open_with_timeout(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = open_port(path, baud_rate, timeout)?;
        log::info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(SerialTransport {
            port: Some(port),
            path: path.to_string(),
            baud_rate,
            timeout,
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(Error::Misuse("serial port is closed"))
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port_mut()?.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.port_mut()?.write(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.port_mut()?.flush()?;
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.port_mut()?.bytes_to_read()? as usize)
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn reopen(&mut self) -> Result<()> {
        self.port = None;
        self.port = Some(open_port(&self.path, self.baud_rate, self.timeout)?);
        log::debug!("Reopened serial port: {}", self.path);
        Ok(())
    }
}
