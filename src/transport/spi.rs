//! SPI transport implementation (Linux spidev)

use super::Transport;
use crate::error::Result;
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

const SPI_MAX_SPEED_HZ: u32 = 10_000_000;

/// Full-duplex SPI transport
///
/// The pinnae controller boards run as SPI slaves in mode 0. Reads clock
/// out zero bytes to shift the slave's response in.
pub struct SpiTransport {
    dev: Spidev,
    path: String,
}

impl SpiTransport {
    /// Open a spidev device, e.g. "/dev/spidev0.0"
    pub fn open(path: &str) -> Result<Self> {
        let mut dev = Spidev::open(path)?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(SPI_MAX_SPEED_HZ)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        dev.configure(&options)?;
        log::info!("Opened SPI device: {}", path);
        Ok(SpiTransport {
            dev,
            path: path.to_string(),
        })
    }
}

impl Transport for SpiTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let tx = vec![0u8; buffer.len()];
        let mut transfer = SpidevTransfer::read_write(&tx, buffer);
        self.dev.transfer(&mut transfer)?;
        Ok(buffer.len())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut rx = vec![0u8; data.len()];
        let mut transfer = SpidevTransfer::read_write(data, &mut rx);
        self.dev.transfer(&mut transfer)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    fn reopen(&mut self) -> Result<()> {
        let path = self.path.clone();
        *self = Self::open(&path)?;
        Ok(())
    }
}
