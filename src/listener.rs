//! Echo listener control
//!
//! Streams dual-channel echo data from the listener MCU. The two ear
//! microphones are sampled simultaneously and arrive interleaved one
//! sample at a time; the host splits them back into per-ear traces.

use crate::error::{Error, Result};
use crate::transport::Transport;

/// No-op / padding byte
pub const L_NONE: u8 = 0;
/// Begin streaming samples
pub const L_START_LISTEN: u8 = 1;
/// Stop streaming samples
pub const L_STOP_LISTEN: u8 = 2;
/// Request an acknowledgment
pub const L_ACK_REQ: u8 = 3;
/// Acknowledgment
pub const L_ACK: u8 = 4;
/// Device-side fault
pub const L_ERROR: u8 = 100;

/// Default samples per blocking read (both channels combined)
pub const DEFAULT_CHANNEL_BURST_LEN: usize = 1000;
/// Default ADC sample rate per channel, Hz
pub const DEFAULT_SAMPLE_RATE: f64 = 1_000_000.0;

/// Listener MCU controller
pub struct EchoListener {
    transport: Box<dyn Transport>,
    /// Samples delivered per device burst; reads are sized to match so
    /// the host never splits a burst mid-transfer
    channel_burst_len: usize,
    /// Per-channel sample rate, Hz
    sample_rate: f64,
    /// Whether the even-indexed interleaved sample is the left ear
    left_channel_first: bool,
}

impl EchoListener {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        EchoListener {
            transport,
            channel_burst_len: DEFAULT_CHANNEL_BURST_LEN,
            sample_rate: DEFAULT_SAMPLE_RATE,
            left_channel_first: true,
        }
    }

    pub fn with_settings(
        transport: Box<dyn Transport>,
        channel_burst_len: usize,
        sample_rate: f64,
        left_channel_first: bool,
    ) -> Self {
        EchoListener {
            transport,
            channel_burst_len,
            sample_rate,
            left_channel_first,
        }
    }

    /// Verify the device is alive, resetting the link first
    pub fn connection_check(&mut self) -> Result<()> {
        self.transport.reopen()?;
        if self.try_handshake()? {
            return Ok(());
        }
        log::warn!("Listener handshake failed, resetting link and retrying");
        self.transport.reopen()?;
        if self.try_handshake()? {
            return Ok(());
        }
        Err(Error::Handshake("listener did not acknowledge"))
    }

    fn try_handshake(&mut self) -> Result<bool> {
        self.transport.write(&[L_ACK_REQ])?;
        match self.transport.read_byte() {
            Ok(L_ACK) => Ok(true),
            Ok(_) | Err(Error::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Acquire `duration_ms` of dual-channel echo data
    ///
    /// Returns `(raw, left, right)`: the interleaved trace as captured
    /// plus the two de-interleaved ear traces. The acquisition is rounded
    /// down to whole device bursts, so the traces may be up to one burst
    /// shorter than requested. The link is handshaken before and reset
    /// after: the device free-runs between START and STOP, and reopening
    /// the port discards whatever it pushed after the final read.
    pub fn listen(&mut self, duration_ms: f64) -> Result<(Vec<u16>, Vec<u16>, Vec<u16>)> {
        // Both channels together, in samples
        let total_samples = (duration_ms * 1e-3 * self.sample_rate) as usize * 2;
        let read_times = total_samples / self.channel_burst_len;
        if read_times == 0 {
            return Err(Error::Validation(format!(
                "{} ms yields less than one {}-sample burst",
                duration_ms, self.channel_burst_len
            )));
        }

        self.connection_check()?;
        self.transport.flush()?;
        self.transport.write(&[L_START_LISTEN])?;

        let mut raw = vec![0u8; read_times * 2 * self.channel_burst_len];
        for chunk in raw.chunks_mut(2 * self.channel_burst_len) {
            self.transport.read_exact(chunk)?;
        }

        self.transport.write(&[L_STOP_LISTEN])?;
        self.transport.flush()?;
        self.transport.reopen()?;

        let interleaved: Vec<u16> = raw
            .chunks_exact(2)
            .map(|p| u16::from_le_bytes([p[0], p[1]]))
            .collect();
        let (left, right) = de_interleave(&interleaved, self.left_channel_first);
        Ok((interleaved, left, right))
    }

    /// Per-channel samples produced by a `duration_ms` acquisition
    pub fn samples_for(&self, duration_ms: f64) -> usize {
        let total_samples = (duration_ms * 1e-3 * self.sample_rate) as usize * 2;
        let read_times = total_samples / self.channel_burst_len;
        read_times * self.channel_burst_len / 2
    }
}

/// Split an interleaved dual-channel trace into `(left, right)`
///
/// Even indices belong to the first channel. An odd trailing sample goes
/// to the first channel, mirroring how the ADC pairs conversions.
pub fn de_interleave(samples: &[u16], left_first: bool) -> (Vec<u16>, Vec<u16>) {
    let even: Vec<u16> = samples.iter().step_by(2).copied().collect();
    let odd: Vec<u16> = samples.iter().skip(1).step_by(2).copied().collect();
    if left_first {
        (even, odd)
    } else {
        (odd, even)
    }
}
