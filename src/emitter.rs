//! Echo emitter control
//!
//! Uploads chirp waveforms to the emitter MCU and triggers playback. The
//! upload protocol is defensive end to end: the device echoes the length
//! back before accepting data, acknowledges each phase, and returns a
//! CRC32 of everything it received so a corrupted buffer is never played.

use crate::error::{Error, Result};
use crate::transport::Transport;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

/// No-op / padding byte
pub const E_NONE: u8 = 0;
/// Play the uploaded chirp
pub const E_EMIT_CHIRP: u8 = 1;
/// Begin a chirp buffer upload
pub const E_CHIRP_DATA: u8 = 2;
/// Request an acknowledgment
pub const E_ACK_REQ: u8 = 3;
/// Acknowledgment
pub const E_ACK: u8 = 4;
/// Device rejected the advertised length
pub const E_DATA_TOO_LONG: u8 = 6;
/// Query the device's buffer capacity
pub const E_GET_MAX_LEN: u8 = 7;
/// Enable the output amplifier
pub const E_AMP_START: u8 = 8;
/// Disable the output amplifier
pub const E_AMP_STOP: u8 = 9;
/// Discard the uploaded buffer
pub const E_CLEAR: u8 = 10;
/// Device-side fault
pub const E_ERROR: u8 = 100;

/// DAC sample rate, Hz
pub const EMIT_SAMPLE_RATE: f64 = 1_000_000.0;
/// Default peak-to-peak amplitude in DAC codes
pub const DEFAULT_GAIN: u16 = 512;
/// Default DAC mid-point
pub const DEFAULT_OFFSET: u16 = 2048;

/// Sample bytes sent per write during upload; the device's UART ISR
/// drains its FIFO slower than the host can fill it
const UPLOAD_BURST_LEN: usize = 20;

/// Frequency trajectory of a generated sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMethod {
    Linear,
    Quadratic,
    Logarithmic,
    Hyperbolic,
}

/// Emitter MCU controller
pub struct EchoEmitter {
    transport: Box<dyn Transport>,
    chirp_uploaded: bool,
    upload_time: Option<Duration>,
    /// Device buffer capacity, cached after the first query
    max_len: Option<u16>,
}

impl EchoEmitter {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        EchoEmitter {
            transport,
            chirp_uploaded: false,
            upload_time: None,
            max_len: None,
        }
    }

    /// Whether a chirp buffer has been uploaded and verified
    pub fn chirp_uploaded(&self) -> bool {
        self.chirp_uploaded
    }

    /// Duration of the last successful upload
    pub fn upload_time(&self) -> Option<Duration> {
        self.upload_time
    }

    /// Verify the device is alive, resetting the link first
    ///
    /// Reopens the port to flush both directions, then requests an ack.
    /// One failure earns a second reset and retry; two failures is a
    /// handshake error.
    pub fn connection_check(&mut self) -> Result<()> {
        self.transport.reopen()?;
        if self.try_handshake()? {
            return Ok(());
        }
        log::warn!("Emitter handshake failed, resetting link and retrying");
        self.transport.reopen()?;
        if self.try_handshake()? {
            return Ok(());
        }
        Err(Error::Handshake("emitter did not acknowledge"))
    }

    fn try_handshake(&mut self) -> Result<bool> {
        self.transport.write(&[E_ACK_REQ])?;
        match self.transport.read_byte() {
            Ok(E_ACK) => Ok(true),
            Ok(_) | Err(Error::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Upload a chirp buffer, verifying length and checksum
    ///
    /// On any verification failure the uploaded flag is cleared: the
    /// device may hold a partial buffer and must not be asked to play it.
    pub fn upload_chirp(&mut self, samples: &[u16]) -> Result<()> {
        if samples.is_empty() || samples.len() > u16::MAX as usize {
            return Err(Error::Validation(format!(
                "chirp length {} outside 1..={}",
                samples.len(),
                u16::MAX
            )));
        }
        // If the device's capacity is known, reject locally instead of
        // burning an upload round trip on a guaranteed DATA_TOO_LONG
        if let Some(max) = self.max_len {
            if samples.len() > max as usize {
                return Err(Error::Validation(format!(
                    "chirp length {} exceeds device maximum {}",
                    samples.len(),
                    max
                )));
            }
        }

        self.chirp_uploaded = false;
        let started = Instant::now();

        // Advertise the length and require the device to echo it back
        let count = samples.len() as u16;
        let mut header = [E_CHIRP_DATA, 0, 0];
        header[1..3].copy_from_slice(&count.to_le_bytes());
        self.transport.write(&header)?;

        let mut echo = [0u8; 2];
        self.transport.read_exact(&mut echo)?;
        let echoed = u16::from_le_bytes(echo);
        if echoed != count {
            return Err(Error::LengthMismatch {
                sent: count,
                echoed,
            });
        }

        match self.transport.read_byte()? {
            E_ACK => {}
            E_DATA_TOO_LONG => {
                return Err(Error::Protocol(format!(
                    "device rejected {} samples as too long",
                    count
                )))
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected upload ack, got {:#04x}",
                    other
                )))
            }
        }

        // Stream the samples in small bursts so the device ISR keeps up
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        for burst in bytes.chunks(UPLOAD_BURST_LEN) {
            self.transport.write(burst)?;
        }

        self.transport.write(&[E_ACK_REQ])?;
        let ack = self.transport.read_byte()?;
        if ack != E_ACK {
            return Err(Error::Protocol(format!(
                "expected data ack, got {:#04x}",
                ack
            )));
        }

        // The device checksums what it actually stored
        let mut crc_bytes = [0u8; 4];
        self.transport.read_exact(&mut crc_bytes)?;
        let actual = u32::from_le_bytes(crc_bytes);
        let expected = crc32fast::hash(&bytes);
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        self.chirp_uploaded = true;
        self.upload_time = Some(started.elapsed());
        log::debug!(
            "Uploaded {} chirp samples in {:?}",
            samples.len(),
            started.elapsed()
        );
        Ok(())
    }

    /// Trigger playback of the uploaded chirp
    ///
    /// Playable without a prior upload (the device keeps its last buffer
    /// across host restarts), but that state is only a warning away from
    /// playing stale audio.
    pub fn chirp(&mut self) -> Result<()> {
        if !self.chirp_uploaded {
            log::warn!("Emitting without a verified chirp upload");
        }
        self.transport.write(&[E_EMIT_CHIRP])?;
        let ack = self.transport.read_byte()?;
        if ack != E_ACK {
            return Err(Error::Protocol(format!(
                "expected emit ack, got {:#04x}",
                ack
            )));
        }
        Ok(())
    }

    /// Query the device's maximum chirp length, in samples
    ///
    /// The answer is cached and used to pre-check future uploads.
    pub fn get_max_len(&mut self) -> Result<u16> {
        self.transport.write(&[E_GET_MAX_LEN])?;
        let mut buf = [0u8; 2];
        self.transport.read_exact(&mut buf)?;
        let max = u16::from_le_bytes(buf);
        self.max_len = Some(max);
        Ok(max)
    }

    /// Discard the device-side chirp buffer
    pub fn clear(&mut self) -> Result<()> {
        self.transport.write(&[E_CLEAR])?;
        self.chirp_uploaded = false;
        Ok(())
    }

    /// Enable the output amplifier
    pub fn amp_start(&mut self) -> Result<()> {
        self.transport.write(&[E_AMP_START])?;
        Ok(())
    }

    /// Disable the output amplifier
    pub fn amp_stop(&mut self) -> Result<()> {
        self.transport.write(&[E_AMP_STOP])?;
        Ok(())
    }
}

/// Generate a frequency sweep quantized for the emitter DAC
///
/// `duration` is in seconds at the 1 MHz DAC rate. The unit-amplitude
/// sweep is normalized to `[0, 1]` and mapped onto
/// `offset - gain/2 ..= offset + gain/2`.
pub fn gen_chirp(
    f_start: f64,
    f_end: f64,
    duration: f64,
    method: SweepMethod,
    gain: u16,
    offset: u16,
) -> Vec<u16> {
    let n = (duration * EMIT_SAMPLE_RATE) as usize;
    let mut out = Vec::with_capacity(n);

    for i in 0..n {
        let t = i as f64 / EMIT_SAMPLE_RATE;
        let phase = sweep_phase(f_start, f_end, duration, method, t);
        out.push(quantize(phase.sin(), gain, offset));
    }
    out
}

/// Generate a fixed-frequency tone quantized for the emitter DAC
pub fn gen_sine(freq: f64, duration: f64, gain: u16, offset: u16) -> Vec<u16> {
    let n = (duration * EMIT_SAMPLE_RATE) as usize;
    let mut out = Vec::with_capacity(n);

    for i in 0..n {
        let t = i as f64 / EMIT_SAMPLE_RATE;
        out.push(quantize((2.0 * PI * freq * t).sin(), gain, offset));
    }
    out
}

/// Instantaneous phase of the sweep at time `t`
fn sweep_phase(f_start: f64, f_end: f64, duration: f64, method: SweepMethod, t: f64) -> f64 {
    match method {
        SweepMethod::Linear => {
            let k = (f_end - f_start) / duration;
            2.0 * PI * (f_start * t + 0.5 * k * t * t)
        }
        SweepMethod::Quadratic => {
            let k = (f_end - f_start) / (duration * duration);
            2.0 * PI * (f_start * t + k * t * t * t / 3.0)
        }
        SweepMethod::Logarithmic => {
            let k = (f_end / f_start).powf(1.0 / duration);
            2.0 * PI * f_start * (k.powf(t) - 1.0) / k.ln()
        }
        SweepMethod::Hyperbolic => {
            let c = f_start * f_end * duration / (f_end - f_start);
            -2.0 * PI * c * (1.0 - (f_end - f_start) * t / (f_end * duration)).ln()
        }
    }
}

/// Map a `[-1, 1]` sample onto `offset ± gain/2` DAC codes
fn quantize(sample: f64, gain: u16, offset: u16) -> u16 {
    let unit = (sample + 1.0) / 2.0;
    let low = offset as f64 - gain as f64 / 2.0;
    (low + unit * gain as f64).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn emitter() -> (EchoEmitter, MockTransport) {
        let mock = MockTransport::new();
        (EchoEmitter::new(Box::new(mock.clone())), mock)
    }

    /// Script the device side of a successful upload of `samples`
    fn script_upload_ok(mock: &MockTransport, samples: &[u16]) {
        let count = samples.len() as u16;
        mock.inject_read(&count.to_le_bytes());
        mock.inject_read(&[E_ACK]);
        mock.inject_read(&[E_ACK]);
        let mut bytes = Vec::new();
        for &s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        mock.inject_read(&crc32fast::hash(&bytes).to_le_bytes());
    }

    #[test]
    fn test_upload_success_sets_flag() {
        let (mut em, mock) = emitter();
        let samples = [100u16, 2048, 4095, 0];
        script_upload_ok(&mock, &samples);

        assert!(!em.chirp_uploaded());
        em.upload_chirp(&samples).unwrap();
        assert!(em.chirp_uploaded());
        assert!(em.upload_time().is_some());

        let written = mock.get_written();
        // header: opcode + LE length
        assert_eq!(&written[..3], &[E_CHIRP_DATA, 4, 0]);
        // sample bytes (LE), then the final ack request
        assert_eq!(&written[3..5], &100u16.to_le_bytes());
        assert_eq!(written[written.len() - 1], E_ACK_REQ);
    }

    #[test]
    fn test_upload_aborts_on_length_mismatch() {
        let (mut em, mock) = emitter();
        // Device echoes the wrong count
        mock.inject_read(&7u16.to_le_bytes());

        let err = em.upload_chirp(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch { sent: 3, echoed: 7 }
        ));
        assert!(!em.chirp_uploaded());

        // Nothing beyond the header went out
        assert_eq!(mock.get_written().len(), 3);
    }

    #[test]
    fn test_upload_detects_checksum_mismatch() {
        let (mut em, mock) = emitter();
        let samples = [10u16, 20, 30];
        mock.inject_read(&3u16.to_le_bytes());
        mock.inject_read(&[E_ACK, E_ACK]);
        mock.inject_read(&0xDEAD_BEEFu32.to_le_bytes());

        let err = em.upload_chirp(&samples).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(!em.chirp_uploaded());
    }

    #[test]
    fn test_upload_too_long_rejected_by_device() {
        let (mut em, mock) = emitter();
        mock.inject_read(&2u16.to_le_bytes());
        mock.inject_read(&[E_DATA_TOO_LONG]);

        let err = em.upload_chirp(&[1, 2]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_upload_clears_stale_flag() {
        let (mut em, mock) = emitter();
        let samples = [5u16, 6];
        script_upload_ok(&mock, &samples);
        em.upload_chirp(&samples).unwrap();
        assert!(em.chirp_uploaded());

        // A failed re-upload must not leave the old flag standing
        mock.inject_read(&9u16.to_le_bytes());
        assert!(em.upload_chirp(&samples).is_err());
        assert!(!em.chirp_uploaded());
    }

    #[test]
    fn test_empty_upload_rejected_locally() {
        let (mut em, mock) = emitter();
        assert!(matches!(
            em.upload_chirp(&[]),
            Err(Error::Validation(_))
        ));
        assert!(mock.get_written().is_empty());
    }

    #[test]
    fn test_connection_check_retries_once() {
        let (mut em, mock) = emitter();
        // Wrong byte on the first attempt, ack on the retry
        mock.inject_read(&[E_NONE, E_ACK]);
        em.connection_check().unwrap();
        assert_eq!(mock.reopen_count(), 2);
    }

    #[test]
    fn test_connection_check_fails_after_two_attempts() {
        let (mut em, mock) = emitter();
        mock.inject_read(&[E_NONE, E_NONE]);
        assert!(matches!(
            em.connection_check(),
            Err(Error::Handshake(_))
        ));
    }

    #[test]
    fn test_chirp_expects_ack() {
        let (mut em, mock) = emitter();
        mock.inject_read(&[E_ACK]);
        em.chirp().unwrap();
        assert_eq!(mock.get_written(), vec![E_EMIT_CHIRP]);

        mock.inject_read(&[E_ERROR]);
        assert!(matches!(em.chirp(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_get_max_len() {
        let (mut em, mock) = emitter();
        mock.inject_read(&30_000u16.to_le_bytes());
        assert_eq!(em.get_max_len().unwrap(), 30_000);
        assert_eq!(mock.get_written(), vec![E_GET_MAX_LEN]);
    }

    #[test]
    fn test_known_max_len_prechecks_upload() {
        let (mut em, mock) = emitter();
        mock.inject_read(&4u16.to_le_bytes());
        em.get_max_len().unwrap();
        mock.clear_written();

        let err = em.upload_chirp(&[1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(mock.get_written().is_empty());
    }

    #[test]
    fn test_gen_chirp_length_and_range() {
        for method in [
            SweepMethod::Linear,
            SweepMethod::Quadratic,
            SweepMethod::Logarithmic,
            SweepMethod::Hyperbolic,
        ] {
            let samples = gen_chirp(30e3, 80e3, 3e-3, method, DEFAULT_GAIN, DEFAULT_OFFSET);
            assert_eq!(samples.len(), 3000);
            let lo = DEFAULT_OFFSET - DEFAULT_GAIN / 2;
            let hi = DEFAULT_OFFSET + DEFAULT_GAIN / 2;
            assert!(samples.iter().all(|&s| s >= lo && s <= hi));
            // A real sweep is not a constant
            assert!(samples.iter().any(|&s| s != samples[0]));
        }
    }

    #[test]
    fn test_gen_sine_starts_at_midpoint() {
        let samples = gen_sine(40e3, 1e-3, 512, 2048);
        assert_eq!(samples.len(), 1000);
        // sin(0) = 0 maps to the offset
        assert_eq!(samples[0], 2048);
    }

    #[test]
    fn test_quantize_endpoints() {
        assert_eq!(quantize(-1.0, 512, 2048), 1792);
        assert_eq!(quantize(1.0, 512, 2048), 2304);
        assert_eq!(quantize(0.0, 512, 2048), 2048);
    }
}
