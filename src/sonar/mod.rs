//! Sonar acquisition controller
//!
//! Drives the sonar MCU's job state machine over a serial link. The MCU
//! is either idle, accepting configuration updates, or running an
//! emit/listen job; the controller mirrors that state and caches the
//! device-side configuration so update traffic can be kept to the fields
//! that actually changed.

pub mod partition;
pub mod timer;
mod worker;

pub use partition::{check_partition, Partition, PARTITION_DEFAULT};
pub use timer::{determine_timer_vals, TimerSetting};
pub use worker::{JobOutput, JobRequest, SonarWorker};

use crate::error::{Error, Result};
use crate::framing;
use crate::transport::Transport;
use std::time::{Duration, Instant};

/// Command-prefix byte for opcode writes
pub const SOP_COMMAND: u8 = 0x01;
/// Data-prefix byte announcing a bulk payload
pub const SOP_DATA: u8 = 0x02;

/// Enter the update state
pub const OP_UPDATE_JOB: u8 = 0x10;
/// Update the acquisition-buffer partition
pub const UOP_BUFFER: u8 = 0x11;
/// Update the chirp playback buffer
pub const UOP_CHIRP: u8 = 0x12;
/// Update the wait-timer TOP register
pub const UOP_WAIT_TIMER_TOP: u8 = 0x13;
/// Update the wait-timer prescaler register
pub const UOP_WAIT_TIMER_PRESCALER: u8 = 0x14;
/// Leave the update state
pub const UOP_FINISH: u8 = 0x1F;
/// Start an emit/listen job
pub const OP_START_JOB: u8 = 0x20;
/// Enable the emitter amplifier
pub const OP_AMP_ENABLE: u8 = 0x30;
/// Disable the emitter amplifier
pub const OP_AMP_DISABLE: u8 = 0x31;

/// Listen data arrives from the MCU in chunks of this many bytes
pub const S_CHUNK_LENGTH: usize = 64;
/// ADC/DAC sample rate, Hz
pub const SAMPLING_RATE: f64 = 1_000_000.0;
/// Wait-timer period applied on reset, seconds
pub const DEFAULT_T_WAIT: f64 = 1e-3;
/// Mid-scale DAC code used for the reset-default chirp buffer
pub const DAC_MID_SCALE: u16 = 2048;

/// Job state mirrored from the MCU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// No job running, not updating
    Idle,
    /// Accepting configuration updates
    Updating,
    /// Emit/listen job in flight
    Running,
}

/// Result of a non-blocking job poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPoll {
    /// Job still in flight; poll again
    Pending,
    /// Raw interleaved acquisition bytes, `chunk_count * S_CHUNK_LENGTH` long
    Complete(Vec<u8>),
}

/// Sonar MCU controller
pub struct SonarController {
    transport: Box<dyn Transport>,
    state: JobState,
    partition: Partition,
    chunk_count: usize,
    timer: TimerSetting,
    /// Derived listen timing, seconds
    t_chirp: f64,
    t_listen: f64,
    t_total: f64,
}

impl SonarController {
    /// Create a controller over `transport`
    ///
    /// The cache starts at the hardware reset defaults; call
    /// [`load_defaults`](Self::load_defaults) to push them explicitly so a
    /// freshly flashed or power-cycled MCU agrees with the host.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let partition = PARTITION_DEFAULT;
        let mut ctl = SonarController {
            transport,
            state: JobState::Idle,
            partition,
            chunk_count: listen_chunk_count(partition.n_listen),
            timer: determine_timer_vals(DEFAULT_T_WAIT),
            t_chirp: 0.0,
            t_listen: 0.0,
            t_total: 0.0,
        };
        ctl.refresh_listen_times();
        ctl
    }

    /// Push the reset-default configuration to the MCU
    ///
    /// Sends the default partition, the default wait timer and a flat
    /// mid-scale chirp buffer, then leaves the update state.
    pub fn load_defaults(&mut self) -> Result<()> {
        self.enter_update()?;
        self.buffer_update(
            partition::DEFAULT_CHIRP_LEN,
            partition::DEFAULT_LISTEN_LEN,
            partition::DEFAULT_LISTEN_LEN,
        )?;
        self.wait_timer_update(DEFAULT_T_WAIT)?;
        let flat = vec![DAC_MID_SCALE; self.partition.chirp_len as usize];
        self.chirp_update(&flat)?;
        self.exit_update()?;
        log::info!("Sonar defaults loaded");
        Ok(())
    }

    fn refresh_listen_times(&mut self) {
        self.t_chirp = self.partition.chirp_len as f64 / SAMPLING_RATE;
        self.t_listen = self.partition.n_listen as f64 / SAMPLING_RATE;
        self.t_total = self.t_chirp + self.t_listen;
    }

    /// Enter the update state; must precede any `*_update` call
    pub fn enter_update(&mut self) -> Result<()> {
        match self.state {
            JobState::Updating => Err(Error::Misuse("already in update state")),
            JobState::Running => Err(Error::Misuse("cannot update while a job is running")),
            JobState::Idle => {
                self.transport.write(&[SOP_COMMAND, OP_UPDATE_JOB])?;
                self.state = JobState::Updating;
                Ok(())
            }
        }
    }

    /// Update the acquisition-buffer partition
    ///
    /// An invalid split silently becomes the hardware default partition,
    /// matching what the MCU does on its side; check
    /// [`Partition::accepted`] on the returned value if the distinction
    /// matters.
    pub fn buffer_update(&mut self, chirp_len: u32, right_len: u32, left_len: u32) -> Result<Partition> {
        if self.state != JobState::Updating {
            return Err(Error::Misuse("buffer_update outside update state"));
        }

        let part = check_partition(chirp_len, right_len, left_len);
        if !part.accepted {
            log::warn!(
                "Partition ({}, {}, {}) rejected, using hardware default",
                chirp_len,
                right_len,
                left_len
            );
        }

        self.transport.write(&[SOP_COMMAND, UOP_BUFFER])?;
        let mut lengths = Vec::with_capacity(6);
        lengths.extend_from_slice(&(part.chirp_len as u16).to_be_bytes());
        lengths.extend_from_slice(&(part.listen_right_len as u16).to_be_bytes());
        lengths.extend_from_slice(&(part.listen_left_len as u16).to_be_bytes());
        self.transport.write(&lengths)?;

        self.partition = part;
        self.chunk_count = listen_chunk_count(part.n_listen);
        self.refresh_listen_times();
        Ok(part)
    }

    /// Update the wait timer, writing only the registers that changed
    pub fn wait_timer_update(&mut self, period: f64) -> Result<TimerSetting> {
        if self.state != JobState::Updating {
            return Err(Error::Misuse("wait_timer_update outside update state"));
        }

        let setting = determine_timer_vals(period);

        if setting.top != self.timer.top {
            self.transport.write(&[SOP_COMMAND, UOP_WAIT_TIMER_TOP])?;
            self.transport.write(&(setting.top as u16).to_be_bytes())?;
        }

        if setting.prescaler_reg != self.timer.prescaler_reg {
            self.transport
                .write(&[SOP_COMMAND, UOP_WAIT_TIMER_PRESCALER, setting.prescaler_reg])?;
        }

        self.timer = setting;
        Ok(setting)
    }

    /// Upload a new chirp playback buffer
    ///
    /// The buffer length must exactly match the partition's chirp region:
    /// implicit zero padding would put harmonics in the emitted spectrum,
    /// so a short buffer is rejected before anything touches the wire.
    pub fn chirp_update(&mut self, samples: &[u16]) -> Result<()> {
        if self.state != JobState::Updating {
            return Err(Error::Misuse("chirp_update outside update state"));
        }

        if samples.len() != self.partition.chirp_len as usize {
            return Err(Error::Validation(format!(
                "chirp buffer is {} samples, partition expects {}",
                samples.len(),
                self.partition.chirp_len
            )));
        }

        self.transport.write(&[SOP_COMMAND, UOP_CHIRP])?;
        self.transport.write(&[SOP_DATA])?;

        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            bytes.extend_from_slice(&s.to_be_bytes());
        }
        self.transport.write(&bytes)?;
        Ok(())
    }

    /// Leave the update state
    ///
    /// Blocks for the MCU's single acknowledgment byte so the host never
    /// races ahead of a device still committing its configuration.
    pub fn exit_update(&mut self) -> Result<()> {
        if self.state != JobState::Updating {
            return Err(Error::Misuse("exit_update without enter_update"));
        }

        self.transport.write(&[SOP_COMMAND, UOP_FINISH])?;
        self.transport.read_byte()?;
        self.state = JobState::Idle;
        Ok(())
    }

    /// Start an emit/listen job
    ///
    /// `do_chirp` selects whether the chirp region is played; space can
    /// stay partitioned for a chirp that this particular job skips.
    pub fn start_job(&mut self, do_chirp: bool) -> Result<()> {
        match self.state {
            JobState::Updating => Err(Error::Misuse("cannot start a job while updating")),
            JobState::Running => Err(Error::Misuse("a job is already running")),
            JobState::Idle => {
                self.transport
                    .write(&[SOP_COMMAND, OP_START_JOB, do_chirp as u8])?;
                self.state = JobState::Running;
                Ok(())
            }
        }
    }

    /// Non-blocking poll for job completion
    ///
    /// Returns `Pending` while the MCU is still acquiring. On completion
    /// reads exactly `chunk_count * S_CHUNK_LENGTH` bytes and returns to
    /// idle. Calling without a started job (or mid-update) is a contract
    /// violation.
    pub fn poll_job(&mut self) -> Result<JobPoll> {
        if self.state != JobState::Running {
            return Err(Error::Misuse("poll_job without a running job"));
        }

        if self.transport.available()? == 0 {
            return Ok(JobPoll::Pending);
        }

        let mut data = vec![0u8; self.chunk_count * S_CHUNK_LENGTH];
        self.transport.read_exact(&mut data)?;
        self.state = JobState::Idle;
        Ok(JobPoll::Complete(data))
    }

    /// Bounded blocking wait for job completion
    ///
    /// Polls with a short sleep instead of spinning; fails with `Timeout`
    /// once `timeout` has elapsed without data.
    pub fn wait_job(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.poll_job()? {
                JobPoll::Complete(data) => return Ok(data),
                JobPoll::Pending => {
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Enable the emitter amplifier (fire-and-forget)
    pub fn amp_enable(&mut self) -> Result<()> {
        self.transport.write(&[SOP_COMMAND, OP_AMP_ENABLE])?;
        Ok(())
    }

    /// Disable the emitter amplifier (fire-and-forget)
    pub fn amp_disable(&mut self) -> Result<()> {
        self.transport.write(&[SOP_COMMAND, OP_AMP_DISABLE])?;
        Ok(())
    }

    /// Current mirrored job state
    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_updating(&self) -> bool {
        self.state == JobState::Updating
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// Active buffer partition
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Listen samples expected per job (both ears)
    pub fn num_listen_samples(&self) -> u32 {
        self.partition.n_listen
    }

    /// Bytes a completed job delivers
    pub fn job_byte_len(&self) -> usize {
        self.chunk_count * S_CHUNK_LENGTH
    }

    /// Wall-clock duration of one emit+listen cycle, seconds
    pub fn cycle_time(&self) -> f64 {
        self.t_total
    }
}

/// Chunks the MCU sends for `n_listen` samples; always at least one,
/// since the device terminates even an empty job with a single chunk
fn listen_chunk_count(n_listen: u32) -> usize {
    framing::chunk_count(2 * n_listen as usize, S_CHUNK_LENGTH).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn controller() -> (SonarController, MockTransport) {
        let mock = MockTransport::new();
        (SonarController::new(Box::new(mock.clone())), mock)
    }

    #[test]
    fn test_listen_chunk_count() {
        assert_eq!(listen_chunk_count(30_000), 938);
        assert_eq!(listen_chunk_count(60_000), 1875);
        assert_eq!(listen_chunk_count(0), 1);
    }

    #[test]
    fn test_update_cycle_opcodes() {
        let (mut ctl, mock) = controller();
        ctl.enter_update().unwrap();
        assert_eq!(mock.get_written(), vec![SOP_COMMAND, OP_UPDATE_JOB]);
        mock.clear_written();

        let p = ctl.buffer_update(3000, 10000, 10000).unwrap();
        assert!(p.accepted);
        let written = mock.get_written();
        assert_eq!(&written[..2], &[SOP_COMMAND, UOP_BUFFER]);
        // three big-endian u16 lengths
        assert_eq!(&written[2..], &[0x0B, 0xB8, 0x27, 0x10, 0x27, 0x10]);

        mock.inject_read(&[0x01]); // exit ack
        ctl.exit_update().unwrap();
        assert_eq!(ctl.state(), JobState::Idle);
    }

    #[test]
    fn test_enter_update_twice_is_misuse() {
        let (mut ctl, _mock) = controller();
        ctl.enter_update().unwrap();
        assert!(matches!(ctl.enter_update(), Err(Error::Misuse(_))));
    }

    #[test]
    fn test_buffer_update_outside_update_is_misuse() {
        let (mut ctl, _mock) = controller();
        assert!(matches!(
            ctl.buffer_update(100, 100, 100),
            Err(Error::Misuse(_))
        ));
    }

    #[test]
    fn test_invalid_partition_falls_back() {
        let (mut ctl, _mock) = controller();
        ctl.enter_update().unwrap();
        let p = ctl.buffer_update(40_000, 40_000, 40_000).unwrap();
        assert!(!p.accepted);
        assert_eq!(p, PARTITION_DEFAULT);
        assert_eq!(ctl.partition().chirp_len, partition::DEFAULT_CHIRP_LEN);
    }

    #[test]
    fn test_chirp_update_rejects_wrong_length() {
        let (mut ctl, mock) = controller();
        ctl.enter_update().unwrap();
        ctl.buffer_update(4, 8, 8).unwrap();
        mock.clear_written();

        // 3 samples against a 4-sample chirp region: nothing transmitted
        let err = ctl.chirp_update(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(mock.get_written().is_empty());

        ctl.chirp_update(&[1, 2, 3, 4]).unwrap();
        let written = mock.get_written();
        assert_eq!(&written[..3], &[SOP_COMMAND, UOP_CHIRP, SOP_DATA]);
        // big-endian samples
        assert_eq!(&written[3..], &[0, 1, 0, 2, 0, 3, 0, 4]);
    }

    #[test]
    fn test_wait_timer_writes_only_deltas() {
        let (mut ctl, mock) = controller();
        ctl.enter_update().unwrap();
        mock.clear_written();

        // Same period as the cached default: no traffic at all
        ctl.wait_timer_update(DEFAULT_T_WAIT).unwrap();
        assert!(mock.get_written().is_empty());

        // New period changes TOP but keeps the DIV2 prescaler
        // (default 1ms -> 59999 @ DIV2; 0.9ms -> 53999 @ DIV2)
        ctl.wait_timer_update(0.9e-3).unwrap();
        let written = mock.get_written();
        assert_eq!(&written[..2], &[SOP_COMMAND, UOP_WAIT_TIMER_TOP]);
        assert_eq!(&written[2..4], &53_999u16.to_be_bytes());
        assert_eq!(written.len(), 4);

        // Much longer period changes both registers
        mock.clear_written();
        ctl.wait_timer_update(0.4).unwrap();
        let written = mock.get_written();
        assert_eq!(&written[..2], &[SOP_COMMAND, UOP_WAIT_TIMER_TOP]);
        assert_eq!(
            &written[4..],
            &[SOP_COMMAND, UOP_WAIT_TIMER_PRESCALER, 7]
        );
    }

    #[test]
    fn test_job_lifecycle() {
        let (mut ctl, mock) = controller();
        ctl.enter_update().unwrap();
        ctl.buffer_update(0, 16, 16).unwrap();
        mock.inject_read(&[0x01]);
        ctl.exit_update().unwrap();

        // polling before starting is misuse
        assert!(matches!(ctl.poll_job(), Err(Error::Misuse(_))));

        ctl.start_job(true).unwrap();
        assert!(ctl.is_running());
        assert!(matches!(
            ctl.start_job(true),
            Err(Error::Misuse(_))
        ));

        // nothing buffered yet
        assert_eq!(ctl.poll_job().unwrap(), JobPoll::Pending);

        // 32 listen samples -> 64 bytes -> exactly one chunk
        assert_eq!(ctl.job_byte_len(), S_CHUNK_LENGTH);
        mock.inject_read(&vec![0xA5; S_CHUNK_LENGTH]);
        match ctl.poll_job().unwrap() {
            JobPoll::Complete(data) => assert_eq!(data.len(), S_CHUNK_LENGTH),
            JobPoll::Pending => panic!("expected completion"),
        }
        assert_eq!(ctl.state(), JobState::Idle);
    }

    #[test]
    fn test_start_job_while_updating_is_misuse() {
        let (mut ctl, _mock) = controller();
        ctl.enter_update().unwrap();
        assert!(matches!(ctl.start_job(true), Err(Error::Misuse(_))));
    }

    #[test]
    fn test_amp_opcodes_are_stateless() {
        let (mut ctl, mock) = controller();
        ctl.amp_enable().unwrap();
        ctl.amp_disable().unwrap();
        assert_eq!(
            mock.get_written(),
            vec![SOP_COMMAND, OP_AMP_ENABLE, SOP_COMMAND, OP_AMP_DISABLE]
        );

        // also allowed mid-update
        ctl.enter_update().unwrap();
        ctl.amp_enable().unwrap();
    }
}
