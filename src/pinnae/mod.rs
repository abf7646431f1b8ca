//! Pinna motor control
//!
//! Each pinna is shaped by up to eight tendon motors. The controller
//! board takes a one-byte header plus the full angle vector on every
//! command; there is no incremental write, so the host caches the vector
//! and re-sends it whole. Software travel limits are enforced host-side
//! before anything reaches the wire.

pub mod point;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Header bit: re-define the addressed motor's current position as zero
pub const HDR_ZERO_RESET: u8 = 0x80;
/// Header bit: run the addressed motor to its end stop
pub const HDR_ENDSTOP_SEEK: u8 = 0x40;
/// Header bit: end-stop seek direction (set = clockwise)
pub const HDR_DIRECTION: u8 = 0x20;
/// Header bits \[2:0\]: addressed motor channel
pub const HDR_CHANNEL_MASK: u8 = 0x07;

/// Most motors a controller board drives (3 channel bits)
pub const MAX_MOTOR_COUNT: usize = 8;

/// Default software travel limits, degrees
pub const DEFAULT_MIN_ANGLE: i16 = -180;
pub const DEFAULT_MAX_ANGLE: i16 = 180;

/// Pinna motor controller
pub struct PinnaeController {
    transport: Box<dyn Transport>,
    angles: Vec<i16>,
    min_limits: Vec<i16>,
    max_limits: Vec<i16>,
}

/// Serialize a motor command: header byte then every angle, big-endian
pub fn pack_angle_frame(header: u8, angles: &[i16]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + angles.len() * 2);
    frame.push(header);
    for &a in angles {
        frame.extend_from_slice(&a.to_be_bytes());
    }
    frame
}

impl PinnaeController {
    /// Create a controller for `motor_count` motors
    pub fn new(transport: Box<dyn Transport>, motor_count: usize) -> Result<Self> {
        if motor_count == 0 || motor_count > MAX_MOTOR_COUNT {
            return Err(Error::Validation(format!(
                "motor count {} outside 1..={}",
                motor_count, MAX_MOTOR_COUNT
            )));
        }
        Ok(PinnaeController {
            transport,
            angles: vec![0; motor_count],
            min_limits: vec![DEFAULT_MIN_ANGLE; motor_count],
            max_limits: vec![DEFAULT_MAX_ANGLE; motor_count],
        })
    }

    pub fn motor_count(&self) -> usize {
        self.angles.len()
    }

    /// Cached angle vector, degrees
    pub fn angles(&self) -> &[i16] {
        &self.angles
    }

    pub fn angle(&self, index: usize) -> Result<i16> {
        self.check_index(index)?;
        Ok(self.angles[index])
    }

    pub fn min_limit(&self, index: usize) -> Result<i16> {
        self.check_index(index)?;
        Ok(self.min_limits[index])
    }

    pub fn max_limit(&self, index: usize) -> Result<i16> {
        self.check_index(index)?;
        Ok(self.max_limits[index])
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.angles.len() {
            return Err(Error::Validation(format!(
                "motor index {} outside 0..{}",
                index,
                self.angles.len()
            )));
        }
        Ok(())
    }

    fn check_limits(&self, index: usize, angle: i16) -> Result<()> {
        if angle < self.min_limits[index] || angle > self.max_limits[index] {
            return Err(Error::Validation(format!(
                "angle {} outside [{}, {}] for motor {}",
                angle, self.min_limits[index], self.max_limits[index], index
            )));
        }
        Ok(())
    }

    fn send_frame(&mut self, header: u8) -> Result<()> {
        let frame = pack_angle_frame(header, &self.angles);
        self.transport.write(&frame)?;
        Ok(())
    }

    /// Move one motor, keeping the rest where they are
    ///
    /// Fails before transmission if the angle violates the motor's travel
    /// limits; the cached vector is untouched on failure.
    pub fn set_motor_angle(&mut self, index: usize, angle: i16) -> Result<()> {
        self.check_index(index)?;
        self.check_limits(index, angle)?;

        let previous = self.angles[index];
        self.angles[index] = angle;
        if let Err(e) = self.send_frame(index as u8 & HDR_CHANNEL_MASK) {
            self.angles[index] = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Move every motor at once, all-or-nothing
    ///
    /// Every angle is validated before any motor moves: a single
    /// out-of-range entry rejects the whole command and nothing is sent.
    pub fn set_motor_angles(&mut self, angles: &[i16]) -> Result<()> {
        if angles.len() != self.angles.len() {
            return Err(Error::Validation(format!(
                "{} angles for {} motors",
                angles.len(),
                self.angles.len()
            )));
        }
        for (i, &a) in angles.iter().enumerate() {
            self.check_limits(i, a)?;
        }

        let previous = std::mem::replace(&mut self.angles, angles.to_vec());
        if let Err(e) = self.send_frame(0) {
            self.angles = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Tighten or widen a motor's lower travel limit
    ///
    /// Rejected if the new limit would strand the current angle outside
    /// the allowed range. Limit changes never transmit anything.
    pub fn set_motor_min_limit(&mut self, index: usize, limit: i16) -> Result<()> {
        self.check_index(index)?;
        if limit > self.max_limits[index] {
            return Err(Error::Validation(format!(
                "min limit {} above max limit {}",
                limit, self.max_limits[index]
            )));
        }
        if self.angles[index] < limit {
            return Err(Error::Validation(format!(
                "min limit {} would exclude current angle {}",
                limit, self.angles[index]
            )));
        }
        self.min_limits[index] = limit;
        Ok(())
    }

    /// Tighten or widen a motor's upper travel limit
    pub fn set_motor_max_limit(&mut self, index: usize, limit: i16) -> Result<()> {
        self.check_index(index)?;
        if limit < self.min_limits[index] {
            return Err(Error::Validation(format!(
                "max limit {} below min limit {}",
                limit, self.min_limits[index]
            )));
        }
        if self.angles[index] > limit {
            return Err(Error::Validation(format!(
                "max limit {} would exclude current angle {}",
                limit, self.angles[index]
            )));
        }
        self.max_limits[index] = limit;
        Ok(())
    }

    /// Declare the motor's current position to be zero degrees
    pub fn reset_zero_position(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.send_frame(HDR_ZERO_RESET | (index as u8 & HDR_CHANNEL_MASK))?;
        self.angles[index] = 0;
        Ok(())
    }

    /// Run a motor to its mechanical end stop
    ///
    /// Travel limits do not apply: this is the calibration move that
    /// establishes where the limits are. The cached angle is meaningless
    /// afterwards until [`reset_zero_position`](Self::reset_zero_position)
    /// is called.
    pub fn move_to_end_stop(&mut self, index: usize, clockwise: bool) -> Result<()> {
        self.check_index(index)?;
        let mut header = HDR_ENDSTOP_SEEK | (index as u8 & HDR_CHANNEL_MASK);
        if clockwise {
            header |= HDR_DIRECTION;
        }
        self.send_frame(header)
    }

    /// Drive one motor to its upper travel limit
    pub fn motor_to_max(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.set_motor_angle(index, self.max_limits[index])
    }

    /// Drive one motor to its lower travel limit
    pub fn motor_to_min(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.set_motor_angle(index, self.min_limits[index])
    }

    /// Return one motor to zero degrees
    pub fn motor_to_zero(&mut self, index: usize) -> Result<()> {
        self.set_motor_angle(index, 0)
    }

    /// Drive every motor to its upper travel limit
    pub fn all_to_max(&mut self) -> Result<()> {
        let targets = self.max_limits.clone();
        self.set_motor_angles(&targets)
    }

    /// Drive every motor to its lower travel limit
    pub fn all_to_min(&mut self) -> Result<()> {
        let targets = self.min_limits.clone();
        self.set_motor_angles(&targets)
    }

    /// Return every motor to zero degrees
    pub fn all_to_zero(&mut self) -> Result<()> {
        let targets = vec![0; self.angles.len()];
        self.set_motor_angles(&targets)
    }

    /// Re-zero every encoder at its current position
    ///
    /// Travel limits return to the defaults: they were measured relative
    /// to the old zero and mean nothing against the new one.
    pub fn reset_all_zero(&mut self) -> Result<()> {
        for i in 0..self.angles.len() {
            self.reset_zero_position(i)?;
        }
        self.min_limits.fill(DEFAULT_MIN_ANGLE);
        self.max_limits.fill(DEFAULT_MAX_ANGLE);
        Ok(())
    }
}
