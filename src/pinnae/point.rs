//! Point-to-point motor command protocol
//!
//! The newer tendon controller boards speak an addressed, CRC-protected
//! packet protocol instead of the raw angle-vector frames: each command
//! targets one motor by id and the board answers with a result code, so
//! the host can tell a dropped packet from a rejected one.

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Packet sync bytes
pub const SYNC0: u8 = 0xFF;
pub const SYNC1: u8 = 0x00;

/// Instruction opcodes
pub const OP_READ_STATUS: u8 = 0;
pub const OP_READ_ANGLE: u8 = 1;
pub const OP_WRITE_ANGLE: u8 = 2;
pub const OP_WRITE_PID: u8 = 3;

/// Result codes returned by the board
pub const RESULT_SUCCESS: u8 = 0;
pub const RESULT_FAIL: u8 = 1;
pub const RESULT_INSTRUCTION_ERROR: u8 = 2;
pub const RESULT_CRC_ERROR: u8 = 3;
pub const RESULT_ID_ERROR: u8 = 4;
pub const RESULT_PARAM_ERROR: u8 = 5;

/// Bytes covered by the length field besides the parameters:
/// id, opcode and the two CRC bytes
const LEN_OVERHEAD: u8 = 4;

const CRC16_POLY: u16 = 0x8005;

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC16_TABLE: [u16; 256] = build_crc16_table();

/// CRC-16 with polynomial 0x8005, MSB-first, zero init
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        let idx = ((crc >> 8) ^ b as u16) & 0xFF;
        crc = (crc << 8) ^ CRC16_TABLE[idx as usize];
    }
    crc
}

/// Build a command packet for motor `id`
///
/// Layout: `[SYNC0, SYNC1, len, id, opcode, params.., crc_hi, crc_lo]`
/// where `len` counts everything after itself and the CRC covers
/// `[len, id, opcode, params..]`. The sync bytes stay outside the CRC so
/// resync never corrupts the running checksum.
pub fn build_command(id: u8, opcode: u8, params: &[u8]) -> Vec<u8> {
    let len = LEN_OVERHEAD + params.len() as u8;
    let mut packet = Vec::with_capacity(5 + params.len() + 2);
    packet.push(SYNC0);
    packet.push(SYNC1);
    packet.push(len);
    packet.push(id);
    packet.push(opcode);
    packet.extend_from_slice(params);

    let crc = crc16(&packet[2..]);
    packet.extend_from_slice(&crc.to_be_bytes());
    packet
}

/// A parsed response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointResponse {
    pub id: u8,
    pub opcode: u8,
    pub result: u8,
    pub data: Vec<u8>,
}

/// Parse and CRC-check a response packet
pub fn parse_response(packet: &[u8]) -> Result<PointResponse> {
    if packet.len() < 8 {
        return Err(Error::Protocol(format!(
            "response truncated at {} bytes",
            packet.len()
        )));
    }
    if packet[0] != SYNC0 || packet[1] != SYNC1 {
        return Err(Error::Protocol(format!(
            "bad sync bytes {:#04x} {:#04x}",
            packet[0], packet[1]
        )));
    }

    let len = packet[2] as usize;
    if packet.len() != len + 3 {
        return Err(Error::Protocol(format!(
            "length field {} disagrees with packet size {}",
            len,
            packet.len()
        )));
    }

    let crc_offset = packet.len() - 2;
    let expected = crc16(&packet[2..crc_offset]);
    let actual = u16::from_be_bytes([packet[crc_offset], packet[crc_offset + 1]]);
    if expected != actual {
        return Err(Error::Protocol(format!(
            "response CRC {:#06x} != {:#06x}",
            actual, expected
        )));
    }

    Ok(PointResponse {
        id: packet[3],
        opcode: packet[4],
        result: packet[5],
        data: packet[6..crc_offset].to_vec(),
    })
}

/// One addressed motor bus
pub struct PointBus {
    transport: Box<dyn Transport>,
}

impl PointBus {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        PointBus { transport }
    }

    /// Send a command and read back the board's response
    ///
    /// `response_data_len` is the payload size the opcode returns, not
    /// counting the result byte.
    fn transact(
        &mut self,
        id: u8,
        opcode: u8,
        params: &[u8],
        response_data_len: usize,
    ) -> Result<PointResponse> {
        let command = build_command(id, opcode, params);
        self.transport.write(&command)?;

        // sync + sync + len + id + opcode + result + data + crc
        let mut response = vec![0u8; 8 + response_data_len];
        self.transport.read_exact(&mut response)?;

        let parsed = parse_response(&response)?;
        if parsed.id != id {
            return Err(Error::Protocol(format!(
                "response from motor {} to a command for motor {}",
                parsed.id, id
            )));
        }
        if parsed.result != RESULT_SUCCESS {
            return Err(Error::Protocol(format!(
                "motor {} rejected opcode {} with result {}",
                id, opcode, parsed.result
            )));
        }
        Ok(parsed)
    }

    /// Read a motor's status byte
    pub fn read_status(&mut self, id: u8) -> Result<u8> {
        let resp = self.transact(id, OP_READ_STATUS, &[], 1)?;
        Ok(resp.data[0])
    }

    /// Read a motor's current angle, degrees
    pub fn read_angle(&mut self, id: u8) -> Result<i16> {
        let resp = self.transact(id, OP_READ_ANGLE, &[], 2)?;
        Ok(i16::from_be_bytes([resp.data[0], resp.data[1]]))
    }

    /// Command a motor to an angle, degrees
    pub fn write_angle(&mut self, id: u8, angle: i16) -> Result<()> {
        self.transact(id, OP_WRITE_ANGLE, &angle.to_be_bytes(), 0)?;
        Ok(())
    }

    /// Set a motor's PID gains (fixed-point, board-defined scaling)
    pub fn write_pid(&mut self, id: u8, p: u16, i: u16, d: u16) -> Result<()> {
        let mut params = [0u8; 6];
        params[0..2].copy_from_slice(&p.to_be_bytes());
        params[2..4].copy_from_slice(&i.to_be_bytes());
        params[4..6].copy_from_slice(&d.to_be_bytes());
        self.transact(id, OP_WRITE_PID, &params, 0)?;
        Ok(())
    }
}
