//! Packet framing for the half-duplex servo bus.
//!
//! Instruction packet: `FF FF id len instr params.. chk`
//! Status packet:      `FF FF id len err  data..   chk`
//!
//! `len` counts everything after itself (`params + 2`), and `chk` is the
//! bitwise complement of the low byte of `id + len + instr + params`.

use crate::error::ProtocolError;

pub const HEADER: [u8; 2] = [0xFF, 0xFF];
pub const BROADCAST_ID: u8 = 0xFE;
/// Header, id, length and checksum around the parameters.
pub const FRAME_OVERHEAD: usize = 6;
/// A status packet carrying one byte of data.
pub const BYTE_RESPONSE_LEN: usize = FRAME_OVERHEAD + 1;
/// A status packet carrying one word of data.
pub const WORD_RESPONSE_LEN: usize = FRAME_OVERHEAD + 2;
const MAX_PARAMS: usize = u8::MAX as usize - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncWrite = 0x83,
}

/// Complement of the 8-bit sum of `body` (`id` through the last parameter).
#[inline]
pub fn checksum(body: &[u8]) -> u8 {
    !body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Frame an instruction packet. The checksum is always computed here.
pub fn build_packet(
    id: u8,
    instruction: Instruction,
    params: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if params.len() > MAX_PARAMS {
        return Err(ProtocolError::Oversized(params.len()));
    }
    let mut out = Vec::with_capacity(params.len() + FRAME_OVERHEAD);
    out.extend_from_slice(&HEADER);
    out.push(id);
    out.push((params.len() + 2) as u8);
    out.push(instruction as u8);
    out.extend_from_slice(params);
    out.push(checksum(&out[2..]));
    Ok(out)
}

pub fn read_packet(id: u8, address: u8, count: u8) -> Result<Vec<u8>, ProtocolError> {
    build_packet(id, Instruction::Read, &[address, count])
}

pub fn write_packet(id: u8, address: u8, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut params = Vec::with_capacity(data.len() + 1);
    params.push(address);
    params.extend_from_slice(data);
    build_packet(id, Instruction::Write, &params)
}

/// One broadcast packet writing the same register block on several servos.
/// Every entry must carry exactly `data_len` bytes.
pub fn sync_write_packet(
    address: u8,
    data_len: u8,
    entries: &[(u8, &[u8])],
) -> Result<Vec<u8>, ProtocolError> {
    let mut params = Vec::with_capacity(2 + entries.len() * (usize::from(data_len) + 1));
    params.push(address);
    params.push(data_len);
    for (id, data) in entries {
        if data.len() != usize::from(data_len) {
            return Err(ProtocolError::BadLength {
                declared: usize::from(data_len),
                actual: data.len(),
            });
        }
        params.push(*id);
        params.extend_from_slice(data);
    }
    build_packet(BROADCAST_ID, Instruction::SyncWrite, &params)
}

/// Check header, declared length and checksum of a complete packet.
pub fn verify_packet(packet: &[u8]) -> Result<(), ProtocolError> {
    if packet.len() < FRAME_OVERHEAD {
        return Err(ProtocolError::ShortResponse {
            expected: FRAME_OVERHEAD,
            got: packet.len(),
        });
    }
    if packet[..2] != HEADER {
        return Err(ProtocolError::BadHeader);
    }
    let declared = usize::from(packet[3]) + 4;
    if declared != packet.len() {
        return Err(ProtocolError::BadLength {
            declared,
            actual: packet.len(),
        });
    }
    let n = packet.len();
    let computed = checksum(&packet[2..n - 1]);
    if computed != packet[n - 1] {
        return Err(ProtocolError::Checksum {
            declared: packet[n - 1],
            computed,
        });
    }
    Ok(())
}

/// A validated status packet borrowed from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPacket<'a> {
    pub id: u8,
    /// Servo error flags; surfaced in logs, not treated as failure.
    pub error: u8,
    pub data: &'a [u8],
}

/// Parse a status packet that must answer `expected_id` with `data_len` bytes.
pub fn parse_status(
    buf: &[u8],
    expected_id: u8,
    data_len: usize,
) -> Result<StatusPacket<'_>, ProtocolError> {
    let expected = FRAME_OVERHEAD + data_len;
    if buf.len() < expected {
        return Err(ProtocolError::ShortResponse {
            expected,
            got: buf.len(),
        });
    }
    let packet = &buf[..expected];
    verify_packet(packet)?;
    if packet[2] != expected_id {
        return Err(ProtocolError::IdMismatch {
            expected: expected_id,
            got: packet[2],
        });
    }
    Ok(StatusPacket {
        id: packet[2],
        error: packet[4],
        data: &packet[5..expected - 1],
    })
}

/// Sign-magnitude little-endian encoding; `i16::MIN` saturates to -32767.
#[inline]
pub fn encode_word(value: i16) -> [u8; 2] {
    let magnitude = value.unsigned_abs().min(0x7FFF);
    let raw = if value < 0 {
        0x8000 | magnitude
    } else {
        magnitude
    };
    raw.to_le_bytes()
}

#[inline]
pub fn decode_word(bytes: [u8; 2]) -> i16 {
    let raw = u16::from_le_bytes(bytes);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

/// Narrow an `i32` into the representable word range.
#[inline]
pub fn saturate_word(value: i32) -> i16 {
    value.clamp(-0x7FFF, 0x7FFF) as i16
}
