//! In-memory servo bus that answers the Feetech-style register protocol.
//!
//! Each simulated servo owns a 64-byte register file. Read requests queue a
//! status packet for the next `Transport::read`; write and sync-write
//! requests update registers silently, matching a bus configured to only
//! answer reads. A [`SimHandle`] shares the same state so tests (and the
//! CLI's `--sim` mode) can move joints by hand, script feedback sequences,
//! take servos offline, and count traffic per id.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use servohand_traits::Transport;
use tracing::trace;

use crate::error::HwError;

const HEADER: [u8; 2] = [0xFF, 0xFF];
const BROADCAST: u8 = 0xFE;
const INST_READ: u8 = 0x02;
const INST_WRITE: u8 = 0x03;
const INST_SYNC_WRITE: u8 = 0x83;

const REG_TORQUE_SWITCH: usize = 40;
const REG_GOAL_POSITION: usize = 42;
const REG_PRESENT_POSITION: usize = 56;
const REG_VOLTAGE: usize = 62;
const REG_TEMPERATURE: usize = 63;
const REG_COUNT: usize = 64;

#[derive(Debug, Clone)]
struct SimServo {
    regs: [u8; REG_COUNT],
    online: bool,
    scripted: VecDeque<i16>,
}

impl SimServo {
    fn new() -> Self {
        let mut regs = [0u8; REG_COUNT];
        regs[REG_VOLTAGE] = 120;
        regs[REG_TEMPERATURE] = 32;
        Self {
            regs,
            online: true,
            scripted: VecDeque::new(),
        }
    }

    fn word(&self, addr: usize) -> i16 {
        decode_word(self.regs[addr], self.regs[addr + 1])
    }

    fn set_word(&mut self, addr: usize, value: i16) {
        let [lo, hi] = encode_word(value);
        self.regs[addr] = lo;
        self.regs[addr + 1] = hi;
    }

    fn write(&mut self, addr: usize, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            if let Some(slot) = self.regs.get_mut(addr + i) {
                *slot = *b;
            }
        }
        let touched_goal = addr <= REG_GOAL_POSITION + 1 && addr + data.len() > REG_GOAL_POSITION;
        if touched_goal && self.regs[REG_TORQUE_SWITCH] == 1 {
            let goal = self.word(REG_GOAL_POSITION);
            self.set_word(REG_PRESENT_POSITION, goal);
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    servos: BTreeMap<u8, SimServo>,
    packets_by_id: BTreeMap<u8, usize>,
    writes: usize,
    corrupt_next: usize,
    fail_writes: usize,
}

/// Shared view of the simulated bus for tests and demos.
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

/// `Transport` backed by simulated servos.
#[derive(Debug)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
    pending: VecDeque<u8>,
}

impl SimulatedBus {
    /// A bus with servos `1..=count` online, all at position 0, torque off.
    pub fn with_servos(count: u8) -> (Self, SimHandle) {
        let mut state = SimState::default();
        for id in 1..=count {
            state.servos.insert(id, SimServo::new());
        }
        let state = Arc::new(Mutex::new(state));
        (
            Self {
                state: state.clone(),
                pending: VecDeque::new(),
            },
            SimHandle { state },
        )
    }

    fn handle_packet(&mut self, packet: &[u8]) {
        let mut st = self.state.lock();
        let id = packet[2];
        let instruction = packet[4];
        let params = &packet[5..packet.len() - 1];

        if instruction == INST_SYNC_WRITE {
            handle_sync_write(&mut st, params);
            return;
        }
        *st.packets_by_id.entry(id).or_default() += 1;

        let targets: Vec<u8> = if id == BROADCAST {
            st.servos.keys().copied().collect()
        } else {
            vec![id]
        };
        let corrupt = if st.corrupt_next > 0 && instruction == INST_READ {
            st.corrupt_next -= 1;
            true
        } else {
            false
        };

        for target in targets {
            let Some(servo) = st.servos.get_mut(&target) else {
                continue;
            };
            if !servo.online {
                continue;
            }
            match (instruction, params) {
                (INST_WRITE, [addr, data @ ..]) if !data.is_empty() => {
                    servo.write(usize::from(*addr), data);
                }
                (INST_READ, [addr, len]) if id != BROADCAST => {
                    let addr = usize::from(*addr);
                    if addr == REG_PRESENT_POSITION
                        && let Some(next) = servo.scripted.pop_front()
                    {
                        servo.set_word(REG_PRESENT_POSITION, next);
                    }
                    let end = (addr + usize::from(*len)).min(REG_COUNT);
                    let data = servo.regs[addr.min(end)..end].to_vec();
                    let mut reply = status_packet(target, &data);
                    if corrupt && let Some(last) = reply.last_mut() {
                        *last = last.wrapping_add(1);
                    }
                    trace!(servo_id = target, bytes = reply.len(), "sim reply");
                    self.pending.extend(reply);
                }
                _ => {}
            }
        }
    }
}

fn handle_sync_write(st: &mut SimState, params: &[u8]) {
    let [addr, len, rest @ ..] = params else {
        return;
    };
    let stride = usize::from(*len) + 1;
    for chunk in rest.chunks(stride) {
        if chunk.len() != stride {
            break;
        }
        let id = chunk[0];
        *st.packets_by_id.entry(id).or_default() += 1;
        if let Some(servo) = st.servos.get_mut(&id)
            && servo.online
        {
            servo.write(usize::from(*addr), &chunk[1..]);
        }
    }
}

fn checksum(body: &[u8]) -> u8 {
    !body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn status_packet(id: u8, data: &[u8]) -> Vec<u8> {
    let len = u8::try_from(data.len() + 2).unwrap_or(u8::MAX);
    let mut out = Vec::with_capacity(data.len() + 6);
    out.extend_from_slice(&HEADER);
    out.extend_from_slice(&[id, len, 0x00]);
    out.extend_from_slice(data);
    out.push(checksum(&out[2..]));
    out
}

fn encode_word(value: i16) -> [u8; 2] {
    let raw: u16 = if value < 0 {
        0x8000 | (value.unsigned_abs() & 0x7FFF)
    } else {
        value.unsigned_abs()
    };
    raw.to_le_bytes()
}

fn decode_word(lo: u8, hi: u8) -> i16 {
    let raw = u16::from_le_bytes([lo, hi]);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

impl Transport for SimulatedBus {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        {
            let mut st = self.state.lock();
            st.writes += 1;
            if st.fail_writes > 0 {
                st.fail_writes -= 1;
                return Err(Box::new(HwError::Io(std::io::Error::other(
                    "simulated write failure",
                ))));
            }
        }
        let mut rest = bytes;
        while rest.len() >= 6 {
            if rest[..2] != HEADER {
                rest = &rest[1..];
                continue;
            }
            let total = usize::from(rest[3]) + 4;
            if rest.len() < total {
                break;
            }
            let packet = &rest[..total];
            if checksum(&packet[2..total - 1]) == packet[total - 1] {
                self.handle_packet(packet);
            } else {
                trace!("sim dropped packet with bad checksum");
            }
            rest = &rest[total..];
        }
        Ok(bytes.len())
    }

    fn read(
        &mut self,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        if self.pending.is_empty() {
            return Err(Box::new(HwError::Timeout));
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.pending.clear();
        Ok(())
    }
}

impl SimHandle {
    /// Move a joint by hand (what the operator does during calibration).
    pub fn set_present_position(&self, id: u8, position: i16) {
        if let Some(s) = self.state.lock().servos.get_mut(&id) {
            s.set_word(REG_PRESENT_POSITION, position);
        }
    }

    /// Queue positions returned by successive present-position reads.
    pub fn script_positions(&self, id: u8, positions: impl IntoIterator<Item = i16>) {
        if let Some(s) = self.state.lock().servos.get_mut(&id) {
            s.scripted.extend(positions);
        }
    }

    pub fn present_position(&self, id: u8) -> Option<i16> {
        self.state.lock()
            .servos
            .get(&id)
            .map(|s| s.word(REG_PRESENT_POSITION))
    }

    /// Signed word currently stored at `addr` (sign-magnitude decoded).
    pub fn register_word(&self, id: u8, addr: u8) -> Option<i16> {
        let addr = usize::from(addr);
        if addr + 1 >= REG_COUNT {
            return None;
        }
        self.state.lock().servos.get(&id).map(|s| s.word(addr))
    }

    pub fn register_byte(&self, id: u8, addr: u8) -> Option<u8> {
        self.state.lock()
            .servos
            .get(&id)
            .and_then(|s| s.regs.get(usize::from(addr)).copied())
    }

    pub fn set_register_byte(&self, id: u8, addr: u8, value: u8) {
        if let Some(slot) = self.state.lock()
            .servos
            .get_mut(&id)
            .and_then(|s| s.regs.get_mut(usize::from(addr)))
        {
            *slot = value;
        }
    }

    pub fn set_online(&self, id: u8, online: bool) {
        if let Some(s) = self.state.lock().servos.get_mut(&id) {
            s.online = online;
        }
    }

    /// Packets (or sync-write entries) addressed to `id` so far.
    pub fn packets_to(&self, id: u8) -> usize {
        self.state.lock()
            .packets_by_id
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Total `Transport::write` calls, successful or not.
    pub fn write_calls(&self) -> usize {
        self.state.lock().writes
    }

    /// Corrupt the checksum of the next `n` read replies.
    pub fn corrupt_next_replies(&self, n: usize) {
        self.state.lock().corrupt_next = n;
    }

    /// Fail the next `n` transport writes with an I/O error.
    pub fn fail_next_writes(&self, n: usize) {
        self.state.lock().fail_writes = n;
    }

    pub fn online_ids(&self) -> BTreeSet<u8> {
        self.state.lock()
            .servos
            .iter()
            .filter(|(_, s)| s.online)
            .map(|(id, _)| *id)
            .collect()
    }
}
