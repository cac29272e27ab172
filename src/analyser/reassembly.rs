//! KEXINIT reassembly policies.
//!
//! The tracker does not reorder or deduplicate segments. It only asks the policy whether a
//! KEXINIT buffer that was just started or extended should absorb the next segment travelling
//! in the same direction.
use super::containers::{Direction, TcpFlags};
use super::kexinit::declared_packet_size;

pub trait MessageReassembler {
    /// Called after `segment_count` segments have been folded into `buffer`, the last one
    /// carrying `flags`. Returns true when the next same-direction segment belongs to the
    /// same message.
    fn expects_more(
        &self,
        direction: Direction,
        flags: TcpFlags,
        buffer: &[u8],
        segment_count: usize,
    ) -> bool;

    /// Whether a handshake with a pending continuation is held back from completing.
    fn completion_waits_for_continuation(&self) -> bool {
        false
    }
}

/// Push-flag heuristic: a client KEXINIT whose first segment carries PSH absorbs exactly one
/// more client segment. Server KEXINITs are always taken from a single segment.
#[derive(Clone, Copy, Debug, Default)]
pub struct PushFlagReassembler;

impl MessageReassembler for PushFlagReassembler {
    fn expects_more(
        &self,
        direction: Direction,
        flags: TcpFlags,
        _buffer: &[u8],
        segment_count: usize,
    ) -> bool {
        direction == Direction::ClientToServer && segment_count == 1 && flags.psh
    }
}

/// Largest binary packet an SSH implementation must accept (RFC 4253, section 6.1).
pub const MAX_PACKET_SIZE: usize = 35000;

/// Keeps appending same-direction segments, in both directions, while the buffer is shorter
/// than the packet length it declares. Declared sizes above [`MAX_PACKET_SIZE`] are not
/// followed.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeclaredLengthReassembler;

impl MessageReassembler for DeclaredLengthReassembler {
    fn expects_more(
        &self,
        _direction: Direction,
        _flags: TcpFlags,
        buffer: &[u8],
        _segment_count: usize,
    ) -> bool {
        match declared_packet_size(buffer) {
            Some(size) if size <= MAX_PACKET_SIZE => buffer.len() < size,
            Some(_) => false,
            None => buffer.len() < MAX_PACKET_SIZE,
        }
    }

    fn completion_waits_for_continuation(&self) -> bool {
        true
    }
}

/// Reassembly policy selected on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReassemblyPolicy {
    #[default]
    Push,
    Length,
}

impl ReassemblyPolicy {
    pub fn reassembler(&self) -> Box<dyn MessageReassembler> {
        match self {
            ReassemblyPolicy::Push => Box::new(PushFlagReassembler),
            ReassemblyPolicy::Length => Box::new(DeclaredLengthReassembler),
        }
    }
}
