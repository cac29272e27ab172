//! Frame classification: decides which frames belong to the analysis and gives them a
//! direction-independent connection key.
use super::containers::{ConnectionId, Endpoint, Frame, TcpFlags, TransportProtocol};

/// Default SSH port.
pub const SSH_PORT: u16 = 22;

/// Which TCP ports are considered SSH.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortFilter {
    pub port: u16,
    pub all_ports: bool,
}

impl Default for PortFilter {
    fn default() -> Self {
        Self { port: SSH_PORT, all_ports: false }
    }
}

impl PortFilter {
    pub fn accepts(&self, src_port: u16, dst_port: u16) -> bool {
        self.all_ports || src_port == self.port || dst_port == self.port
    }
}

/// A relevant frame, reduced to what the handshake tracker needs.
#[derive(Clone, Debug)]
pub struct ClassifiedFrame<'a> {
    pub id: ConnectionId,
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: TcpFlags,
    pub payload: &'a [u8],
}

/// Returns `None` for non-TCP frames and for TCP frames outside the port filter.
pub fn classify<'a>(frame: &'a Frame, filter: &PortFilter) -> Option<ClassifiedFrame<'a>> {
    if frame.protocol != TransportProtocol::Tcp {
        return None;
    }

    if !filter.accepts(frame.src_port, frame.dst_port) {
        return None;
    }

    let src = Endpoint { addr: frame.src, port: frame.src_port };
    let dst = Endpoint { addr: frame.dst, port: frame.dst_port };

    Some(ClassifiedFrame {
        id: ConnectionId::new(src, dst),
        src_port: frame.src_port,
        dst_port: frame.dst_port,
        flags: frame.flags,
        payload: &frame.payload,
    })
}
