use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Transport protocol carried by a decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Other,
}

/// The eight TCP control bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

impl TcpFlags {
    pub fn from_u8(flags: u8) -> Self {
        Self {
            fin: flags & 0x01 != 0,
            syn: flags & 0x02 != 0,
            rst: flags & 0x04 != 0,
            psh: flags & 0x08 != 0,
            ack: flags & 0x10 != 0,
            urg: flags & 0x20 != 0,
            ece: flags & 0x40 != 0,
            cwr: flags & 0x80 != 0,
        }
    }

    pub fn bits(&self) -> u8 {
        (self.fin as u8)
            | (self.syn as u8) << 1
            | (self.rst as u8) << 2
            | (self.psh as u8) << 3
            | (self.ack as u8) << 4
            | (self.urg as u8) << 5
            | (self.ece as u8) << 6
            | (self.cwr as u8) << 7
    }

    /// True only for a segment carrying SYN and nothing else, i.e. a connection open.
    pub fn is_syn_only(&self) -> bool {
        self.bits() == 0x02
    }
}

/// One decoded capture frame, as handed over by a frame source.
#[derive(Clone, Debug)]
pub struct Frame {
    pub timestamp: DateTime<Utc>,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: TransportProtocol,
    pub flags: TcpFlags,
    pub payload: Vec<u8>,
}

/// One side of a TCP connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: u16,
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.port.cmp(&other.port).then_with(|| self.addr.cmp(&other.addr))
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.addr {
            IpAddr::V4(addr) => write!(f, "{}:{}", addr, self.port),
            IpAddr::V6(addr) => write!(f, "[{}]:{}", addr, self.port),
        }
    }
}

/// Direction-independent key of a TCP connection: both endpoints, lower one first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub lower: Endpoint,
    pub higher: Endpoint,
}

impl ConnectionId {
    pub fn new(a: Endpoint, b: Endpoint) -> Self {
        if a <= b {
            Self { lower: a, higher: b }
        } else {
            Self { lower: b, higher: a }
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.lower, self.higher)
    }
}

/// Direction a payload travelled, relative to the connection opener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Handshake artifacts collected for one side of a connection.
#[derive(Clone, Debug, Default)]
pub struct SideState {
    pub banner: Option<Vec<u8>>,
    pub kexinit: Option<Vec<u8>>,
    /// The last KEXINIT segment announced that more bytes follow.
    pub pending_continuation: bool,
    /// Number of segments folded into `kexinit`.
    pub kexinit_segments: usize,
}

/// Per-connection handshake state, created on SYN.
#[derive(Clone, Debug)]
pub struct ConnectionState {
    pub original_src_port: u16,
    pub original_dst_port: u16,
    pub client: SideState,
    pub server: SideState,
}

impl ConnectionState {
    pub fn new(original_src_port: u16, original_dst_port: u16) -> Self {
        Self {
            original_src_port,
            original_dst_port,
            client: SideState::default(),
            server: SideState::default(),
        }
    }

    pub fn side(&self, direction: Direction) -> &SideState {
        match direction {
            Direction::ClientToServer => &self.client,
            Direction::ServerToClient => &self.server,
        }
    }

    pub fn side_mut(&mut self, direction: Direction) -> &mut SideState {
        match direction {
            Direction::ClientToServer => &mut self.client,
            Direction::ServerToClient => &mut self.server,
        }
    }

    pub fn banners_complete(&self) -> bool {
        self.client.banner.is_some() && self.server.banner.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.banners_complete() && self.client.kexinit.is_some() && self.server.kexinit.is_some()
    }
}

/// Which endpoint an output record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Client => write!(f, "CLIENT"),
            Role::Server => write!(f, "SERVER"),
        }
    }
}

/// How the banner text is rendered into a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BannerStyle {
    /// Quoted string literal, e.g. `'SSH-2.0-OpenSSH_9.6'`
    #[default]
    Literal,
    /// Banner text as received, minus the trailing line ending
    Raw,
}

/// One fingerprint record for one side of a completed handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutputRecord {
    pub role: Role,
    pub banner: String,
    pub fingerprint: String,
    pub fields: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn endpoint(last: u8, port: u16) -> Endpoint {
        Endpoint { addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), port }
    }

    #[test]
    fn test_tcp_flags_from_u8() {
        let flags = TcpFlags::from_u8(0x02);
        assert!(flags.syn);
        assert!(flags.is_syn_only());

        let flags = TcpFlags::from_u8(0x12);
        assert!(flags.syn && flags.ack);
        assert!(!flags.is_syn_only());

        let flags = TcpFlags::from_u8(0x18);
        assert!(flags.psh && flags.ack);
        assert_eq!(flags.bits(), 0x18);
    }

    #[test]
    fn test_connection_id_is_direction_independent() {
        let client = endpoint(1, 51000);
        let server = endpoint(2, 22);
        let forward = ConnectionId::new(client, server);
        let reverse = ConnectionId::new(server, client);
        assert_eq!(forward, reverse);
        assert_eq!(forward.lower, server);
        assert_eq!(forward.to_string(), "10.0.0.2:22-10.0.0.1:51000");
    }

    #[test]
    fn test_connection_id_equal_ports_uses_address() {
        let a = endpoint(9, 22);
        let b = endpoint(3, 22);
        assert_eq!(ConnectionId::new(a, b), ConnectionId::new(b, a));
        assert_eq!(ConnectionId::new(a, b).lower, b);
    }
}
