//! Connection state table: follows every SSH connection from SYN to the point where both
//! banners and both KEXINIT messages are known.
use std::collections::HashMap;

use super::classify::ClassifiedFrame;
use super::containers::{ConnectionId, ConnectionState, Direction, TcpFlags};
use super::kexinit::is_kexinit_start;
use super::reassembly::{MessageReassembler, PushFlagReassembler};

/// Payload travelled towards the port the connection was opened to.
pub fn is_client_to_server(state: &ConnectionState, frame: &ClassifiedFrame) -> bool {
    frame.dst_port == state.original_dst_port
}

/// Payload travelled back towards the port the connection was opened from.
pub fn is_server_to_client(state: &ConnectionState, frame: &ClassifiedFrame) -> bool {
    frame.dst_port == state.original_src_port
}

pub struct HandshakeTracker {
    connections: HashMap<ConnectionId, ConnectionState>,
    reassembler: Box<dyn MessageReassembler>,
}

impl Default for HandshakeTracker {
    fn default() -> Self {
        Self::new(Box::new(PushFlagReassembler))
    }
}

impl HandshakeTracker {
    pub fn new(reassembler: Box<dyn MessageReassembler>) -> Self {
        Self { connections: HashMap::new(), reassembler }
    }

    /// Number of connections opened but not yet complete.
    pub fn in_flight(&self) -> usize {
        self.connections.len()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&ConnectionState> {
        self.connections.get(id)
    }

    /// Folds one frame into the table.
    ///
    /// Returns the connection's final state, already removed from the table, when this frame
    /// completed its handshake.
    pub fn process(&mut self, frame: &ClassifiedFrame) -> Option<ConnectionState> {
        if frame.flags.is_syn_only() {
            let state = ConnectionState::new(frame.src_port, frame.dst_port);
            if self.connections.insert(frame.id, state).is_some() {
                log::debug!("New SYN on {}, discarding previous handshake state", frame.id);
            }
            return None;
        }

        if frame.payload.is_empty() {
            return None;
        }

        let state = self.connections.get_mut(&frame.id)?;
        advance(state, frame, self.reassembler.as_ref());

        let held_back = self.reassembler.completion_waits_for_continuation()
            && (state.client.pending_continuation || state.server.pending_continuation);

        if state.is_complete() && !held_back {
            return self.connections.remove(&frame.id);
        }

        None
    }
}

fn advance(state: &mut ConnectionState, frame: &ClassifiedFrame, reassembler: &dyn MessageReassembler) {
    let to_server = is_client_to_server(state, frame);
    let to_client = is_server_to_client(state, frame);

    if state.client.banner.is_none() && to_server {
        state.client.banner = Some(frame.payload.to_vec());
        return;
    }

    if state.server.banner.is_none() && to_client {
        state.server.banner = Some(frame.payload.to_vec());
        return;
    }

    if !state.banners_complete() {
        return;
    }

    let direction = if to_server {
        Direction::ClientToServer
    } else if to_client {
        Direction::ServerToClient
    } else {
        return;
    };

    // A segment that looks like a KEXINIT start is never taken as a continuation, even when
    // that side already has its message.
    if is_kexinit_start(frame.payload) {
        if to_server && state.client.kexinit.is_none() {
            start_message(state, Direction::ClientToServer, frame.payload, frame.flags, reassembler);
        } else if to_client && state.server.kexinit.is_none() {
            start_message(state, Direction::ServerToClient, frame.payload, frame.flags, reassembler);
        }
        return;
    }

    let side = state.side(direction);
    if side.kexinit.is_some() && side.pending_continuation {
        append_segment(state, direction, frame.payload, frame.flags, reassembler);
    }
}

fn start_message(
    state: &mut ConnectionState,
    direction: Direction,
    payload: &[u8],
    flags: TcpFlags,
    reassembler: &dyn MessageReassembler,
) {
    let side = state.side_mut(direction);
    side.kexinit = Some(payload.to_vec());
    side.kexinit_segments = 1;
    side.pending_continuation = reassembler.expects_more(direction, flags, payload, 1);
}

fn append_segment(
    state: &mut ConnectionState,
    direction: Direction,
    payload: &[u8],
    flags: TcpFlags,
    reassembler: &dyn MessageReassembler,
) {
    let side = state.side_mut(direction);
    if let Some(buffer) = side.kexinit.as_mut() {
        buffer.extend_from_slice(payload);
        side.kexinit_segments += 1;
        side.pending_continuation =
            reassembler.expects_more(direction, flags, buffer, side.kexinit_segments);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::classify::{classify, PortFilter};
    use crate::analyser::containers::{Frame, TransportProtocol};
    use crate::analyser::kexinit::{build_kexinit, decode};
    use crate::analyser::reassembly::DeclaredLengthReassembler;
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};

    const SYN: u8 = 0x02;
    const ACK: u8 = 0x10;
    const PSH_ACK: u8 = 0x18;

    struct Conversation {
        client: (IpAddr, u16),
        server: (IpAddr, u16),
    }

    impl Conversation {
        fn new(client_port: u16) -> Self {
            Self {
                client: (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), client_port),
                server: (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 22),
            }
        }

        fn frame(&self, to_server: bool, flags: u8, payload: &[u8]) -> Frame {
            let (src, dst) = if to_server { (self.client, self.server) } else { (self.server, self.client) };
            Frame {
                timestamp: Utc::now(),
                src: src.0,
                dst: dst.0,
                src_port: src.1,
                dst_port: dst.1,
                protocol: TransportProtocol::Tcp,
                flags: TcpFlags::from_u8(flags),
                payload: payload.to_vec(),
            }
        }

        fn client(&self, flags: u8, payload: &[u8]) -> Frame {
            self.frame(true, flags, payload)
        }

        fn server(&self, flags: u8, payload: &[u8]) -> Frame {
            self.frame(false, flags, payload)
        }
    }

    fn feed(tracker: &mut HandshakeTracker, frames: &[Frame]) -> Vec<ConnectionState> {
        let filter = PortFilter::default();
        frames
            .iter()
            .filter_map(|frame| classify(frame, &filter))
            .filter_map(|classified| tracker.process(&classified))
            .collect()
    }

    fn opening(conv: &Conversation) -> Vec<Frame> {
        vec![
            conv.client(SYN, b""),
            conv.server(0x12, b""),
            conv.client(ACK, b""),
            conv.client(PSH_ACK, b"SSH-2.0-Test\r\n"),
            conv.server(PSH_ACK, b"SSH-2.0-Srv\r\n"),
        ]
    }

    #[test]
    fn test_full_handshake_completes_once() {
        let conv = Conversation::new(50000);
        let client_kex = build_kexinit(&["abc", "xy"], 4);
        let server_kex = build_kexinit(&["def"], 6);

        let mut frames = opening(&conv);
        frames.push(conv.client(PSH_ACK, &client_kex));
        frames.push(conv.server(PSH_ACK, &server_kex));
        frames.push(conv.client(PSH_ACK, &build_kexinit(&["late"], 4)));

        let mut tracker = HandshakeTracker::default();
        let done = feed(&mut tracker, &frames);
        assert_eq!(done.len(), 1);
        assert_eq!(tracker.in_flight(), 0);

        let state = &done[0];
        assert_eq!(state.client.banner.as_deref(), Some(&b"SSH-2.0-Test\r\n"[..]));
        assert_eq!(state.server.banner.as_deref(), Some(&b"SSH-2.0-Srv\r\n"[..]));
        assert_eq!(state.client.kexinit.as_deref(), Some(&client_kex[..]));
        assert_eq!(state.server.kexinit.as_deref(), Some(&server_kex[..]));
    }

    #[test]
    fn test_server_first_kexinit_order() {
        let conv = Conversation::new(50001);
        let mut frames = opening(&conv);
        frames.push(conv.server(PSH_ACK, &build_kexinit(&["def"], 6)));
        frames.push(conv.client(PSH_ACK, &build_kexinit(&["abc"], 4)));

        let done = feed(&mut HandshakeTracker::default(), &frames);
        assert_eq!(done.len(), 1);
        assert_eq!(decode(done[0].client.kexinit.as_ref().unwrap()).unwrap().canonical(), "3-abc");
    }

    #[test]
    fn test_no_syn_never_emits() {
        let conv = Conversation::new(50002);
        let frames = vec![
            conv.client(PSH_ACK, b"SSH-2.0-Test\r\n"),
            conv.server(PSH_ACK, b"SSH-2.0-Srv\r\n"),
            conv.client(PSH_ACK, &build_kexinit(&["abc"], 4)),
            conv.server(PSH_ACK, &build_kexinit(&["def"], 4)),
        ];
        let mut tracker = HandshakeTracker::default();
        assert!(feed(&mut tracker, &frames).is_empty());
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_banners_are_never_overwritten() {
        let conv = Conversation::new(50003);
        let mut frames = opening(&conv);
        frames.push(conv.client(PSH_ACK, b"SSH-2.0-Other\r\n"));

        let mut tracker = HandshakeTracker::default();
        let filter = PortFilter::default();
        for frame in &frames {
            tracker.process(&classify(frame, &filter).unwrap());
        }
        let id = classify(&frames[0], &filter).unwrap().id;
        let state = tracker.get(&id).unwrap();
        assert_eq!(state.client.banner.as_deref(), Some(&b"SSH-2.0-Test\r\n"[..]));
        assert!(state.client.kexinit.is_none());
    }

    #[test]
    fn test_kexinit_before_banners_is_a_banner() {
        let conv = Conversation::new(50004);
        let kex = build_kexinit(&["abc"], 4);
        let frames = vec![conv.client(SYN, b""), conv.client(PSH_ACK, &kex)];

        let mut tracker = HandshakeTracker::default();
        let filter = PortFilter::default();
        for frame in &frames {
            tracker.process(&classify(frame, &filter).unwrap());
        }
        let id = classify(&frames[0], &filter).unwrap().id;
        let state = tracker.get(&id).unwrap();
        assert_eq!(state.client.banner.as_deref(), Some(&kex[..]));
        assert!(state.client.kexinit.is_none());
    }

    #[test]
    fn test_push_split_client_kexinit_is_reassembled() {
        let conv = Conversation::new(50005);
        let kex = build_kexinit(&["curve25519-sha256", "ssh-ed25519"], 4);
        let (head, tail) = kex.split_at(20);

        let mut frames = opening(&conv);
        frames.push(conv.client(PSH_ACK, head));
        frames.push(conv.client(ACK, tail));
        frames.push(conv.server(PSH_ACK, &build_kexinit(&["def"], 4)));

        let done = feed(&mut HandshakeTracker::default(), &frames);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].client.kexinit.as_deref(), Some(&kex[..]));
        assert_eq!(done[0].client.kexinit_segments, 2);
        assert!(!done[0].client.pending_continuation);
    }

    #[test]
    fn test_split_client_kexinit_without_push_is_not_reassembled() {
        let conv = Conversation::new(50006);
        let kex = build_kexinit(&["curve25519-sha256", "ssh-ed25519"], 4);
        let (head, tail) = kex.split_at(20);

        let mut frames = opening(&conv);
        frames.push(conv.client(ACK, head));
        frames.push(conv.client(PSH_ACK, tail));
        frames.push(conv.server(PSH_ACK, &build_kexinit(&["def"], 4)));

        let done = feed(&mut HandshakeTracker::default(), &frames);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].client.kexinit.as_deref(), Some(head));
        assert!(decode(head).is_err());
    }

    #[test]
    fn test_split_server_kexinit_is_not_reassembled() {
        let conv = Conversation::new(50007);
        let kex = build_kexinit(&["curve25519-sha256", "ssh-ed25519"], 4);
        let (head, tail) = kex.split_at(20);

        let mut frames = opening(&conv);
        frames.push(conv.server(PSH_ACK, head));
        frames.push(conv.server(ACK, tail));
        frames.push(conv.client(PSH_ACK, &build_kexinit(&["abc"], 4)));

        let done = feed(&mut HandshakeTracker::default(), &frames);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].server.kexinit.as_deref(), Some(head));
    }

    #[test]
    fn test_declared_length_policy_reassembles_both_directions() {
        let conv = Conversation::new(50008);
        let client_kex = build_kexinit(&["curve25519-sha256", "ssh-ed25519"], 4);
        let server_kex = build_kexinit(&["sntrup761x25519-sha512", "rsa-sha2-512"], 8);

        let mut frames = opening(&conv);
        frames.push(conv.server(ACK, &server_kex[..10]));
        frames.push(conv.client(ACK, &client_kex[..30]));
        frames.push(conv.server(ACK, &server_kex[10..40]));
        frames.push(conv.client(PSH_ACK, &client_kex[30..]));
        frames.push(conv.server(PSH_ACK, &server_kex[40..]));

        let mut tracker = HandshakeTracker::new(Box::new(DeclaredLengthReassembler));
        let done = feed(&mut tracker, &frames);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].client.kexinit.as_deref(), Some(&client_kex[..]));
        assert_eq!(done[0].server.kexinit.as_deref(), Some(&server_kex[..]));
        assert_eq!(done[0].server.kexinit_segments, 3);
    }

    #[test]
    fn test_continuation_looking_like_kexinit_start_is_not_appended() {
        let conv = Conversation::new(50014);
        let kex = build_kexinit(&["curve25519-sha256", "ssh-ed25519"], 4);
        let (head, tail) = kex.split_at(20);
        let mut tail = tail.to_vec();
        tail[5] = 0x14;

        let mut frames = opening(&conv);
        frames.push(conv.client(PSH_ACK, head));
        frames.push(conv.client(ACK, &tail));

        let mut tracker = HandshakeTracker::default();
        assert!(feed(&mut tracker, &frames).is_empty());

        let filter = PortFilter::default();
        let id = classify(&frames[0], &filter).unwrap().id;
        let state = tracker.get(&id).unwrap();
        assert_eq!(state.client.kexinit.as_deref(), Some(head));
        assert_eq!(state.client.kexinit_segments, 1);
        assert!(state.client.pending_continuation);
    }

    #[test]
    fn test_pending_client_continuation_does_not_hold_back_completion() {
        let conv = Conversation::new(50015);
        let kex = build_kexinit(&["curve25519-sha256", "ssh-ed25519"], 4);
        let (head, tail) = kex.split_at(20);

        let mut frames = opening(&conv);
        frames.push(conv.server(PSH_ACK, &build_kexinit(&["def"], 4)));
        frames.push(conv.client(PSH_ACK, head));
        frames.push(conv.client(ACK, tail));

        let mut tracker = HandshakeTracker::default();
        let done = feed(&mut tracker, &frames);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].client.kexinit.as_deref(), Some(head));
        assert!(done[0].client.pending_continuation);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_length_policy_gives_up_on_oversized_declared_length() {
        let conv = Conversation::new(50016);
        let mut bogus = 0xffff_fff0u32.to_be_bytes().to_vec();
        bogus.extend_from_slice(&[4, 0x14]);
        bogus.extend_from_slice(&[0; 100]);

        let mut frames = opening(&conv);
        frames.push(conv.client(PSH_ACK, &bogus));
        frames.push(conv.client(ACK, &[0u8; 1400]));
        frames.push(conv.server(PSH_ACK, &build_kexinit(&["def"], 4)));

        let mut tracker = HandshakeTracker::new(Box::new(DeclaredLengthReassembler));
        let done = feed(&mut tracker, &frames);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].client.kexinit.as_deref(), Some(&bogus[..]));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_length_policy_stops_once_declared_size_is_reached() {
        let conv = Conversation::new(50017);
        let mut head = 30_000u32.to_be_bytes().to_vec();
        head.extend_from_slice(&[4, 0x14]);
        head.extend_from_slice(&[0; 1394]);

        let mut frames = opening(&conv);
        frames.push(conv.client(PSH_ACK, &head));
        for _ in 0..100 {
            frames.push(conv.client(ACK, &[0u8; 1400]));
        }

        let mut tracker = HandshakeTracker::new(Box::new(DeclaredLengthReassembler));
        assert!(feed(&mut tracker, &frames).is_empty());

        let filter = PortFilter::default();
        let id = classify(&frames[0], &filter).unwrap().id;
        let client = &tracker.get(&id).unwrap().client;
        assert_eq!(client.kexinit.as_ref().map(Vec::len), Some(22 * 1400));
        assert_eq!(client.kexinit_segments, 22);
        assert!(!client.pending_continuation);
    }

    #[test]
    fn test_fresh_syn_resets_connection() {
        let conv = Conversation::new(50009);
        let mut frames = opening(&conv);
        frames.push(conv.client(PSH_ACK, &build_kexinit(&["first"], 4)));
        frames.extend(opening(&conv));
        frames.push(conv.client(PSH_ACK, &build_kexinit(&["second"], 4)));
        frames.push(conv.server(PSH_ACK, &build_kexinit(&["def"], 4)));

        let done = feed(&mut HandshakeTracker::default(), &frames);
        assert_eq!(done.len(), 1);
        let fields = decode(done[0].client.kexinit.as_ref().unwrap()).unwrap();
        assert_eq!(fields.canonical(), "6-second");
    }

    #[test]
    fn test_two_incarnations_emit_independently() {
        let conv = Conversation::new(50010);
        let mut frames = Vec::new();
        for name in ["one", "two"] {
            frames.extend(opening(&conv));
            frames.push(conv.client(PSH_ACK, &build_kexinit(&[name], 4)));
            frames.push(conv.server(PSH_ACK, &build_kexinit(&["def"], 4)));
        }

        let done = feed(&mut HandshakeTracker::default(), &frames);
        assert_eq!(done.len(), 2);
    }

    #[test]
    fn test_direction_predicates() {
        let conv = Conversation::new(50011);
        let state = ConnectionState::new(50011, 22);
        let filter = PortFilter::default();

        let up = conv.client(PSH_ACK, b"x");
        let down = conv.server(PSH_ACK, b"x");
        let up = classify(&up, &filter).unwrap();
        let down = classify(&down, &filter).unwrap();

        assert!(is_client_to_server(&state, &up));
        assert!(!is_server_to_client(&state, &up));
        assert!(is_server_to_client(&state, &down));
        assert!(!is_client_to_server(&state, &down));
    }

    #[test]
    fn test_incomplete_connections_stay_in_flight() {
        let a = Conversation::new(50012);
        let b = Conversation::new(50013);
        let mut frames = opening(&a);
        frames.extend(opening(&b));

        let mut tracker = HandshakeTracker::default();
        assert!(feed(&mut tracker, &frames).is_empty());
        assert_eq!(tracker.in_flight(), 2);
    }
}
