//! Native pcap/pcapng frame source.
//!
//! Blocks are read with `pcap_parser`; link, network and transport headers are decoded with
//! `etherparse`. Frames that do not decode are skipped and counted, a corrupt capture ends the
//! source with an error.
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use etherparse::{NetHeaders, PacketHeaders, TransportHeader};
use pcap_parser::pcapng::Block;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{create_reader, Linktype, PcapBlockOwned, PcapError};

use crate::analyser::containers::{Frame, TcpFlags, TransportProtocol};
use crate::error::{Error, Result};

/// Buffer size for pcap_parser readers.
const BUFFER_SIZE: usize = 262144;

/// Microsecond resolution, the pcapng default.
const DEFAULT_IF_TSRESOL: u8 = 6;

#[derive(Clone, Copy, Debug)]
struct Interface {
    linktype: Linktype,
    tsresol: u8,
}

impl Default for Interface {
    fn default() -> Self {
        Self { linktype: Linktype::ETHERNET, tsresol: DEFAULT_IF_TSRESOL }
    }
}

impl Interface {
    fn timestamp(&self, hi: u32, lo: u32) -> DateTime<Utc> {
        let ticks = (u128::from(hi) << 32) | u128::from(lo);
        let units: u128 = if self.tsresol & 0x80 == 0 {
            10u128.pow(u32::from(self.tsresol))
        } else {
            2u128.pow(u32::from(self.tsresol & 0x7F))
        };
        let secs = ticks / units;
        let nanos = (ticks % units) * 1_000_000_000 / units;
        DateTime::from_timestamp(secs as i64, nanos as u32).unwrap_or_default()
    }
}

/// Iterator over the decoded frames of one pcap or pcapng stream.
pub struct PcapFrames<'a> {
    reader: Box<dyn PcapReaderIterator + 'a>,
    legacy: Interface,
    legacy_nanos: bool,
    interfaces: Vec<Interface>,
    skipped: u64,
    finished: bool,
}

impl<'a> PcapFrames<'a> {
    pub fn new<R: Read + Send + 'a>(source: R) -> Result<Self> {
        let reader = create_reader(BUFFER_SIZE, source).map_err(|e| Error::Capture {
            reason: format!("Not a pcap or pcapng capture: {}", e),
        })?;

        Ok(Self {
            reader,
            legacy: Interface::default(),
            legacy_nanos: false,
            interfaces: Vec::new(),
            skipped: 0,
            finished: false,
        })
    }

    /// Frames that were read but could not be decoded.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn finish(&mut self) {
        self.finished = true;
        if self.skipped > 0 {
            log::info!("Skipped {} undecodable frames", self.skipped);
        }
    }
}

impl<'a> Iterator for PcapFrames<'a> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let decoded = match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            self.legacy.linktype = header.network;
                            self.legacy_nanos = header.is_nanosecond_precision();
                            None
                        }
                        PcapBlockOwned::Legacy(packet) => {
                            // ts_usec holds nanoseconds in nanosecond-precision files
                            let nanos = if self.legacy_nanos {
                                packet.ts_usec
                            } else {
                                packet.ts_usec.saturating_mul(1000)
                            };
                            let ts = DateTime::from_timestamp(i64::from(packet.ts_sec), nanos).unwrap_or_default();
                            Some(decode_frame(self.legacy.linktype, packet.data, ts))
                        }
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            self.interfaces.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            self.interfaces.push(Interface { linktype: idb.linktype, tsresol: idb.if_tsresol });
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let interface = self.interfaces.get(epb.if_id as usize).copied().unwrap_or_default();
                            let ts = interface.timestamp(epb.ts_high, epb.ts_low);
                            Some(decode_frame(interface.linktype, epb.data, ts))
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                            let interface = self.interfaces.first().copied().unwrap_or_default();
                            Some(decode_frame(interface.linktype, spb.data, DateTime::default()))
                        }
                        _ => None,
                    };
                    self.reader.consume(offset);

                    match decoded {
                        Some(Some(frame)) => return Some(Ok(frame)),
                        Some(None) => self.skipped += 1,
                        None => {}
                    }
                }
                Err(PcapError::Eof) => {
                    self.finish();
                    return None;
                }
                Err(PcapError::UnexpectedEof) => {
                    log::warn!("Capture ends in the middle of a block");
                    self.finish();
                    return None;
                }
                Err(PcapError::Incomplete(_)) => {
                    if let Err(e) = self.reader.refill() {
                        let reason = format!("Refill error: {}", e);
                        self.finish();
                        return Some(Err(Error::Capture { reason }));
                    }
                }
                Err(e) => {
                    let reason = format!("Parse error: {}", e);
                    self.finish();
                    return Some(Err(Error::Capture { reason }));
                }
            }
        }
    }
}

/// Decodes one captured frame. Returns `None` when it is not IP or does not decode.
pub fn decode_frame(linktype: Linktype, data: &[u8], timestamp: DateTime<Utc>) -> Option<Frame> {
    let headers = match linktype {
        Linktype::ETHERNET => PacketHeaders::from_ethernet_slice(data).ok()?,
        // Raw IP, including the platform-specific DLT_RAW values and LINKTYPE_IPV4/IPV6
        Linktype::RAW | Linktype(12) | Linktype(14) | Linktype(228) | Linktype(229) => {
            PacketHeaders::from_ip_slice(data).ok()?
        }
        // BSD loopback: 4-byte address family header
        Linktype::NULL | Linktype(108) => PacketHeaders::from_ip_slice(data.get(4..)?).ok()?,
        Linktype::LINUX_SLL => {
            let ethertype = u16::from_be_bytes([*data.get(14)?, *data.get(15)?]);
            if ethertype != 0x0800 && ethertype != 0x86DD {
                return None;
            }
            PacketHeaders::from_ip_slice(data.get(16..)?).ok()?
        }
        _ => {
            log::debug!("Unsupported link type {:?}", linktype);
            return None;
        }
    };

    let (src, dst) = match headers.net {
        Some(NetHeaders::Ipv4(ref h, _)) => {
            (IpAddr::V4(Ipv4Addr::from(h.source)), IpAddr::V4(Ipv4Addr::from(h.destination)))
        }
        Some(NetHeaders::Ipv6(ref h, _)) => {
            (IpAddr::V6(Ipv6Addr::from(h.source)), IpAddr::V6(Ipv6Addr::from(h.destination)))
        }
        _ => return None,
    };

    let (protocol, src_port, dst_port, flags) = match headers.transport {
        Some(TransportHeader::Tcp(ref tcp)) => {
            let flags = TcpFlags {
                fin: tcp.fin,
                syn: tcp.syn,
                rst: tcp.rst,
                psh: tcp.psh,
                ack: tcp.ack,
                urg: tcp.urg,
                ece: tcp.ece,
                cwr: tcp.cwr,
            };
            (TransportProtocol::Tcp, tcp.source_port, tcp.destination_port, flags)
        }
        Some(TransportHeader::Udp(ref udp)) => {
            (TransportProtocol::Udp, udp.source_port, udp.destination_port, TcpFlags::default())
        }
        _ => (TransportProtocol::Other, 0, 0, TcpFlags::default()),
    };

    Some(Frame {
        timestamp,
        src,
        dst,
        src_port,
        dst_port,
        protocol,
        flags,
        payload: headers.payload.slice().to_vec(),
    })
}
