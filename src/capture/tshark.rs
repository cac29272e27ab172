//! Frame source backed by tshark, through rtshark.
//!
//! Useful for captures whose link layer the native reader does not understand. tshark does
//! the decoding; only the fields the tracker needs are pulled out of each packet.
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use rtshark::{Packet, RTShark};

use crate::analyser::containers::{Frame, TcpFlags, TransportProtocol};
use crate::error::{Error, Result};

pub struct TsharkFrames {
    rtshark: RTShark,
    skipped: u64,
}

impl TsharkFrames {
    /// Spawns tshark on `filepath` (`-` reads standard input).
    pub fn spawn(filepath: &str) -> Result<Self> {
        let builder = rtshark::RTSharkBuilder::builder()
            .input_path(filepath)
            .display_filter("tcp");

        let rtshark = builder.spawn().map_err(|err| Error::Tshark {
            reason: format!("Error spawning tshark: {err}"),
        })?;
        log::info!("Reading {} through tshark", filepath);

        Ok(Self { rtshark, skipped: 0 })
    }
}

impl Iterator for TsharkFrames {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.rtshark.read() {
                Ok(Some(packet)) => match packet_to_frame(&packet) {
                    Some(frame) => return Some(Ok(frame)),
                    None => self.skipped += 1,
                },
                Ok(None) => {
                    if self.skipped > 0 {
                        log::info!("Skipped {} packets without usable TCP/IP metadata", self.skipped);
                    }
                    return None;
                }
                Err(e) => {
                    return Some(Err(Error::Tshark {
                        reason: format!("Error parsing TShark output: {e}"),
                    }))
                }
            }
        }
    }
}

impl Drop for TsharkFrames {
    fn drop(&mut self) {
        self.rtshark.kill();
    }
}

fn packet_to_frame(packet: &Packet) -> Option<Frame> {
    let (src, dst) = if let Some(ip) = packet.layer_name("ip") {
        (ip.metadata("ip.src")?.value(), ip.metadata("ip.dst")?.value())
    } else {
        let ipv6 = packet.layer_name("ipv6")?;
        (ipv6.metadata("ipv6.src")?.value(), ipv6.metadata("ipv6.dst")?.value())
    };

    let tcp = packet.layer_name("tcp")?;
    let src_port = tcp.metadata("tcp.srcport")?.value().parse().ok()?;
    let dst_port = tcp.metadata("tcp.dstport")?.value().parse().ok()?;
    let flags = parse_flags(tcp.metadata("tcp.flags")?.value())?;
    let payload = match tcp.metadata("tcp.payload") {
        Some(payload) => parse_payload(payload.value())?,
        None => Vec::new(),
    };

    let timestamp = packet
        .timestamp_micros()
        .and_then(|micros| {
            DateTime::<Utc>::from_timestamp(
                micros.div_euclid(1_000_000),
                (micros.rem_euclid(1_000_000) * 1000) as u32,
            )
        })
        .unwrap_or_default();

    Some(Frame {
        timestamp,
        src: src.parse::<IpAddr>().ok()?,
        dst: dst.parse::<IpAddr>().ok()?,
        src_port,
        dst_port,
        protocol: TransportProtocol::Tcp,
        flags,
        payload,
    })
}

/// `tcp.flags` is shown as a hex word such as `0x0018`.
fn parse_flags(value: &str) -> Option<TcpFlags> {
    let digits = value.trim_start_matches("0x");
    let bits = u16::from_str_radix(digits, 16).ok()?;
    Some(TcpFlags::from_u8((bits & 0xff) as u8))
}

/// `tcp.payload` is shown either as colon-separated or as plain hex bytes.
fn parse_payload(value: &str) -> Option<Vec<u8>> {
    let digits: String = value.chars().filter(|c| *c != ':').collect();
    hex::decode(digits).ok()
}
