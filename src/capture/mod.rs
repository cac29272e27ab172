//! Frame sources: turn a capture file into a sequence of decoded [`Frame`]s.
pub mod pcap;
pub mod tshark;

use std::fs::File;
use std::io::{self, Read};

use flate2::read::GzDecoder;

use crate::analyser::containers::Frame;
use crate::error::Result;

/// Frames of one capture, in capture order. An `Err` item means the capture became unreadable.
pub type FrameSource = Box<dyn Iterator<Item = Result<Frame>>>;

/// Which decoder turns capture bytes into frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Decoder {
    #[default]
    Native,
    Tshark,
}

/// Opens a capture. An empty filename reads standard input; `.gz` files are decompressed.
pub fn open(filename: &str, decoder: Decoder) -> Result<FrameSource> {
    match decoder {
        Decoder::Native => {
            let frames = pcap::PcapFrames::new(open_reader(filename)?)?;
            Ok(Box::new(frames))
        }
        Decoder::Tshark => {
            let path = if filename.is_empty() { "-" } else { filename };
            Ok(Box::new(tshark::TsharkFrames::spawn(path)?))
        }
    }
}

fn open_reader(filename: &str) -> Result<Box<dyn Read + Send>> {
    if filename.is_empty() {
        return Ok(Box::new(io::stdin()));
    }

    let file = File::open(filename)?;
    if filename.to_lowercase().ends_with(".gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}
