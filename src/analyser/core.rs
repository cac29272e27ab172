use super::classify::{classify, PortFilter};
use super::containers::{BannerStyle, Frame, OutputRecord};
use super::fingerprint;
use super::reassembly::ReassemblyPolicy;
use super::tracker::HandshakeTracker;
use crate::error::Result;

/// Settings of the analysis core, independent of where frames come from or where records go.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnalysisConfig {
    pub ports: PortFilter,
    pub banner_style: BannerStyle,
    pub reassembly: ReassemblyPolicy,
}

/// Receives records in emission order.
pub trait RecordSink {
    fn write_record(&mut self, record: &OutputRecord) -> Result<()>;
}

impl RecordSink for Vec<OutputRecord> {
    fn write_record(&mut self, record: &OutputRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Counters for one analysed capture source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceSummary {
    pub frames: u64,
    pub relevant: u64,
    pub handshakes: u64,
    pub records: u64,
    /// Connections still waiting for part of their handshake when the source ended.
    pub incomplete: usize,
}

/// Runs one capture source through the handshake tracker, writing every record to `sink`.
///
/// Each call owns a fresh connection table. A frame source error ends the analysis of this
/// source and is returned; the table is dropped with it.
pub fn analyse<I, S>(frames: I, config: &AnalysisConfig, sink: &mut S) -> Result<SourceSummary>
where
    I: IntoIterator<Item = Result<Frame>>,
    S: RecordSink + ?Sized,
{
    log::info!("Starting analysis.");
    let mut tracker = HandshakeTracker::new(config.reassembly.reassembler());
    let mut summary = SourceSummary::default();

    for frame in frames {
        let frame = frame?;
        summary.frames += 1;

        let Some(classified) = classify(&frame, &config.ports) else {
            continue;
        };
        summary.relevant += 1;

        if let Some(state) = tracker.process(&classified) {
            log::debug!("Handshake complete on {} at {}", classified.id, frame.timestamp);
            summary.handshakes += 1;

            for record in fingerprint::records(&state, config.banner_style) {
                sink.write_record(&record)?;
                summary.records += 1;
            }
        }
    }

    summary.incomplete = tracker.in_flight();
    log::info!(
        "{} frames, {} relevant, {} handshakes, {} records, {} incomplete",
        summary.frames,
        summary.relevant,
        summary.handshakes,
        summary.records,
        summary.incomplete
    );

    Ok(summary)
}
