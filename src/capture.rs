//! Reads frames off a device and drives the aggregator and the flow table.
use crate::aggregate::Aggregator;
use crate::clock::{Clock, Timestamp};
use crate::config::Config;
use crate::device::Device;
use crate::sink::EventSink;
use crate::tcp::{flags, FlowTable, Segment};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How often idle flows are swept.
const EXPIRY_INTERVAL: Duration = Duration::from_secs(1);

/// Frame counters of a capture.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    /// Frames that were not TCP over IPv4, or were fragments
    pub ignored: u64,
    /// Frames whose headers could not be decoded
    pub undecodable: u64,
}

pub struct Capture {
    device: Box<dyn Device>,
    clock: Arc<dyn Clock>,
    aggregator: Aggregator,
    table: FlowTable,
    stats: CaptureStats,
    last_expiry: Option<Timestamp>,
}

impl Capture {
    pub fn new(
        device: Box<dyn Device>,
        clock: Arc<dyn Clock>,
        config: Config,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let aggregator = Aggregator::new(config.flow_timeout);
        Self {
            device,
            clock,
            aggregator,
            table: FlowTable::new(config, sink),
            stats: CaptureStats::default(),
            last_expiry: None,
        }
    }

    pub fn table(&self) -> &FlowTable {
        &self.table
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Read frames until the device runs dry, fails, or `limit` frames were handled.
    pub fn run(&mut self, limit: Option<u64>) -> io::Result<()> {
        let mut handled = 0u64;
        while limit.map_or(true, |limit| handled < limit) {
            match self.poll() {
                Ok(true) => handled += 1,
                Ok(false) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        info!("capture stopped after {} frames", handled);
        Ok(())
    }

    /// Handle at most one frame; `false` when the device had none ready.
    pub fn poll(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 65_536];
        let n = match self.device.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        };
        let now = self.clock.now();
        self.handle_packet(&buf[..n], now);
        self.sweep(now);
        Ok(true)
    }

    /// Feed one raw IPv4 frame captured at `ts`.
    pub fn handle_packet(&mut self, packet: &[u8], ts: Timestamp) {
        self.stats.frames += 1;
        let (flow, seg) = match Segment::parse(packet, ts) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                self.stats.ignored += 1;
                trace!("ignoring non-TCP frame of {} bytes", packet.len());
                return;
            }
            Err(e) => {
                self.stats.undecodable += 1;
                warn!("dropping frame of {} bytes: {}", packet.len(), e);
                return;
            }
        };

        let (aggregate, direction) = self.aggregator.assign(flow, &seg, &mut self.table);
        if let Err(e) = self.table.on_segment(aggregate, direction, &seg) {
            warn!("[#{}] {} segment rejected: {}", aggregate, direction, e);
        }
        if seg.is_rst() {
            debug!(
                "[#{}] {} reset (flags={}), tearing down",
                aggregate,
                direction,
                flags::flags_to_string(seg.flags)
            );
            self.aggregator.retire(flow, &mut self.table);
        }
    }

    fn sweep(&mut self, now: Timestamp) {
        let last = *self.last_expiry.get_or_insert(now);
        if now.since(last) < EXPIRY_INTERVAL {
            return;
        }
        self.last_expiry = Some(now);
        let expired = self.aggregator.expire(now, &mut self.table);
        if expired > 0 {
            debug!("{} idle flows expired", expired);
        }
    }

    /// Retire every remaining flow, finalizing their open loss events.
    pub fn finish(&mut self) {
        self.aggregator.flush(&mut self.table);
        self.table.shutdown();
    }
}
