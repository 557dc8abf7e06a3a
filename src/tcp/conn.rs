//! Both directions of one flow
use crate::clock::Timestamp;
use crate::config::Config;
use crate::sink::{EventSink, FlowSummary};
use crate::tcp::flags;
use crate::tcp::pool::PacketPool;
use crate::tcp::segment::{Direction, FlowId, Segment};
use crate::tcp::stream::{Ctx, StreamInfo};
use std::fmt;
use tracing::{debug, warn};

/// Table-wide resources a flow borrows while handling a segment.
pub(crate) struct Env<'a> {
    pub config: &'a Config,
    pub pool: &'a mut PacketPool,
    pub sink: &'a mut (dyn EventSink + 'static),
}

pub struct ConnInfo {
    aggregate: u64,
    flow: Option<FlowId>,
    init_time: Timestamp,
    streams: [StreamInfo; 2],
}

impl fmt::Debug for ConnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnInfo")
            .field("aggregate", &self.aggregate)
            .field("flow", &self.flow)
            .field("init_time", &self.init_time)
            .field("forward", &self.streams[0])
            .field("reverse", &self.streams[1])
            .finish()
    }
}

impl ConnInfo {
    /// State for a flow whose first segment is `first`.
    pub fn new(aggregate: u64, flow: Option<FlowId>, first: &Segment) -> Self {
        ConnInfo {
            aggregate,
            flow,
            init_time: first.timestamp,
            streams: [
                StreamInfo::new(Direction::Forward),
                StreamInfo::new(Direction::Reverse),
            ],
        }
    }

    pub fn aggregate(&self) -> u64 {
        self.aggregate
    }

    pub fn flow(&self) -> Option<FlowId> {
        self.flow
    }

    pub fn init_time(&self) -> Timestamp {
        self.init_time
    }

    pub fn stream(&self, direction: Direction) -> &StreamInfo {
        &self.streams[direction.index()]
    }

    /// Route a segment: its payload to the sender's stream, its ACK to the other one.
    pub(crate) fn handle_segment(&mut self, direction: Direction, seg: &Segment, env: &mut Env<'_>) {
        if let Err(err) = seg.check() {
            warn!("[#{}] {} dropped: {}", self.aggregate, direction, err);
            self.streams[direction.index()].count_malformed();
            env.sink.anomaly(self.aggregate, &err);
            return;
        }
        debug!(
            "[#{}] {} RX: flags={} seq={} ack={} len={}",
            self.aggregate,
            direction,
            flags::flags_to_string(seg.flags),
            seg.seq,
            seg.ack,
            seg.len
        );

        let [forward, reverse] = &mut self.streams;
        let (sender, peer) = match direction {
            Direction::Forward => (forward, reverse),
            Direction::Reverse => (reverse, forward),
        };
        let mut ctx = Ctx {
            aggregate: self.aggregate,
            origin: self.init_time,
            config: env.config,
            pool: &mut *env.pool,
            sink: &mut *env.sink,
        };

        let ack = if seg.has_ack() {
            peer.ack_offset(seg.ack)
        } else {
            0
        };
        sender.on_data(seg, ack, &mut ctx);
        if seg.has_ack() {
            peer.on_ack(seg.ack, seg.timestamp, seg.len, &mut ctx);
        }
    }

    /// Finalize open events in both directions and release every packet record.
    pub(crate) fn kill(&mut self, env: &mut Env<'_>) -> FlowSummary {
        for stream in self.streams.iter_mut() {
            let mut ctx = Ctx {
                aggregate: self.aggregate,
                origin: self.init_time,
                config: env.config,
                pool: &mut *env.pool,
                sink: &mut *env.sink,
            };
            stream.finish(&mut ctx);
        }
        self.summary()
    }

    pub fn summary(&self) -> FlowSummary {
        FlowSummary {
            aggregate: self.aggregate,
            flow: self.flow,
            first_seen: self.init_time,
            streams: [self.streams[0].stats(), self.streams[1].stats()],
        }
    }
}
