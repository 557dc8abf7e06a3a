//! One direction of a flow: segment classification and loss events
use crate::clock::Timestamp;
use crate::config::Config;
use crate::error::Error;
use crate::sink::{AckTrace, EventSink, LossCause, LossEvent, LossKind, SendTrace, StreamStats};
use crate::tcp::pool::{Handle, PacketList, PacketPool, Pkt, PktFlags};
use crate::tcp::seq::SequenceSpace;
use crate::tcp::segment::{Direction, Segment};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Gaps below this are treated as this, so the ratio test never divides by zero.
const MIN_GAP: f64 = 0.000_001;
/// The doubling counter saturates here, a backoff of five.
const MAX_DOUBLING: u32 = 32;

/// What a stream needs from its flow and the table while handling one segment.
pub(crate) struct Ctx<'a> {
    pub aggregate: u64,
    /// First timestamp of the flow, origin of relative times
    pub origin: Timestamp,
    pub config: &'a Config,
    pub pool: &'a mut PacketPool,
    pub sink: &'a mut (dyn EventSink + 'static),
}

#[derive(Debug, Clone, Copy)]
struct LossState {
    id: u32,
    kind: LossKind,
    cause: LossCause,
    seq: u64,
    end: u64,
    time: Timestamp,
    end_time: Timestamp,
}

/// Timer-doubling detector: successive retransmission gaps growing 2x mean RTO backoff.
#[derive(Debug, Default, Clone, Copy)]
struct Backoff {
    prev_diff: f64,
    doubling: u32,
    prev_doubling: u32,
}

impl Backoff {
    /// Attribute a retransmission sent `gap` seconds after the previous send of its bytes.
    ///
    /// The doubling counter follows the gap while at most `threshold` duplicate ACKs were
    /// seen; the cause is a triple-dup once that many arrived.
    fn classify(&mut self, gap: f64, dup_acks: u32, threshold: u32, tolerance: f64) -> LossCause {
        let triple = dup_acks >= threshold;
        if self.prev_diff == 0.0 {
            self.prev_diff = gap;
        } else {
            let ratio = gap / self.prev_diff.max(MIN_GAP);
            if self.doubling >= MAX_DOUBLING && (1.0 - ratio).abs() < tolerance {
                debug!("doubling threshold reached, gap {:.6}s", gap);
            } else if dup_acks <= threshold {
                if (2.0 - ratio).abs() < tolerance {
                    if self.doubling < 1 {
                        self.doubling = self.prev_doubling;
                    }
                    self.doubling = (self.doubling * 2).min(MAX_DOUBLING);
                } else {
                    self.prev_doubling = self.doubling;
                    self.doubling = 0;
                }
            }
        }

        if triple {
            LossCause::TripleDupAck
        } else {
            self.doubling = self.doubling.max(1);
            self.prev_diff = gap;
            LossCause::Timeout {
                backoff: self.doubling.ilog2(),
            }
        }
    }
}

/// Per-direction state.
///
/// All sequence numbers are relative to the direction's [`SequenceSpace`]. The invariant
/// `max_live_seq <= max_seq` holds after every update, and event ids only grow.
pub struct StreamInfo {
    direction: Direction,
    space: SequenceSpace,
    have_syn: bool,
    have_fin: bool,
    have_ack: bool,
    syn_seq: u32,
    fin_seq: u64,

    /// Highest byte offset sent
    max_seq: u64,
    /// Highest byte offset acknowledged by the peer
    max_ack: u64,
    /// New-data high-water mark since the last event closed
    max_live_seq: u64,
    /// `max_seq` when the current or last event opened: its recovery window
    max_loss_seq: u64,
    /// Highest byte sent in the current round
    window_high: u64,

    stats: StreamStats,
    event_id: u32,

    packets: PacketList,
    by_start: HashMap<u64, Handle>,
    by_end: HashMap<u64, Handle>,
    /// How often the peer acknowledged each offset at or above `max_ack`
    ack_counts: BTreeMap<u64, u32>,
    /// Bumped on every ACK for this direction
    ack_epoch: u64,
    backoff: Backoff,

    loss: Option<LossState>,
    /// Last finalized event, while a spurious-retransmission verdict is still possible
    last_closed: Option<LossState>,
}

impl fmt::Debug for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInfo")
            .field("direction", &self.direction)
            .field("init_seq", &self.space.init_seq())
            .field("max_seq", &self.max_seq)
            .field("max_ack", &self.max_ack)
            .field("max_live_seq", &self.max_live_seq)
            .field("max_loss_seq", &self.max_loss_seq)
            .field("event_id", &self.event_id)
            .field("packets.len()", &self.packets.len())
            .field("loss", &self.loss)
            .finish()
    }
}

impl StreamInfo {
    pub fn new(direction: Direction) -> Self {
        StreamInfo {
            direction,
            space: SequenceSpace::default(),
            have_syn: false,
            have_fin: false,
            have_ack: false,
            syn_seq: 0,
            fin_seq: 0,
            max_seq: 0,
            max_ack: 0,
            max_live_seq: 0,
            max_loss_seq: 0,
            window_high: 0,
            stats: StreamStats::default(),
            event_id: 0,
            packets: PacketList::default(),
            by_start: HashMap::new(),
            by_end: HashMap::new(),
            ack_counts: BTreeMap::new(),
            ack_epoch: 0,
            backoff: Backoff::default(),
            loss: None,
            last_closed: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn space(&self) -> &SequenceSpace {
        &self.space
    }

    pub fn max_seq(&self) -> u64 {
        self.max_seq
    }

    pub fn max_ack(&self) -> u64 {
        self.max_ack
    }

    pub fn max_live_seq(&self) -> u64 {
        self.max_live_seq
    }

    pub fn max_loss_seq(&self) -> u64 {
        self.max_loss_seq
    }

    /// Id of the most recent loss event, 0 before the first.
    pub fn event_id(&self) -> u32 {
        self.event_id
    }

    pub fn has_open_loss(&self) -> bool {
        self.loss.is_some()
    }

    pub fn have_syn(&self) -> bool {
        self.have_syn
    }

    pub fn have_fin(&self) -> bool {
        self.have_fin
    }

    /// Raw sequence number of the SYN, once one was seen.
    pub fn syn_seq(&self) -> Option<u32> {
        self.have_syn.then_some(self.syn_seq)
    }

    /// Relative offset of the FIN, once one was seen.
    pub fn fin_seq(&self) -> Option<u64> {
        self.have_fin.then_some(self.fin_seq)
    }

    pub fn retained(&self) -> usize {
        self.packets.len()
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            max_seq: self.max_seq,
            max_ack: self.max_ack,
            ..self.stats
        }
    }

    pub(crate) fn count_malformed(&mut self) {
        self.stats.total_packets += 1;
        self.stats.malformed += 1;
    }

    /// Position of a raw ACK value in this direction's space, 0 while it has no origin.
    pub(crate) fn ack_offset(&self, raw: u32) -> u64 {
        if self.space.is_initialized() {
            self.space.relative(raw, self.max_seq)
        } else {
            0
        }
    }

    /// Account for a segment this direction sent.
    pub(crate) fn on_data(&mut self, seg: &Segment, ack: u64, ctx: &mut Ctx<'_>) {
        self.stats.total_packets += 1;

        let mut raw_seq = seg.seq;
        if seg.is_syn() {
            if !self.have_syn {
                self.have_syn = true;
                self.syn_seq = seg.seq;
            }
            raw_seq = seg.seq.wrapping_add(1);
            self.space.init(raw_seq);
        }
        if !self.space.is_initialized() {
            if seg.len == 0 {
                // nothing to anchor the sequence space on yet
                self.have_fin |= seg.is_fin();
                return;
            }
            self.space.init(raw_seq);
        }

        let len = u64::from(seg.len);
        self.stats.total_bytes += len;
        let Some(seq) = self.space.position(raw_seq, self.max_seq) else {
            if len > 0 {
                self.before_origin(raw_seq, seg, ctx);
            }
            return;
        };
        let end = seq + len;
        if seg.is_fin() && !self.have_fin {
            self.have_fin = true;
            self.fin_seq = end;
        }

        // keepalives sit one byte below the high-water mark
        if len <= 1 && self.max_seq > 0 && seq + 1 == self.max_seq {
            debug!(
                "[#{}] {} keepalive seq={} len={}",
                ctx.aggregate, self.direction, seq, len
            );
            self.trace_send(seq, end, PktFlags::KEEPALIVE, seg.timestamp, ctx);
            return;
        }
        if len == 0 {
            return;
        }

        let mut flags = PktFlags::empty();
        let mut original = None;
        if seq >= self.max_seq {
            flags |= PktFlags::NEW;
            if seq > self.max_seq {
                flags |= PktFlags::STRANGE;
                debug!(
                    "[#{}] {} possible gap in byte sequence {} - {}",
                    ctx.aggregate, self.direction, self.max_seq, seq
                );
            }
        } else if self.is_duplicate(seq, end, seg, ctx) {
            flags |= PktFlags::DUPLICATE;
        } else {
            match self.find_sent(seq, end, ctx.pool) {
                Some(pkt) => {
                    original = Some(pkt);
                    flags |= if end <= self.max_seq {
                        PktFlags::REXMIT
                    } else {
                        PktFlags::PARTIAL_REXMIT
                    };
                }
                None => {
                    flags |= PktFlags::REORDER;
                    self.stats.reorderings += 1;
                    let err = Error::UnresolvedReordering { seq, end };
                    debug!("[#{}] {} {}", ctx.aggregate, self.direction, err);
                    ctx.sink.anomaly(ctx.aggregate, &err);
                }
            }
        }

        let mut event_id = 0;
        if let Some(original) = original {
            self.stats.rexmits += 1;
            event_id = self.on_retransmit(seq, end, seg.timestamp, original, ctx);
        } else if flags.contains(PktFlags::NEW) {
            self.close_loss(ctx);
        }

        if end > self.max_seq {
            self.max_seq = end;
        }
        if flags.contains(PktFlags::NEW) && end > self.max_live_seq {
            self.max_live_seq = end;
        }
        if end > self.window_high {
            self.window_high = end;
        }

        debug!(
            "[#{}] {} seq={} end={} {:?} max_seq={} max_ack={}",
            ctx.aggregate, self.direction, seq, end, flags, self.max_seq, self.max_ack
        );

        let pkt = Pkt {
            seq,
            end,
            ack,
            timestamp: seg.timestamp,
            ip_id: seg.ip_id,
            flags,
            event_id,
            ack_epoch: self.ack_epoch,
        };
        self.remember(pkt, ctx);
        self.trace_send(seq, end, flags, seg.timestamp, ctx);
    }

    /// A segment starting before the origin, sent before the capture saw this direction
    /// begin. It cannot be matched to any record, so it is reported as reordering with its
    /// range clamped at the origin.
    fn before_origin(&mut self, raw_seq: u32, seg: &Segment, ctx: &mut Ctx<'_>) {
        let end = self
            .space
            .position(raw_seq.wrapping_add(seg.len), self.max_seq)
            .unwrap_or(0);
        self.stats.reorderings += 1;
        let err = Error::UnresolvedReordering { seq: 0, end };
        debug!(
            "[#{}] {} raw seq {} precedes origin: {}",
            ctx.aggregate, self.direction, raw_seq, err
        );
        ctx.sink.anomaly(ctx.aggregate, &err);
        self.trace_send(0, end, PktFlags::REORDER, seg.timestamp, ctx);
    }

    /// Account for an acknowledgement of this direction's data sent by the peer.
    pub(crate) fn on_ack(&mut self, raw_ack: u32, ts: Timestamp, peer_len: u32, ctx: &mut Ctx<'_>) {
        self.space.init(raw_ack);
        let ack = self.space.relative(raw_ack, self.max_seq);
        self.ack_epoch += 1;

        let advanced = !self.have_ack || ack > self.max_ack;
        let is_duplicate = !advanced && ack == self.max_ack && peer_len == 0;
        if advanced {
            // Karn: only segments sent once give a clean bounce
            if let Some(pkt) = self.by_end.get(&ack).and_then(|h| ctx.pool.get(*h)) {
                if pkt.flags.contains(PktFlags::NEW) {
                    let bounce = ts.since(pkt.timestamp);
                    let min = self.stats.min_ack_bounce.get_or_insert(bounce);
                    *min = (*min).min(bounce);
                }
            }
            self.have_ack = true;
            self.max_ack = ack;
            self.ack_counts.retain(|&a, _| a >= ack);
        }
        if ack >= self.max_ack {
            *self.ack_counts.entry(ack).or_insert(0) += 1;
        }

        if ctx.config.ack_match {
            let trace = AckTrace {
                aggregate: ctx.aggregate,
                direction: self.direction,
                timestamp: self.report_time(ts, ctx),
                ack_seq: self.report_seq(ack, ctx),
                is_duplicate,
            };
            ctx.sink.ack_trace(&trace);
        }

        self.check_false_loss(ack, ts, ctx);
    }

    /// Finalize whatever is still open and give every record back to the pool.
    pub(crate) fn finish(&mut self, ctx: &mut Ctx<'_>) {
        self.close_loss(ctx);
        self.last_closed = None;
        self.packets.clear(ctx.pool);
        self.by_start.clear();
        self.by_end.clear();
        self.ack_counts.clear();
    }

    fn is_duplicate(&self, seq: u64, end: u64, seg: &Segment, ctx: &Ctx<'_>) -> bool {
        let Some(tail) = self.packets.tail().and_then(|h| ctx.pool.get(h)) else {
            return false;
        };
        // an id of 0 means the caller had none to give
        let same_id =
            !ctx.config.ip_id || tail.ip_id == 0 || seg.ip_id == 0 || tail.ip_id == seg.ip_id;
        tail.seq == seq
            && tail.end == end
            && tail.ack_epoch == self.ack_epoch
            && tail.timestamp == seg.timestamp
            && same_id
    }

    /// Most recent send of the bytes starting at `seq`.
    ///
    /// Exact start first, then exact end, then the newest retained record containing `seq`.
    fn find_sent(&self, seq: u64, end: u64, pool: &PacketPool) -> Option<Pkt> {
        if let Some(pkt) = self.by_start.get(&seq).and_then(|h| pool.get(*h)) {
            return Some(*pkt);
        }
        if let Some(pkt) = self.by_end.get(&end).and_then(|h| pool.get(*h)) {
            return Some(*pkt);
        }
        self.packets
            .iter_rev(pool)
            .find(|(_, p)| p.seq <= seq && seq < p.end)
            .map(|(_, p)| *p)
    }

    /// Dup-ack count of the highest acknowledged offset at or below `seq`.
    fn dup_acks_at(&self, seq: u64) -> u32 {
        self.ack_counts
            .range(..=seq)
            .next_back()
            .map(|(_, &n)| n)
            .unwrap_or(0)
    }

    fn on_retransmit(
        &mut self,
        seq: u64,
        end: u64,
        ts: Timestamp,
        original: Pkt,
        ctx: &mut Ctx<'_>,
    ) -> u32 {
        let lost = end.min(self.max_seq) - seq;
        let repeated = original.flags.is_rexmit();

        if let Some(ev) = self.loss.as_mut() {
            if !repeated && seq < self.max_loss_seq {
                ev.seq = ev.seq.min(seq);
                ev.end = ev.end.max(end);
                ev.end_time = ts;
                self.stats.bytes_lost += lost;
                return ev.id;
            }
            self.close_loss(ctx);
        }

        let unacked = end > self.max_ack;
        let fresh = seq >= self.max_loss_seq;
        let dup_acks = self.dup_acks_at(seq);
        let triple = dup_acks >= ctx.config.dup_ack_threshold;
        if !unacked || !(fresh || triple || repeated) {
            return 0;
        }

        let gap = ts.since(original.timestamp).as_secs_f64();
        let cause = self.backoff.classify(
            gap,
            dup_acks,
            ctx.config.dup_ack_threshold,
            ctx.config.timeout_tolerance,
        );
        let kind = if triple {
            LossKind::Loss
        } else if self.window_high.saturating_sub(end) > ctx.config.possible_loss_margin {
            LossKind::PossibleLoss
        } else {
            LossKind::Loss
        };
        match kind {
            LossKind::Loss => self.stats.loss_events += 1,
            _ => self.stats.possible_loss_events += 1,
        }

        self.event_id += 1;
        self.stats.bytes_lost += lost;
        self.max_loss_seq = self.max_seq.max(end);
        self.window_high = end;
        self.ack_counts.retain(|&a, _| a > seq);
        self.last_closed = None;
        self.loss = Some(LossState {
            id: self.event_id,
            kind,
            cause,
            seq,
            end,
            time: ts,
            end_time: ts,
        });

        info!(
            "[#{}] {} {} event {} opened ({}) seq={} end={} dup_acks={} gap={:.6}s",
            ctx.aggregate, self.direction, kind, self.event_id, cause, seq, end, dup_acks, gap
        );
        self.event_id
    }

    fn close_loss(&mut self, ctx: &mut Ctx<'_>) {
        let Some(ev) = self.loss.take() else {
            return;
        };
        self.max_live_seq = self.max_live_seq.max(self.max_loss_seq).min(self.max_seq);
        self.emit(&ev, None, ctx);
        self.last_closed = Some(ev);
    }

    /// An ACK covering an event's bytes sooner than one minimal bounce after the
    /// retransmission was triggered by the original transmission.
    fn check_false_loss(&mut self, ack: u64, ts: Timestamp, ctx: &mut Ctx<'_>) {
        let Some(bounce) = self.stats.min_ack_bounce else {
            return;
        };
        let spurious = |ev: &LossState| ts.since(ev.time) < bounce;

        if let Some(ev) = self.loss {
            if ack >= ev.end && ev.kind != LossKind::FalseLoss && spurious(&ev) {
                self.downgrade(ev.kind);
                if let Some(open) = self.loss.as_mut() {
                    open.kind = LossKind::FalseLoss;
                }
                info!(
                    "[#{}] {} event {} is a false loss, ack {} after {:?}",
                    ctx.aggregate,
                    self.direction,
                    ev.id,
                    ack,
                    ts.since(ev.time)
                );
            }
            return;
        }

        let Some(ev) = self.last_closed else {
            return;
        };
        if ack < ev.end {
            return;
        }
        self.last_closed = None;
        if ev.kind == LossKind::FalseLoss || !spurious(&ev) {
            return;
        }
        self.downgrade(ev.kind);
        self.event_id += 1;
        let correction = LossState {
            id: self.event_id,
            kind: LossKind::FalseLoss,
            ..ev
        };
        info!(
            "[#{}] {} event {} is a false loss, correction {}",
            ctx.aggregate, self.direction, ev.id, correction.id
        );
        self.emit(&correction, Some(ev.id), ctx);
    }

    fn downgrade(&mut self, kind: LossKind) {
        match kind {
            LossKind::Loss => self.stats.loss_events = self.stats.loss_events.saturating_sub(1),
            LossKind::PossibleLoss => {
                self.stats.possible_loss_events = self.stats.possible_loss_events.saturating_sub(1)
            }
            LossKind::FalseLoss => return,
        }
        self.stats.false_loss_events += 1;
    }

    fn emit(&self, ev: &LossState, corrects: Option<u32>, ctx: &mut Ctx<'_>) {
        let event = LossEvent {
            aggregate: ctx.aggregate,
            direction: self.direction,
            kind: ev.kind,
            cause: ev.cause,
            start_seq: self.report_seq(ev.seq, ctx),
            end_seq: self.report_seq(ev.end, ctx),
            start_time: self.report_time(ev.time, ctx),
            end_time: self.report_time(ev.end_time, ctx),
            event_id: ev.id,
            corrects,
        };
        debug!("emit {}", event);
        ctx.sink.loss_event(&event);
    }

    fn remember(&mut self, pkt: Pkt, ctx: &mut Ctx<'_>) {
        let (handle, over_cap) = self.packets.push_back(ctx.pool, pkt);
        if over_cap {
            let err = Error::PoolExhaustion {
                capacity: ctx.pool.soft_cap(),
            };
            warn!("[#{}] {}", ctx.aggregate, err);
            ctx.sink.anomaly(ctx.aggregate, &err);
        }
        if !pkt.flags.contains(PktFlags::DUPLICATE) {
            self.by_start.insert(pkt.seq, handle);
            self.by_end.insert(pkt.end, handle);
        }

        while self.packets.len() > ctx.config.retention {
            let Some((old, gone)) = self.packets.pop_front(ctx.pool) else {
                break;
            };
            if self.by_start.get(&gone.seq) == Some(&old) {
                self.by_start.remove(&gone.seq);
            }
            if self.by_end.get(&gone.end) == Some(&old) {
                self.by_end.remove(&gone.end);
            }
        }
    }

    fn trace_send(&self, seq: u64, end: u64, flags: PktFlags, ts: Timestamp, ctx: &mut Ctx<'_>) {
        if !ctx.config.trace_sends {
            return;
        }
        let trace = SendTrace {
            aggregate: ctx.aggregate,
            direction: self.direction,
            timestamp: self.report_time(ts, ctx),
            start_seq: self.report_seq(seq, ctx),
            end_seq: self.report_seq(end, ctx),
            flags,
        };
        ctx.sink.send_trace(&trace);
    }

    fn report_seq(&self, rel: u64, ctx: &Ctx<'_>) -> u64 {
        if ctx.config.absolute_seq {
            u64::from(self.space.absolute(rel))
        } else {
            rel
        }
    }

    fn report_time(&self, ts: Timestamp, ctx: &Ctx<'_>) -> Timestamp {
        if ctx.config.absolute_time {
            ts
        } else {
            ts.relative_to(ctx.origin)
        }
    }

    /// Minimum observed time between a segment and the ACK that first covered it.
    pub fn min_ack_bounce(&self) -> Option<Duration> {
        self.stats.min_ack_bounce
    }
}
