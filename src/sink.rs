//! Where the analyzer's findings go
use crate::clock::Timestamp;
use crate::error::Error;
use crate::tcp::{Direction, FlowId, PktFlags};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossKind {
    Loss,
    PossibleLoss,
    FalseLoss,
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossKind::Loss => write!(f, "loss"),
            LossKind::PossibleLoss => write!(f, "ploss"),
            LossKind::FalseLoss => write!(f, "floss"),
        }
    }
}

/// What made the sender retransmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossCause {
    /// Fast retransmit after repeated ACKs of the same value
    TripleDupAck,
    /// Retransmit timer; `backoff` is how many times the timer had doubled
    Timeout { backoff: u32 },
}

impl fmt::Display for LossCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossCause::TripleDupAck => write!(f, "triple-dup"),
            LossCause::Timeout { backoff } => write!(f, "timeout/{}", backoff),
        }
    }
}

/// A finalized loss event, or a correction of one.
///
/// Sequence numbers and times are already in the reporting frame picked by the
/// configuration (relative or absolute).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossEvent {
    pub aggregate: u64,
    pub direction: Direction,
    pub kind: LossKind,
    pub cause: LossCause,
    pub start_seq: u64,
    pub end_seq: u64,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub event_id: u32,
    /// For a correction, the id of the event it invalidates
    pub corrects: Option<u32>,
}

impl fmt::Display for LossEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} {} {} {} {} id={} {}",
            self.aggregate,
            self.kind,
            self.direction,
            self.start_time,
            self.start_seq,
            self.end_time,
            self.end_seq,
            self.event_id,
            self.cause
        )?;
        if let Some(original) = self.corrects {
            write!(f, " corrects={}", original)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendTrace {
    pub aggregate: u64,
    pub direction: Direction,
    pub timestamp: Timestamp,
    pub start_seq: u64,
    pub end_seq: u64,
    pub flags: PktFlags,
}

/// An acknowledgement, reported against the direction whose data it acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckTrace {
    pub aggregate: u64,
    pub direction: Direction,
    pub timestamp: Timestamp,
    pub ack_seq: u64,
    pub is_duplicate: bool,
}

/// Counters of one direction.
///
/// `total_bytes` sums the payload of every segment counted in `total_packets`, with
/// duplicates, keepalives and segments before the origin included. Malformed segments
/// add nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub max_seq: u64,
    pub max_ack: u64,
    pub rexmits: u64,
    pub bytes_lost: u64,
    pub loss_events: u32,
    pub possible_loss_events: u32,
    pub false_loss_events: u32,
    pub reorderings: u32,
    pub malformed: u32,
    pub min_ack_bounce: Option<Duration>,
}

/// Emitted once when a flow is torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSummary {
    pub aggregate: u64,
    pub flow: Option<FlowId>,
    pub first_seen: Timestamp,
    pub streams: [StreamStats; 2],
}

impl FlowSummary {
    pub fn total_packets(&self) -> u64 {
        self.streams.iter().map(|s| s.total_packets).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.streams.iter().map(|s| s.total_bytes).sum()
    }

    pub fn loss_events(&self) -> u32 {
        self.streams.iter().map(|s| s.loss_events).sum()
    }

    pub fn possible_loss_events(&self) -> u32 {
        self.streams.iter().map(|s| s.possible_loss_events).sum()
    }

    pub fn false_loss_events(&self) -> u32 {
        self.streams.iter().map(|s| s.false_loss_events).sum()
    }
}

/// Receives everything the analyzer reports.
///
/// Only loss events and flow summaries are mandatory; traces are sent only when enabled
/// in the configuration and anomalies default to being ignored.
pub trait EventSink: Send {
    fn loss_event(&mut self, event: &LossEvent);

    fn flow_summary(&mut self, summary: &FlowSummary);

    fn send_trace(&mut self, _trace: &SendTrace) {}

    fn ack_trace(&mut self, _trace: &AckTrace) {}

    fn anomaly(&mut self, _aggregate: u64, _error: &Error) {}
}

/// Writes every report to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn loss_event(&mut self, event: &LossEvent) {
        info!("{}", event);
    }

    fn flow_summary(&mut self, summary: &FlowSummary) {
        let flow = summary
            .flow
            .map(|f| f.to_string())
            .unwrap_or_else(|| "?".to_string());
        for (dir, s) in [Direction::Forward, Direction::Reverse]
            .iter()
            .zip(summary.streams.iter())
        {
            info!(
                "#{} {} {} packets={} bytes={} rexmits={} lost={} loss={} ploss={} floss={} reorder={}",
                summary.aggregate,
                flow,
                dir,
                s.total_packets,
                s.total_bytes,
                s.rexmits,
                s.bytes_lost,
                s.loss_events,
                s.possible_loss_events,
                s.false_loss_events,
                s.reorderings
            );
        }
    }

    fn send_trace(&mut self, t: &SendTrace) {
        info!(
            "#{} {} {} SEND {} {} {:?}",
            t.aggregate, t.direction, t.timestamp, t.start_seq, t.end_seq, t.flags
        );
    }

    fn ack_trace(&mut self, t: &AckTrace) {
        info!(
            "#{} {} {} {} {}",
            t.aggregate,
            t.direction,
            t.timestamp,
            if t.is_duplicate { "DACK" } else { "ACK" },
            t.ack_seq
        );
    }

    fn anomaly(&mut self, aggregate: u64, error: &Error) {
        warn!("#{} {}", aggregate, error);
    }
}

/// Everything a [`RecordingSink`] has seen.
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub events: Vec<LossEvent>,
    pub summaries: Vec<FlowSummary>,
    pub sends: Vec<SendTrace>,
    pub acks: Vec<AckTrace>,
    pub anomalies: Vec<(u64, Error)>,
}

/// Keeps reports in memory; clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Recorded {
        self.lock().clone()
    }

    pub fn events(&self) -> Vec<LossEvent> {
        self.lock().events.clone()
    }

    pub fn summaries(&self) -> Vec<FlowSummary> {
        self.lock().summaries.clone()
    }

    pub fn anomalies(&self) -> Vec<(u64, Error)> {
        self.lock().anomalies.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for RecordingSink {
    fn loss_event(&mut self, event: &LossEvent) {
        self.lock().events.push(*event);
    }

    fn flow_summary(&mut self, summary: &FlowSummary) {
        self.lock().summaries.push(summary.clone());
    }

    fn send_trace(&mut self, trace: &SendTrace) {
        self.lock().sends.push(*trace);
    }

    fn ack_trace(&mut self, trace: &AckTrace) {
        self.lock().acks.push(*trace);
    }

    fn anomaly(&mut self, aggregate: u64, error: &Error) {
        self.lock().anomalies.push((aggregate, error.clone()));
    }
}
