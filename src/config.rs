use crate::error::{Error, Result};
use std::time::Duration;

/// Analyzer options.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Report wire timestamps instead of times relative to the flow's first packet.
    pub absolute_time: bool,
    /// Report wire sequence numbers instead of zero-based ones.
    pub absolute_seq: bool,
    /// Also require equal non-zero IP identification values before calling a copy a duplicate.
    pub ip_id: bool,
    /// Emit an ack trace for every acknowledgement.
    pub ack_match: bool,
    /// Emit a send trace for every data segment.
    pub trace_sends: bool,
    /// Packet records kept per direction for interval lookups.
    pub retention: usize,
    /// Soft cap on the shared packet record pool.
    pub pool_capacity: usize,
    /// Tolerance band around the 2x ratio of the timer doubling heuristic.
    pub timeout_tolerance: f64,
    /// ACKs of one value needed to call a retransmission fast-retransmit driven.
    pub dup_ack_threshold: u32,
    /// Original bytes that must remain above a timeout retransmission for it to count
    /// as a possible loss rather than a loss.
    pub possible_loss_margin: u64,
    /// Create flow state for segments of unannounced aggregates.
    pub create_on_segment: bool,
    /// Idle time after which the aggregator retires a flow.
    pub flow_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            absolute_time: false,
            absolute_seq: false,
            ip_id: true,
            ack_match: false,
            trace_sends: false,
            retention: 1024,
            pool_capacity: 65_536,
            timeout_tolerance: 0.1,
            dup_ack_threshold: 3,
            possible_loss_margin: 0,
            create_on_segment: true,
            flow_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.retention == 0 {
            return Err(Error::InvalidConfig("retention must be at least one record"));
        }
        if self.dup_ack_threshold == 0 {
            return Err(Error::InvalidConfig("dup-ack threshold must be positive"));
        }
        if !(self.timeout_tolerance > 0.0 && self.timeout_tolerance < 1.0) {
            return Err(Error::InvalidConfig("timeout tolerance must lie in (0, 1)"));
        }
        Ok(())
    }
}
