//! Groups segments into bidirectional flows and numbers them.
//!
//! The analyzer itself only sees aggregate ids and directions; this is the upstream stage
//! that turns 4-tuples into both, and tells an [`AggregateListener`] when a flow begins
//! and when it is gone.
use crate::clock::Timestamp;
use crate::tcp::{AggregateListener, Direction, FlowId, Segment};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Entry {
    aggregate: u64,
    last_seen: Timestamp,
}

#[derive(Debug)]
pub struct Aggregator {
    /// Keyed by the 4-tuple of the flow's first segment
    flows: HashMap<FlowId, Entry>,
    next_id: u64,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(timeout: Duration) -> Self {
        Aggregator {
            flows: HashMap::new(),
            next_id: 1,
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Aggregate id and direction for a segment of `flow`.
    ///
    /// The first segment of an unseen 4-tuple opens a new aggregate, and its sender
    /// becomes the forward direction.
    pub fn assign(
        &mut self,
        flow: FlowId,
        seg: &Segment,
        listener: &mut dyn AggregateListener,
    ) -> (u64, Direction) {
        for (key, direction) in [(flow, Direction::Forward), (flow.reverse(), Direction::Reverse)] {
            if let Some(entry) = self.flows.get_mut(&key) {
                entry.last_seen = entry.last_seen.max(seg.timestamp);
                return (entry.aggregate, direction);
            }
        }

        let aggregate = self.next_id;
        self.next_id += 1;
        self.flows.insert(
            flow,
            Entry {
                aggregate,
                last_seen: seg.timestamp,
            },
        );
        listener.on_flow_new(aggregate, Some(flow), seg);
        (aggregate, Direction::Forward)
    }

    /// Forget `flow` (in either orientation) and report the deletion.
    pub fn retire(&mut self, flow: FlowId, listener: &mut dyn AggregateListener) -> Option<u64> {
        let entry = self
            .flows
            .remove(&flow)
            .or_else(|| self.flows.remove(&flow.reverse()))?;
        debug!("[#{}] retired", entry.aggregate);
        listener.on_flow_delete(entry.aggregate);
        Some(entry.aggregate)
    }

    /// Retire every flow idle for longer than the timeout at `now`.
    pub fn expire(&mut self, now: Timestamp, listener: &mut dyn AggregateListener) -> usize {
        let timeout = self.timeout;
        let mut idle: Vec<(u64, FlowId)> = self
            .flows
            .iter()
            .filter(|(_, e)| now.since(e.last_seen) > timeout)
            .map(|(flow, e)| (e.aggregate, *flow))
            .collect();
        idle.sort_unstable_by_key(|(aggregate, _)| *aggregate);
        for (aggregate, flow) in &idle {
            debug!("[#{}] idle for more than {:?}", aggregate, timeout);
            self.flows.remove(flow);
            listener.on_flow_delete(*aggregate);
        }
        idle.len()
    }

    /// Retire everything, oldest aggregate first.
    pub fn flush(&mut self, listener: &mut dyn AggregateListener) {
        let mut all: Vec<u64> = self.flows.drain().map(|(_, e)| e.aggregate).collect();
        all.sort_unstable();
        for aggregate in all {
            listener.on_flow_delete(aggregate);
        }
    }
}
