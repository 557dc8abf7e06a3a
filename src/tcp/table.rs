//! Aggregate id → flow state, driven by the aggregator's notifications
use crate::config::Config;
use crate::error::{Error, Result};
use crate::sink::EventSink;
use crate::tcp::conn::{ConnInfo, Env};
use crate::tcp::pool::PacketPool;
use crate::tcp::segment::{Direction, FlowId, Segment};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// The narrow interface an upstream flow aggregator reports through.
pub trait AggregateListener {
    /// A new aggregate starts with `first`.
    fn on_flow_new(&mut self, aggregate: u64, flow: Option<FlowId>, first: &Segment);

    /// The aggregate is gone; every segment of it has been delivered.
    fn on_flow_delete(&mut self, aggregate: u64);
}

/// All live flows, the packet record pool they share, and the sink they report to.
pub struct FlowTable {
    config: Config,
    pool: PacketPool,
    sink: Box<dyn EventSink>,
    flows: HashMap<u64, ConnInfo>,
}

impl FlowTable {
    pub fn new(config: Config, sink: Box<dyn EventSink>) -> Self {
        let pool = PacketPool::new(config.pool_capacity);
        Self {
            config,
            pool,
            sink,
            flows: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn contains(&self, aggregate: u64) -> bool {
        self.flows.contains_key(&aggregate)
    }

    pub fn conn(&self, aggregate: u64) -> Option<&ConnInfo> {
        self.flows.get(&aggregate)
    }

    /// Hand one segment to its flow.
    ///
    /// A segment for an aggregate nobody announced creates the flow when
    /// `create_on_segment` is set, and is refused with [`Error::UnknownFlow`] otherwise.
    pub fn on_segment(&mut self, aggregate: u64, direction: Direction, seg: &Segment) -> Result<()> {
        if !self.flows.contains_key(&aggregate) {
            if !self.config.create_on_segment {
                return Err(Error::UnknownFlow(aggregate));
            }
            debug!("[#{}] implicitly created by first segment", aggregate);
            self.flows
                .insert(aggregate, ConnInfo::new(aggregate, None, seg));
        }
        let Some(conn) = self.flows.get_mut(&aggregate) else {
            return Err(Error::UnknownFlow(aggregate));
        };
        let mut env = Env {
            config: &self.config,
            pool: &mut self.pool,
            sink: self.sink.as_mut(),
        };
        conn.handle_segment(direction, seg, &mut env);
        Ok(())
    }

    /// Tear down every flow, in aggregate order.
    pub fn shutdown(&mut self) {
        let mut ids: Vec<u64> = self.flows.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.on_flow_delete(id);
        }
    }
}

impl AggregateListener for FlowTable {
    fn on_flow_new(&mut self, aggregate: u64, flow: Option<FlowId>, first: &Segment) {
        if self.flows.contains_key(&aggregate) {
            let err = Error::DuplicateFlowCreation(aggregate);
            warn!("[#{}] {}", aggregate, err);
            self.sink.anomaly(aggregate, &err);
            return;
        }
        match flow {
            Some(flow) => info!("[#{}] new flow {}", aggregate, flow),
            None => info!("[#{}] new flow", aggregate),
        }
        self.flows
            .insert(aggregate, ConnInfo::new(aggregate, flow, first));
    }

    fn on_flow_delete(&mut self, aggregate: u64) {
        let Some(mut conn) = self.flows.remove(&aggregate) else {
            debug!("[#{}] delete of unknown flow ignored", aggregate);
            return;
        };
        let mut env = Env {
            config: &self.config,
            pool: &mut self.pool,
            sink: self.sink.as_mut(),
        };
        let summary = conn.kill(&mut env);
        info!(
            "[#{}] flow deleted: packets={} bytes={} loss={} ploss={} floss={}",
            aggregate,
            summary.total_packets(),
            summary.total_bytes(),
            summary.loss_events(),
            summary.possible_loss_events(),
            summary.false_loss_events()
        );
        self.sink.flow_summary(&summary);
    }
}

impl Drop for FlowTable {
    fn drop(&mut self) {
        self.shutdown();
    }
}
