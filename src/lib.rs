pub mod aggregate;
pub mod capture;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod sink;
pub mod tcp;


pub use aggregate::Aggregator;
pub use capture::{Capture, CaptureStats};
pub use clock::{Clock, SystemClock, Timestamp};
pub use config::Config;
pub use device::{Device, Tun};
pub use error::{Error, Result};
pub use sink::{EventSink, FlowSummary, LogSink, LossCause, LossEvent, LossKind, RecordingSink};
pub use tcp::{AggregateListener, Direction, FlowId, FlowTable, Segment};
