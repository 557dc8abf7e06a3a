use std::fmt;

/// Anomalies detected while analyzing flows.
///
/// Only a few operations return these as `Err`: parsing a captured frame, validating a
/// [`Config`](crate::Config) and routing a segment for an unknown aggregate when implicit
/// creation is off. Everything else is counted and handed to the
/// [`EventSink`](crate::EventSink) so that the harness decides what to do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A segment named an aggregate that has no flow state.
    UnknownFlow(u64),

    /// The aggregator announced an aggregate id that is already live.
    ///
    /// The existing flow state is kept untouched.
    DuplicateFlowCreation(u64),

    /// A segment below the send high-water mark matched no retained packet record.
    ///
    /// Either the original transmission fell out of the retention window or the network
    /// reordered packets. The segment is still counted but takes no part in loss timing.
    UnresolvedReordering { seq: u64, end: u64 },

    /// A segment whose lengths or flags contradict each other and was dropped.
    MalformedSegment(&'static str),

    /// The packet record pool grew past its soft cap.
    PoolExhaustion { capacity: usize },

    /// A configuration value is out of range.
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownFlow(id) => write!(f, "unknown flow {}", id),
            Error::DuplicateFlowCreation(id) => write!(f, "flow {} already exists", id),
            Error::UnresolvedReordering { seq, end } => {
                write!(f, "no sent record covers [{}, {}), possible reordering", seq, end)
            }
            Error::MalformedSegment(why) => write!(f, "malformed segment: {}", why),
            Error::PoolExhaustion { capacity } => {
                write!(f, "packet pool grew past soft cap of {} records", capacity)
            }
            Error::InvalidConfig(why) => write!(f, "invalid configuration: {}", why),
        }
    }
}

impl std::error::Error for Error {}
