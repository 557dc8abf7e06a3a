mod conn;
pub mod flags;
mod pool;
mod segment;
mod seq;
mod stream;
mod table;

pub use self::conn::ConnInfo;
pub use self::pool::{Handle, PacketList, PacketPool, Pkt, PktFlags, RevIter};
pub use self::segment::{Direction, FlowId, Segment};
pub use self::seq::{is_seq_lt, is_seq_lte, SequenceSpace};
pub use self::stream::StreamInfo;
pub use self::table::{AggregateListener, FlowTable};

pub use self::flags::{flags_to_string, tcp_header_to_flags};
pub use self::flags::{ACK, FIN, PSH, RST, SYN, URG};
