//! Segment metadata handed to the analyzer and the flow 4-tuple
use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::tcp::flags;
use etherparse::{IpNumber, Ipv4HeaderSlice, TcpHeaderSlice};
use std::fmt;
use std::net::Ipv4Addr;

/// The 4-tuple of one direction of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} → {}:{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

impl FlowId {
    pub fn new(ip: &Ipv4HeaderSlice, tcp: &TcpHeaderSlice) -> Self {
        FlowId {
            src_ip: ip.source_addr(),
            src_port: tcp.source_port(),
            dst_ip: ip.destination_addr(),
            dst_port: tcp.destination_port(),
        }
    }

    pub fn reverse(&self) -> Self {
        FlowId {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }
}

/// Which endpoint of a flow sent a segment (the aggregator's "paint").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// Paint 0 is forward, paint 1 reverse; higher bits are ignored.
    pub fn from_paint(paint: u8) -> Self {
        if paint & 1 == 0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, ">"),
            Direction::Reverse => write!(f, "<"),
        }
    }
}

/// What the analyzer needs to know about one captured TCP segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Wire sequence number
    pub seq: u32,
    /// Wire acknowledgement number, meaningful when the ACK flag is set
    pub ack: u32,
    /// Payload bytes, excluding SYN and FIN
    pub len: u32,
    /// TCP flags, see [`flags`]
    pub flags: u8,
    pub timestamp: Timestamp,
    /// IP identification of the carrying datagram
    pub ip_id: u16,
}

impl Segment {
    pub fn new(seq: u32, ack: u32, len: u32, flags: u8, timestamp: Timestamp) -> Self {
        Segment {
            seq,
            ack,
            len,
            flags,
            timestamp,
            ip_id: 0,
        }
    }

    pub fn with_ip_id(mut self, ip_id: u16) -> Self {
        self.ip_id = ip_id;
        self
    }

    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    pub fn is_rst(&self) -> bool {
        self.flags & flags::RST != 0
    }

    pub fn has_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    /// Reject segments no TCP sender produces.
    pub fn check(&self) -> Result<()> {
        if self.is_syn() && self.is_fin() {
            return Err(Error::MalformedSegment("SYN and FIN in one segment"));
        }
        if self.len > i32::MAX as u32 {
            return Err(Error::MalformedSegment("payload spans half the sequence space"));
        }
        Ok(())
    }

    /// Parse a raw IPv4 frame.
    ///
    /// Non-TCP datagrams and fragments are not for us and yield `Ok(None)`. Flag
    /// combinations are left to [`Segment::check`] so the flow can count them.
    pub fn parse(packet: &[u8], timestamp: Timestamp) -> Result<Option<(FlowId, Segment)>> {
        let ip_hdr = Ipv4HeaderSlice::from_slice(packet)
            .map_err(|_| Error::MalformedSegment("truncated IPv4 header"))?;
        if ip_hdr.protocol() != IpNumber::TCP || ip_hdr.is_fragmenting_payload() {
            return Ok(None);
        }
        let ip_len = ip_hdr.slice().len();
        let tcp_hdr = TcpHeaderSlice::from_slice(&packet[ip_len..])
            .map_err(|_| Error::MalformedSegment("truncated TCP header"))?;

        let len = usize::from(ip_hdr.total_len())
            .checked_sub(ip_len + tcp_hdr.slice().len())
            .ok_or(Error::MalformedSegment("headers exceed the IP total length"))?;

        let segment = Segment {
            seq: tcp_hdr.sequence_number(),
            ack: tcp_hdr.acknowledgment_number(),
            len: len as u32,
            flags: flags::tcp_header_to_flags(&tcp_hdr),
            timestamp,
            ip_id: ip_hdr.identification(),
        };
        Ok(Some((FlowId::new(&ip_hdr, &tcp_hdr), segment)))
    }
}
