//! TCP header flags the analyzer looks at, as defined in RFC 793.
use etherparse::TcpHeaderSlice;

/// FIN flag - no more data from sender
pub const FIN: u8 = 1 << 0;
/// SYN flag - synchronize sequence numbers
pub const SYN: u8 = 1 << 1;
/// RST flag - reset the connection
pub const RST: u8 = 1 << 2;
/// PSH flag - push function
pub const PSH: u8 = 1 << 3;
/// ACK flag - acknowledgment field is significant
pub const ACK: u8 = 1 << 4;
/// URG flag - urgent pointer field is significant
pub const URG: u8 = 1 << 5;

const LETTERS: [(u8, char); 6] = [
    (SYN, 'S'),
    (ACK, 'A'),
    (FIN, 'F'),
    (RST, 'R'),
    (PSH, 'P'),
    (URG, 'U'),
];

/// One letter per flag, `-` where it is clear: `SA----` for a SYN-ACK.
pub fn flags_to_string(flags: u8) -> String {
    LETTERS
        .iter()
        .map(|&(bit, letter)| if flags & bit != 0 { letter } else { '-' })
        .collect()
}

/// Pack the flags of a parsed header into the analyzer's flags byte.
pub fn tcp_header_to_flags(tcp_hdr: &TcpHeaderSlice) -> u8 {
    [
        (tcp_hdr.fin(), FIN),
        (tcp_hdr.syn(), SYN),
        (tcp_hdr.rst(), RST),
        (tcp_hdr.psh(), PSH),
        (tcp_hdr.ack(), ACK),
        (tcp_hdr.urg(), URG),
    ]
    .iter()
    .filter(|(set, _)| *set)
    .fold(0, |acc, (_, bit)| acc | bit)
}
