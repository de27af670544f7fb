use std::net::IpAddr;

use crate::config::AddressFamily;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("buffer size was too small")]
    IncorrectBufferSize,
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] MalformedPacketError),
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("listen err, cannot open raw {family} socket: {source}")]
    SocketOpen {
        family: AddressFamily,
        #[source]
        source: std::io::Error,
    },
    #[error("WriteTo err for icmp_seq {seq}: {source}")]
    Transmit {
        seq: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("ReadFrom err: {0}")]
    Receive(#[source] std::io::Error),
    #[error("invalid target address {0:?}, expected a numeric IP address")]
    InvalidAddress(String),
    #[error("interval {0:?} must be non-zero and at most half of the longest duration")]
    InvalidInterval(std::time::Duration),
    #[error("receive timeout {0:?} must be non-zero")]
    InvalidTimeout(std::time::Duration),
    #[error("only one of -4 or -6 may be given")]
    ConflictingFamilies,
    #[error("target {target} is not an {family} address")]
    FamilyMismatch { target: IpAddr, family: AddressFamily },
    #[error("receive timestamp precedes send timestamp")]
    ClockWentBackwards,
    #[error("{count} consecutive round trips failed, last error: {last}")]
    TooManyFailures { count: u32, last: Box<Error> },
}

#[derive(thiserror::Error, Debug)]
pub enum MalformedPacketError {
    #[error("expected an Ipv4Packet")]
    NotIpv4Packet,
    #[error("expected an Icmpv4Packet payload")]
    NotIcmpv4Packet,
    #[error("expected an Icmpv6Packet")]
    NotIcmpv6Packet,
    #[error("payload too short, got {got}, want {want}")]
    PayloadTooShort { got: usize, want: usize },
}

impl Error {
    /// Errors that stay fatal even when the session tolerates round-trip failures.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Transmit { .. } | Error::Receive(_) | Error::MalformedPacket(_)
        )
    }
}
