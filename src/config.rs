use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use pnet_packet::icmp::IcmpTypes;
use pnet_packet::icmpv6::Icmpv6Types;
use pnet_packet::ip::IpNextHeaderProtocols;

use crate::error::{Error, Result};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_PAYLOAD: &[u8] = b"ping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Resolves the `-4`/`-6` flags. Neither flag falls back to IPv4, both is an error.
    pub fn select(ipv4: bool, ipv6: bool) -> Result<Self> {
        match (ipv4, ipv6) {
            (true, true) => Err(Error::ConflictingFamilies),
            (false, true) => Ok(AddressFamily::V6),
            (true, false) => Ok(AddressFamily::V4),
            (false, false) => {
                log::info!("no address family given, defaulting to ipv4");
                Ok(AddressFamily::V4)
            }
        }
    }

    /// IANA protocol number carried by the raw socket.
    pub fn protocol(self) -> u8 {
        match self {
            AddressFamily::V4 => IpNextHeaderProtocols::Icmp.0,
            AddressFamily::V6 => IpNextHeaderProtocols::Icmpv6.0,
        }
    }

    pub fn request_type(self) -> u8 {
        match self {
            AddressFamily::V4 => IcmpTypes::EchoRequest.0,
            AddressFamily::V6 => Icmpv6Types::EchoRequest.0,
        }
    }

    pub fn reply_type(self) -> u8 {
        match self {
            AddressFamily::V4 => IcmpTypes::EchoReply.0,
            AddressFamily::V6 => Icmpv6Types::EchoReply.0,
        }
    }

    pub fn unspecified(self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("ipv4"),
            AddressFamily::V6 => f.write_str("ipv6"),
        }
    }
}

/// How an inbound reply is matched against the probe in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matching {
    /// Any datagram of the reply type counts as the reply to the current probe,
    /// even one carrying another identifier or sequence number.
    Tolerant,
    /// Replies must come from the target and echo our identifier and sequence.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Every transmit, receive or decode failure ends the session.
    Abort,
    /// Count a failed round trip as lost and carry on, unless more than
    /// `max_consecutive` fail in a row.
    Tolerate { max_consecutive: u32 },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target: IpAddr,
    pub family: AddressFamily,
    pub interval: Duration,
    /// `None` waits for a reply forever.
    pub receive_timeout: Option<Duration>,
    pub matching: Matching,
    pub error_policy: ErrorPolicy,
    pub payload: Vec<u8>,
}

impl Config {
    /// Builds a configuration from a numeric target and the family flags.
    pub fn new(target: &str, ipv4: bool, ipv6: bool) -> Result<Self> {
        let family = AddressFamily::select(ipv4, ipv6)?;
        let target: IpAddr = target
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(target.to_owned()))?;
        if AddressFamily::of(&target) != family {
            return Err(Error::FamilyMismatch { target, family });
        }

        Ok(Self {
            target,
            family,
            interval: DEFAULT_INTERVAL,
            receive_timeout: Some(DEFAULT_INTERVAL * 2),
            matching: Matching::Tolerant,
            error_policy: ErrorPolicy::Abort,
            payload: DEFAULT_PAYLOAD.to_vec(),
        })
    }

    /// Sets the pause between probes. A deadline still tied to the old
    /// interval follows the new one. The interval must be non-zero and small
    /// enough that twice its length is still a `Duration`.
    pub fn with_interval(mut self, interval: Duration) -> Result<Self> {
        let deadline = match interval.checked_mul(2) {
            Some(deadline) if !interval.is_zero() => deadline,
            _ => return Err(Error::InvalidInterval(interval)),
        };
        if self.receive_timeout == self.interval.checked_mul(2) {
            self.receive_timeout = Some(deadline);
        }
        self.interval = interval;
        Ok(self)
    }

    /// A zero deadline would expire before any reply could be read.
    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Result<Self> {
        if let Some(timeout) = timeout.filter(|t| t.is_zero()) {
            return Err(Error::InvalidTimeout(timeout));
        }
        self.receive_timeout = timeout;
        Ok(self)
    }

    pub fn with_matching(mut self, matching: Matching) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }
}
