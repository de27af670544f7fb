use std::net::IpAddr;

use crate::config::AddressFamily;
use crate::error::Result;

pub mod icmpv4;
pub mod icmpv6;

/// An ICMP echo message as it goes on the wire, before the family-specific
/// framing is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoMessage {
    pub icmp_type: u8,
    pub code: u8,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl EchoMessage {
    pub fn request(family: AddressFamily, identifier: u16, sequence: u16, payload: &[u8]) -> Self {
        Self {
            icmp_type: family.request_type(),
            code: 0,
            identifier,
            sequence,
            payload: payload.to_vec(),
        }
    }

    pub fn encode(&self, family: AddressFamily) -> Result<Vec<u8>> {
        match family {
            AddressFamily::V4 => icmpv4::make_echo_packet(self),
            AddressFamily::V6 => icmpv6::make_echo_packet(self),
        }
    }
}

/// Identifier as the ping tools derive it: the process id truncated to 16 bits.
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

#[derive(Debug)]
pub enum IcmpPacket {
    V4(icmpv4::Icmpv4Packet),
    V6(icmpv6::Icmpv6Packet),
}

impl IcmpPacket {
    /// Parses a datagram read from a raw socket of the given family. IPv4 raw
    /// sockets hand over the IP header, IPv6 ones start at the ICMPv6 header.
    pub fn decode(family: AddressFamily, buf: &[u8], src: Option<IpAddr>) -> Result<Self> {
        match family {
            AddressFamily::V4 => icmpv4::Icmpv4Packet::decode(buf).map(IcmpPacket::V4),
            AddressFamily::V6 => icmpv6::Icmpv6Packet::decode(buf, src).map(IcmpPacket::V6),
        }
    }

    pub fn icmp_type(&self) -> u8 {
        match self {
            IcmpPacket::V4(packet) => packet.icmp_type.0,
            IcmpPacket::V6(packet) => packet.icmp_type.0,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            IcmpPacket::V4(packet) => packet.icmp_code.0,
            IcmpPacket::V6(packet) => packet.icmp_code.0,
        }
    }

    pub fn source(&self) -> Option<IpAddr> {
        match self {
            IcmpPacket::V4(packet) => Some(IpAddr::V4(packet.source)),
            IcmpPacket::V6(packet) => packet.source.map(IpAddr::V6),
        }
    }

    pub fn identifier(&self) -> Option<u16> {
        match self {
            IcmpPacket::V4(packet) => packet.identifier,
            IcmpPacket::V6(packet) => packet.identifier,
        }
    }

    pub fn sequence(&self) -> Option<u16> {
        match self {
            IcmpPacket::V4(packet) => packet.sequence,
            IcmpPacket::V6(packet) => packet.sequence,
        }
    }

    pub fn check(&self, destination: IpAddr, sequence: u16, identifier: u16) -> bool {
        self.source() == Some(destination)
            && self.sequence() == Some(sequence)
            && self.identifier() == Some(identifier)
    }
}
