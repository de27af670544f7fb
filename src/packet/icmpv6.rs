use std::net::{IpAddr, Ipv6Addr};

use pnet_packet::icmpv6::{self, Icmpv6Code, Icmpv6Type, Icmpv6Types};
use pnet_packet::{ipv6, Packet};

use super::EchoMessage;
use crate::error::{Error, MalformedPacketError, Result};

const ECHO_HEADER_LEN: usize = 4;

pub fn make_echo_packet(message: &EchoMessage) -> Result<Vec<u8>> {
    let mut buf = vec![0; 4 + ECHO_HEADER_LEN + message.payload.len()];
    let mut packet =
        icmpv6::MutableIcmpv6Packet::new(&mut buf).ok_or(Error::IncorrectBufferSize)?;

    packet.set_icmpv6_type(Icmpv6Type::new(message.icmp_type));
    packet.set_icmpv6_code(Icmpv6Code::new(message.code));
    let mut payload_buf = Vec::with_capacity(ECHO_HEADER_LEN + message.payload.len());
    payload_buf.extend_from_slice(&message.identifier.to_be_bytes());
    payload_buf.extend_from_slice(&message.sequence.to_be_bytes());
    payload_buf.extend_from_slice(&message.payload);
    packet.set_payload(&payload_buf);

    // The kernel fills in the ICMPv6 checksum on raw sockets, it needs the
    // pseudo header we never see.
    Ok(buf)
}

#[derive(Debug)]
pub struct Icmpv6Packet {
    /// Taken from the socket address, raw ICMPv6 sockets strip the IP header.
    pub source: Option<Ipv6Addr>,
    pub icmp_type: Icmpv6Type,
    pub icmp_code: Icmpv6Code,
    pub identifier: Option<u16>,
    pub sequence: Option<u16>,
}

impl Icmpv6Packet {
    pub fn decode(buf: &[u8], src: Option<IpAddr>) -> Result<Self> {
        let icmpv6_packet = icmpv6::Icmpv6Packet::new(buf)
            .ok_or_else(|| Error::from(MalformedPacketError::NotIcmpv6Packet))?;

        let source = match src {
            Some(IpAddr::V6(ip)) => Some(ip),
            _ => None,
        };

        let icmp_type = icmpv6_packet.get_icmpv6_type();
        let payload = icmpv6_packet.payload();
        let (identifier, sequence) = match icmp_type {
            Icmpv6Types::EchoReply | Icmpv6Types::EchoRequest => {
                let (identifier, sequence) = echo_fields(payload).ok_or_else(|| {
                    Error::from(MalformedPacketError::PayloadTooShort {
                        got: payload.len(),
                        want: ECHO_HEADER_LEN,
                    })
                })?;
                (Some(identifier), Some(sequence))
            }
            Icmpv6Types::DestinationUnreachable
            | Icmpv6Types::PacketTooBig
            | Icmpv6Types::TimeExceeded
            | Icmpv6Types::ParameterProblem => quoted_echo(payload),
            _ => (None, None),
        };

        Ok(Self {
            source,
            icmp_type,
            icmp_code: icmpv6_packet.get_icmpv6_code(),
            identifier,
            sequence,
        })
    }
}

fn echo_fields(payload: &[u8]) -> Option<(u16, u16)> {
    let b = payload.get(..ECHO_HEADER_LEN)?;
    Some((
        u16::from_be_bytes([b[0], b[1]]),
        u16::from_be_bytes([b[2], b[3]]),
    ))
}

/// ICMPv6 errors carry 4 type-specific bytes followed by as much of the
/// offending packet as fits.
fn quoted_echo(payload: &[u8]) -> (Option<u16>, Option<u16>) {
    let fields = payload
        .get(4..)
        .and_then(ipv6::Ipv6Packet::new)
        .and_then(|quoted| {
            quoted
                .packet()
                .get(ipv6::Ipv6Packet::minimum_packet_size() + 4..)
                .and_then(echo_fields)
        });
    (
        fields.map(|(identifier, _)| identifier),
        fields.map(|(_, sequence)| sequence),
    )
}
