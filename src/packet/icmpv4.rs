use std::net::Ipv4Addr;

use pnet_packet::icmp::echo_request::{EchoRequestPacket, MutableEchoRequestPacket};
use pnet_packet::icmp::{self, IcmpCode, IcmpType, IcmpTypes};
use pnet_packet::{ipv4, Packet};

use super::EchoMessage;
use crate::error::{Error, MalformedPacketError, Result};

pub fn make_echo_packet(message: &EchoMessage) -> Result<Vec<u8>> {
    let mut buf = vec![0; EchoRequestPacket::minimum_packet_size() + message.payload.len()];
    let mut packet = MutableEchoRequestPacket::new(&mut buf).ok_or(Error::IncorrectBufferSize)?;

    packet.set_icmp_type(IcmpType::new(message.icmp_type));
    packet.set_icmp_code(IcmpCode::new(message.code));
    packet.set_identifier(message.identifier);
    packet.set_sequence_number(message.sequence);
    packet.set_payload(&message.payload);

    let icmp_packet = icmp::IcmpPacket::new(packet.packet()).ok_or(Error::IncorrectBufferSize)?;
    let checksum = icmp::checksum(&icmp_packet);
    packet.set_checksum(checksum);

    Ok(buf)
}

#[derive(Debug)]
pub struct Icmpv4Packet {
    pub source: Ipv4Addr,
    pub icmp_type: IcmpType,
    pub icmp_code: IcmpCode,
    /// For ICMP errors these come from the quoted echo request.
    pub identifier: Option<u16>,
    pub sequence: Option<u16>,
}

impl Icmpv4Packet {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let ipv4_packet = ipv4::Ipv4Packet::new(buf)
            .ok_or_else(|| Error::from(MalformedPacketError::NotIpv4Packet))?;
        let payload = ipv4_packet.payload();
        let icmp_packet = icmp::IcmpPacket::new(payload)
            .ok_or_else(|| Error::from(MalformedPacketError::NotIcmpv4Packet))?;

        let icmp_type = icmp_packet.get_icmp_type();
        let (identifier, sequence) = match icmp_type {
            IcmpTypes::EchoReply | IcmpTypes::EchoRequest => {
                // Requests and replies share the same layout.
                let echo = EchoRequestPacket::new(payload).ok_or_else(|| {
                    Error::from(MalformedPacketError::PayloadTooShort {
                        got: payload.len(),
                        want: EchoRequestPacket::minimum_packet_size(),
                    })
                })?;
                (Some(echo.get_identifier()), Some(echo.get_sequence_number()))
            }
            _ => quoted_echo(icmp_packet.payload()).unwrap_or((None, None)),
        };

        Ok(Self {
            source: ipv4_packet.get_source(),
            icmp_type,
            icmp_code: icmp_packet.get_icmp_code(),
            identifier,
            sequence,
        })
    }
}

/// Error messages quote the offending IP header plus the first 8 bytes of its
/// payload after 4 unused bytes. For a quoted echo request that is enough to
/// recover the identifier and sequence.
fn quoted_echo(icmp_payload: &[u8]) -> Option<(Option<u16>, Option<u16>)> {
    let quoted = icmp_payload.get(4..)?;
    let inner = ipv4::Ipv4Packet::new(quoted)?;
    let offset = usize::from(inner.get_header_length()) * 4;
    let echo = quoted.get(offset + 4..offset + 8);
    let identifier = echo.map(|b| u16::from_be_bytes([b[0], b[1]]));
    let sequence = echo.map(|b| u16::from_be_bytes([b[2], b[3]]));
    Some((identifier, sequence))
}
