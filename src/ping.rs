use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::{sleep, timeout};

use crate::config::{Config, ErrorPolicy, Matching};
use crate::error::{Error, Result};
use crate::packet::{process_identifier, EchoMessage, IcmpPacket};
use crate::socket::{AsyncIcmpSocket, IcmpTransport, Socket};
use crate::stats::{round_trip_time, Counters};

const RECV_BUFFER_SIZE: usize = 2048;

#[derive(Debug)]
pub enum Outcome {
    /// A datagram of the family's reply type arrived. Under tolerant matching
    /// its identifier and sequence may belong to another probe.
    Reply {
        latency: Duration,
        identifier: Option<u16>,
        sequence: Option<u16>,
    },
    /// Some other ICMP message arrived first, e.g. destination unreachable.
    Unexpected {
        icmp_type: u8,
        code: u8,
        latency: Duration,
    },
    Timeout,
    /// Only produced under [`ErrorPolicy::Tolerate`].
    Failed(Error),
}

impl Outcome {
    pub fn latency(&self) -> Option<Duration> {
        match self {
            Outcome::Reply { latency, .. } | Outcome::Unexpected { latency, .. } => Some(*latency),
            Outcome::Timeout | Outcome::Failed(_) => None,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, Outcome::Reply { .. })
    }
}

#[derive(Debug)]
pub struct RoundTrip {
    pub sequence: u64,
    pub outcome: Outcome,
    /// Cumulative loss since the session started, in percent.
    pub packet_loss: f64,
}

/// Pings one target, one probe at a time.
///
/// Owns the socket, so dropping the session closes it. Counters are never
/// reset and the sequence starts at 1, advancing once per round trip
/// whatever its outcome. On the wire only its low 16 bits are sent.
#[derive(Debug)]
pub struct PingSession<T = AsyncIcmpSocket> {
    config: Config,
    transport: T,
    identifier: u16,
    sequence: u64,
    counters: Counters,
    consecutive_failures: u32,
}

impl PingSession<AsyncIcmpSocket> {
    /// Opens the raw socket for the configured family. Needs a tokio runtime
    /// and, on most systems, root or `CAP_NET_RAW`.
    pub fn open(config: Config) -> Result<Self> {
        let socket = Socket::open(config.family).map_err(|source| Error::SocketOpen {
            family: config.family,
            source,
        })?;
        log::debug!("opened raw {} socket", socket.family());
        let transport = AsyncIcmpSocket::new(socket)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: IcmpTransport> PingSession<T> {
    pub fn with_transport(config: Config, transport: T) -> Self {
        log::info!("Target IP: {}", config.target);
        log::info!("Type: {}", config.family);
        Self {
            config,
            transport,
            identifier: process_identifier(),
            sequence: 1,
            counters: Counters::default(),
            consecutive_failures: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// Sequence number of the next probe.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn sent(&self) -> u64 {
        self.counters.sent()
    }

    pub fn received(&self) -> u64 {
        self.counters.received()
    }

    pub fn packet_loss(&self) -> f64 {
        self.counters.packet_loss()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends one echo request and waits for whatever answers it.
    pub async fn round_trip(&mut self) -> Result<RoundTrip> {
        let sequence = self.sequence;
        let wire_seq = sequence as u16;
        let message = EchoMessage::request(
            self.config.family,
            self.identifier,
            wire_seq,
            &self.config.payload,
        );
        let packet = message.encode(self.config.family)?;

        let outcome = match self.exchange(&packet, wire_seq).await {
            Ok(outcome) => {
                self.consecutive_failures = 0;
                outcome
            }
            Err(err) => self.absorb(err)?,
        };
        if outcome.is_reply() {
            self.counters.record_received();
        }

        let packet_loss = self.counters.packet_loss();
        match outcome.latency() {
            Some(latency) => log::info!(
                "icmp_seq={} Packet Loss: {:.2} %,  Latency: {:?}",
                wire_seq,
                packet_loss,
                latency
            ),
            None => log::info!("icmp_seq={} Packet Loss: {:.2} %,  Latency: -", wire_seq, packet_loss),
        }

        self.sequence += 1;
        Ok(RoundTrip {
            sequence,
            outcome,
            packet_loss,
        })
    }

    /// Pings until `shutdown` completes or a fatal error occurs, pausing for
    /// the configured interval between probes.
    pub async fn run_until<F: Future>(&mut self, shutdown: F) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                res = self.round_trip() => {
                    res?;
                }
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(self.config.interval) => {}
            }
        }
        log::info!(
            "stopped after {} probes, {} replies, {:.2} % packet loss",
            self.sent(),
            self.received(),
            self.packet_loss()
        );
        Ok(())
    }

    /// Pings forever; only a fatal error returns.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    async fn exchange(&mut self, packet: &[u8], wire_seq: u16) -> Result<Outcome> {
        self.transport
            .send_to(packet, self.config.target)
            .await
            .map_err(|source| Error::Transmit {
                seq: wire_seq,
                source,
            })?;
        let sent_at = Instant::now();
        self.counters.record_sent();
        log::trace!("sent echo request icmp_seq={}", wire_seq);

        let (reply, received_at) = match self.config.receive_timeout {
            Some(deadline) => match timeout(deadline, self.recv_reply(wire_seq)).await {
                Ok(res) => res?,
                Err(_) => {
                    log::warn!("Request timeout for icmp_seq {}", wire_seq);
                    return Ok(Outcome::Timeout);
                }
            },
            None => self.recv_reply(wire_seq).await?,
        };
        let latency = round_trip_time(sent_at, received_at).ok_or(Error::ClockWentBackwards)?;

        if reply.icmp_type() == self.config.family.reply_type() {
            Ok(Outcome::Reply {
                latency,
                identifier: reply.identifier(),
                sequence: reply.sequence(),
            })
        } else {
            log::debug!(
                "icmp_seq={} answered by type {} code {} from {:?}",
                wire_seq,
                reply.icmp_type(),
                reply.code(),
                reply.source()
            );
            Ok(Outcome::Unexpected {
                icmp_type: reply.icmp_type(),
                code: reply.code(),
                latency,
            })
        }
    }

    async fn recv_reply(&self, wire_seq: u16) -> Result<(IcmpPacket, Instant)> {
        let family = self.config.family;
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        loop {
            let (size, src) = self
                .transport
                .recv_from(&mut buffer)
                .await
                .map_err(Error::Receive)?;
            let received_at = Instant::now();
            let packet = IcmpPacket::decode(family, &buffer[..size], src)?;

            // Pinging a local address shows our own request to the raw socket.
            if packet.icmp_type() == family.request_type()
                && packet.identifier() == Some(self.identifier)
            {
                log::trace!("skipping own echo request icmp_seq={:?}", packet.sequence());
                continue;
            }
            if self.config.matching == Matching::Strict
                && packet.icmp_type() == family.reply_type()
                && !packet.check(self.config.target, wire_seq, self.identifier)
            {
                log::debug!(
                    "ignoring reply id={:?} seq={:?} from {:?}, waiting for icmp_seq={}",
                    packet.identifier(),
                    packet.sequence(),
                    packet.source(),
                    wire_seq
                );
                continue;
            }
            return Ok((packet, received_at));
        }
    }

    fn absorb(&mut self, err: Error) -> Result<Outcome> {
        match self.config.error_policy {
            ErrorPolicy::Abort => Err(err),
            ErrorPolicy::Tolerate { .. } if err.is_fatal() => Err(err),
            ErrorPolicy::Tolerate { max_consecutive } => {
                // a probe that never left still counts as sent and lost
                if matches!(err, Error::Transmit { .. }) {
                    self.counters.record_sent();
                }
                self.consecutive_failures += 1;
                if self.consecutive_failures > max_consecutive {
                    return Err(Error::TooManyFailures {
                        count: self.consecutive_failures,
                        last: Box::new(err),
                    });
                }
                log::warn!("round trip failed: {}", err);
                Ok(Outcome::Failed(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};

    use crate::config::AddressFamily;
    use crate::packet::tests::ipv4_datagram;
    use crate::socket::tests::{OnReceive, TransportMock};

    fn v4_session(script: Vec<OnReceive>) -> PingSession<TransportMock> {
        let config = Config::new("127.0.0.1", true, false).unwrap();
        PingSession::with_transport(config, TransportMock::new(AddressFamily::V4, script))
    }

    fn v6_session(script: Vec<OnReceive>) -> PingSession<TransportMock> {
        let config = Config::new("::1", false, true).unwrap();
        PingSession::with_transport(config, TransportMock::new(AddressFamily::V6, script))
    }

    fn unreachable_datagram() -> (Vec<u8>, IpAddr) {
        let router = Ipv4Addr::new(198, 51, 100, 1);
        let icmp = [3, 1, 0, 0, 0, 0, 0, 0];
        (ipv4_datagram(router, Ipv4Addr::LOCALHOST, &icmp), IpAddr::V4(router))
    }

    #[tokio::test]
    async fn loopback_replies_leave_no_loss() {
        let mut session = v4_session(vec![OnReceive::Echo, OnReceive::Echo, OnReceive::Echo]);

        for n in 1..=3u64 {
            assert_eq!(session.sequence(), session.sent() + 1);
            let round_trip = session.round_trip().await.unwrap();
            assert_eq!(round_trip.sequence, n);
            assert!(round_trip.outcome.is_reply());
            assert_eq!(round_trip.packet_loss, 0.0);
        }
        assert_eq!(session.sent(), 3);
        assert_eq!(session.received(), 3);
        assert_eq!(session.sequence(), 4);
        session
            .transport()
            .should_send_number_of_messages(3)
            .should_receive_number_of_messages(3);
    }

    #[tokio::test]
    async fn requests_carry_identifier_and_sequence() {
        let mut session = v4_session(vec![OnReceive::Echo, OnReceive::Echo]);
        session.round_trip().await.unwrap();
        let round_trip = session.round_trip().await.unwrap();

        match round_trip.outcome {
            Outcome::Reply { identifier, sequence, .. } => {
                assert_eq!(identifier, Some(session.identifier()));
                assert_eq!(sequence, Some(2));
            }
            other => panic!("expected a reply, got {other:?}"),
        }

        let sent = session.transport().sent();
        for (i, (request, target)) in sent.iter().enumerate() {
            assert_eq!(*target, IpAddr::V4(Ipv4Addr::LOCALHOST));
            assert_eq!(request[0], 8);
            assert_eq!(u16::from_be_bytes([request[4], request[5]]), session.identifier());
            assert_eq!(u16::from_be_bytes([request[6], request[7]]), i as u16 + 1);
            assert_eq!(&request[8..], b"ping");
        }
    }

    #[tokio::test]
    async fn v6_session_uses_v6_types() {
        let mut session = v6_session(vec![OnReceive::Echo]);
        let round_trip = session.round_trip().await.unwrap();

        assert!(round_trip.outcome.is_reply());
        let sent = session.transport().sent();
        assert_eq!(sent[0].0[0], 128);
        assert_eq!(sent[0].1, "::1".parse::<IpAddr>().unwrap());
    }

    // Surprising on purpose: a reply for someone else's identifier still
    // counts as the answer to our probe.
    #[tokio::test]
    async fn tolerant_matching_accepts_foreign_identifier() {
        let foreign = process_identifier().wrapping_add(1);
        let mut session = v4_session(vec![OnReceive::EchoWithIdentifier(foreign)]);

        let round_trip = session.round_trip().await.unwrap();

        match round_trip.outcome {
            Outcome::Reply { identifier, .. } => assert_eq!(identifier, Some(foreign)),
            other => panic!("expected a reply, got {other:?}"),
        }
        assert_eq!(session.received(), 1);
        assert_eq!(round_trip.packet_loss, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_matching_skips_foreign_identifier() {
        let foreign = process_identifier().wrapping_add(1);
        let config = Config::new("127.0.0.1", true, false)
            .unwrap()
            .with_matching(Matching::Strict);
        let mock = TransportMock::new(
            AddressFamily::V4,
            vec![OnReceive::EchoWithIdentifier(foreign), OnReceive::Echo],
        );
        let mut session = PingSession::with_transport(config, mock);

        let round_trip = session.round_trip().await.unwrap();
        assert!(round_trip.outcome.is_reply());
        session.transport().should_receive_number_of_messages(2);

        let mock = TransportMock::new(AddressFamily::V4, vec![OnReceive::EchoWithIdentifier(foreign)]);
        let config = Config::new("127.0.0.1", true, false)
            .unwrap()
            .with_matching(Matching::Strict);
        let mut session = PingSession::with_transport(config, mock);
        let round_trip = session.round_trip().await.unwrap();
        assert!(matches!(round_trip.outcome, Outcome::Timeout));
        assert_eq!(session.received(), 0);
    }

    #[tokio::test]
    async fn own_request_is_not_a_reply() {
        let mut session = v4_session(vec![OnReceive::OwnRequest, OnReceive::Echo]);

        let round_trip = session.round_trip().await.unwrap();

        assert!(round_trip.outcome.is_reply());
        session.transport().should_receive_number_of_messages(2);
    }

    #[tokio::test]
    async fn other_types_are_not_counted() {
        let (datagram, from) = unreachable_datagram();
        let mut session = v4_session(vec![OnReceive::Datagram(datagram, from), OnReceive::Echo]);

        let first = session.round_trip().await.unwrap();
        assert!(matches!(
            first.outcome,
            Outcome::Unexpected { icmp_type: 3, code: 1, .. }
        ));
        assert_eq!(first.packet_loss, 100.0);

        let second = session.round_trip().await.unwrap();
        assert!(second.outcome.is_reply());
        assert_eq!(second.sequence, 2);
        assert_eq!(second.packet_loss, 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_probe_as_lost() {
        let mut session = v4_session(vec![OnReceive::Pending, OnReceive::Echo]);

        let first = session.round_trip().await.unwrap();
        assert!(matches!(first.outcome, Outcome::Timeout));
        assert_eq!(first.packet_loss, 100.0);
        assert_eq!(first.outcome.latency(), None);

        let second = session.round_trip().await.unwrap();
        assert_eq!(second.sequence, 2);
        assert!(second.outcome.is_reply());
        assert_eq!(session.sent(), 2);
        assert_eq!(session.received(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn without_deadline_the_wait_does_not_end() {
        let config = Config::new("127.0.0.1", true, false)
            .unwrap()
            .with_receive_timeout(None)
            .unwrap();
        let mock = TransportMock::new(AddressFamily::V4, vec![OnReceive::Pending]);
        let mut session = PingSession::with_transport(config, mock);

        let res = tokio::time::timeout(Duration::from_secs(3600), session.round_trip()).await;

        assert!(res.is_err());
        assert_eq!(session.sent(), 1);
        assert_eq!(session.received(), 0);
    }

    #[tokio::test]
    async fn transmit_failure_aborts_by_default() {
        let config = Config::new("127.0.0.1", true, false).unwrap();
        let mock = TransportMock::new(AddressFamily::V4, vec![])
            .fail_sends(vec![io::ErrorKind::AddrNotAvailable]);
        let mut session = PingSession::with_transport(config, mock);

        let err = session.round_trip().await.unwrap_err();

        assert!(matches!(err, Error::Transmit { seq: 1, .. }));
        assert_eq!(session.sent(), 0);
    }

    #[tokio::test]
    async fn receive_and_decode_failures_abort_by_default() {
        let mut session = v4_session(vec![OnReceive::Fail(io::ErrorKind::ConnectionReset)]);
        assert!(matches!(session.round_trip().await, Err(Error::Receive(_))));

        let garbage = OnReceive::Datagram(vec![0x45, 0, 0], IpAddr::V4(Ipv4Addr::LOCALHOST));
        let mut session = v4_session(vec![garbage]);
        assert!(matches!(
            session.round_trip().await,
            Err(Error::MalformedPacket(_))
        ));
    }

    #[tokio::test]
    async fn tolerate_policy_continues_past_failures() {
        let config = Config::new("127.0.0.1", true, false)
            .unwrap()
            .with_error_policy(ErrorPolicy::Tolerate { max_consecutive: 2 });
        let mock = TransportMock::new(
            AddressFamily::V4,
            vec![OnReceive::Fail(io::ErrorKind::ConnectionReset), OnReceive::Echo],
        )
        .fail_sends(vec![io::ErrorKind::AddrNotAvailable]);
        let mut session = PingSession::with_transport(config, mock);

        let first = session.round_trip().await.unwrap();
        assert!(matches!(first.outcome, Outcome::Failed(Error::Transmit { .. })));
        let second = session.round_trip().await.unwrap();
        assert!(matches!(second.outcome, Outcome::Failed(Error::Receive(_))));
        let third = session.round_trip().await.unwrap();
        assert!(third.outcome.is_reply());

        assert_eq!(third.sequence, 3);
        assert_eq!(session.sent(), 3);
        assert_eq!(session.received(), 1);
        assert_eq!(session.sequence(), session.sent() + 1);
    }

    #[tokio::test]
    async fn tolerate_policy_gives_up_after_limit() {
        let config = Config::new("127.0.0.1", true, false)
            .unwrap()
            .with_error_policy(ErrorPolicy::Tolerate { max_consecutive: 1 });
        let mock = TransportMock::new(AddressFamily::V4, vec![]).fail_sends(vec![
            io::ErrorKind::AddrNotAvailable,
            io::ErrorKind::AddrNotAvailable,
        ]);
        let mut session = PingSession::with_transport(config, mock);

        assert!(session.round_trip().await.is_ok());
        let err = session.round_trip().await.unwrap_err();
        assert!(matches!(err, Error::TooManyFailures { count: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_stops_on_shutdown() {
        let mut session = v4_session(vec![OnReceive::Echo, OnReceive::Echo, OnReceive::Echo]);

        session
            .run_until(sleep(Duration::from_secs(5)))
            .await
            .unwrap();

        // probes at t=0s, 2s and 4s
        assert_eq!(session.sent(), 3);
        assert_eq!(session.received(), 3);
        assert_eq!(session.sequence(), 4);
    }

    #[tokio::test]
    async fn run_returns_fatal_errors() {
        let mut session = v4_session(vec![OnReceive::Fail(io::ErrorKind::PermissionDenied)]);

        let err = session.run().await.unwrap_err();

        assert!(matches!(err, Error::Receive(_)));
    }
}
