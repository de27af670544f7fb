use std::time::Duration;

use simple_ping::{Config, Error, Outcome, PingSession};

/*
* Note: Raw sockets work only with root privileges or CAP_NET_RAW.
* Run with `cargo test -- --ignored` as root.
*/

async fn ping_loopback(config: Config, count: u64) {
    let mut session = PingSession::open(config).unwrap();

    for n in 1..=count {
        let round_trip = session.round_trip().await.unwrap();
        assert_eq!(round_trip.sequence, n);
        match round_trip.outcome {
            Outcome::Reply { identifier, .. } => assert_eq!(identifier, Some(session.identifier())),
            other => panic!("expected an echo reply, got {other:?}"),
        }
        assert_eq!(round_trip.packet_loss, 0.0);
    }

    assert_eq!(session.sent(), count);
    assert_eq!(session.received(), count);
}

#[tokio::test]
#[ignore = "needs raw socket privileges"]
async fn ping_ipv4_loopback() {
    let config = Config::new("127.0.0.1", true, false)
        .unwrap()
        .with_receive_timeout(Some(Duration::from_secs(1)))
        .unwrap();
    ping_loopback(config, 3).await;
}

#[tokio::test]
#[ignore = "needs raw socket privileges and an ipv6 loopback"]
async fn ping_ipv6_loopback() {
    let config = Config::new("::1", false, true)
        .unwrap()
        .with_receive_timeout(Some(Duration::from_secs(1)))
        .unwrap();
    ping_loopback(config, 3).await;
}

#[test]
fn mismatched_family_fails_at_setup() {
    assert!(matches!(
        Config::new("::1", true, false),
        Err(Error::FamilyMismatch { .. })
    ));
}

#[tokio::test]
async fn unprivileged_open_fails_instead_of_hanging() {
    // Only meaningful without CAP_NET_RAW; as root the socket simply opens.
    let config = Config::new("127.0.0.1", true, false).unwrap();
    match PingSession::open(config) {
        Ok(_) => {}
        Err(err) => assert!(matches!(err, Error::SocketOpen { .. }), "{err}"),
    }
}
