use std::time::Duration;

use clap::Parser;
use env_logger::Env;

use simple_ping::{Config, ErrorPolicy, Matching, PingSession, Result};

/// Send ICMP echo requests to one host and report packet loss and latency.
///
/// Raw sockets usually need root or CAP_NET_RAW, e.g.
/// `sudo simple-ping -4 --ip 8.8.8.8` or `sudo simple-ping -6 --ip 2001:4860:4860::8888`.
#[derive(Parser, Debug)]
#[command(name = "simple-ping", version)]
struct Cli {
    /// IP address to ping, in numeric form
    #[arg(long = "ip", value_name = "ADDR")]
    ip: String,

    /// Use ICMPv4 (the default when neither -4 nor -6 is given)
    #[arg(short = '4')]
    ipv4: bool,

    /// Use ICMPv6
    #[arg(short = '6')]
    ipv6: bool,

    /// Seconds between probes
    #[arg(short, long, value_name = "SECS", default_value = "2", value_parser = parse_seconds)]
    interval: Duration,

    /// Seconds to wait for a reply before counting the probe as lost [default: twice the interval]
    #[arg(short = 'W', long, value_name = "SECS", value_parser = parse_seconds, conflicts_with = "no_timeout")]
    timeout: Option<Duration>,

    /// Wait for each reply indefinitely
    #[arg(long)]
    no_timeout: bool,

    /// Only accept replies echoing this session's identifier and sequence
    #[arg(long)]
    strict: bool,

    /// Keep going after up to N consecutive failed round trips instead of exiting
    #[arg(long, value_name = "N")]
    max_failures: Option<u32>,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let mut config = Config::new(&self.ip, self.ipv4, self.ipv6)?.with_interval(self.interval)?;
        if self.no_timeout {
            config = config.with_receive_timeout(None)?;
        } else if let Some(timeout) = self.timeout {
            config = config.with_receive_timeout(Some(timeout))?;
        }
        if self.strict {
            config = config.with_matching(Matching::Strict);
        }
        if let Some(max_consecutive) = self.max_failures {
            config = config.with_error_policy(ErrorPolicy::Tolerate { max_consecutive });
        }
        Ok(config)
    }
}

fn parse_seconds(s: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("interrupted");
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config()?;
    let mut session = PingSession::open(config)?;
    session.run_until(shutdown_signal()).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    // The session, and with it the socket, is dropped by the time run returns.
    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
