pub mod config;
pub mod error;
pub mod packet;
pub mod ping;
pub mod socket;
pub mod stats;

#[cfg(unix)]
#[path = "sys/unix.rs"]
mod sys;

pub use config::{AddressFamily, Config, ErrorPolicy, Matching};
pub use error::{Error, Result};
pub use ping::{Outcome, PingSession, RoundTrip};
