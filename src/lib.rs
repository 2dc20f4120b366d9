//! Library crate for lan-recon-rs: a bounded TCP connect scanner and an ICMP
//! host discovery sweep, plus the small services around them.
pub mod config;
pub mod discovery;
pub mod dns;
pub mod error;
pub mod icmp;
pub mod listener;
pub mod logging;
pub mod netdetect;
pub mod pool;
pub mod ports;
pub mod progress;
pub mod range;
pub mod scanner;
pub mod server;
pub mod types;

pub use error::ReconError;
