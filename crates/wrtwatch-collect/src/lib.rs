//! wrtwatch Collect - OpenWrt source adapters
//!
//! This crate turns one configured router into a stream of
//! [`wrtwatch_core::DiscoveredRecord`]s:
//! - SSH transport running the standard OpenWrt command set
//! - ubus JSON-RPC transport over HTTP
//! - Pure text parsers for the command output formats

pub mod parse;
pub mod runner;
pub mod source;
pub mod ubus;

pub use runner::{SshError, SshRunner};
pub use source::{CollectError, RouterSource, SourceTransport};
pub use ubus::{UbusClient, UbusError};
