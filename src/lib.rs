pub(crate) mod common;
pub mod codec;
pub mod errors;
pub mod header;
pub mod request;
pub mod server;
pub mod service;

pub use common::*;
pub use request::{EmbeddedMessage, IcapRequest};

/// Version-derived ISTag used on synthesized responses; handlers are free to
/// advertise their own.
pub const DEFAULT_ISTAG: &str = env!("DEFAULT_IS_TAG");
