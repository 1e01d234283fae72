mod connection;
pub use connection::*;

mod config;
mod exchange;
mod tcp_acceptor;

pub use config::*;
pub use exchange::{Exchange, Transport};
pub use tcp_acceptor::*;
