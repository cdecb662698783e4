//! TCP streaming: wire format, framing, and the downstream server.

pub mod server;
pub mod wire;

pub use server::DownstreamServer;
