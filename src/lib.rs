/// NFC Bridge - exposes a PCSC smart card / NFC reader over WebSocket
///
/// Clients send JSON requests (`list`, `connect`, `disconnect`, `xfr`) and get
/// one JSON response per request, in order. Each WebSocket connection owns its
/// own reader session.
pub mod cli;
pub mod core;
pub mod server;

// Re-export commonly used types
pub use core::{
    commands::{CommandDispatcher, Request, Response},
    error::{BridgeError, TransportError},
    reader::PcscTransport,
    session::ReaderSession,
    transport::{CardConnection, CardTransport, TransmitReply},
    utils::{format_hex, parse_hex},
};
pub use server::{BridgeConfig, BridgeServer};

// Common error type
pub type Result<T> = anyhow::Result<T>;
