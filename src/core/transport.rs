//! The capability the session needs from the card subsystem.
//!
//! `PcscTransport` in [`crate::core::reader`] is the production
//! implementation; tests substitute their own.

use crate::core::error::TransportError;

/// Reply to a single APDU exchange, status word split off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitReply {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl TransmitReply {
    /// Response data followed by the two status bytes
    pub fn into_bytes(self) -> Vec<u8> {
        let mut bytes = self.data;
        bytes.push(self.sw1);
        bytes.push(self.sw2);
        bytes
    }
}

/// Reader enumeration and connection opening
#[cfg_attr(test, mockall::automock)]
pub trait CardTransport: Send + Sync {
    /// Names of the readers currently attached, in enumeration order
    fn list_readers(&self) -> Result<Vec<String>, TransportError>;

    /// Open a connection to the card present in `reader`
    fn open(&self, reader: &str) -> Result<Box<dyn CardConnection>, TransportError>;
}

/// An open connection to a card
#[cfg_attr(test, mockall::automock)]
pub trait CardConnection: Send {
    /// Answer-to-reset bytes of the connected card
    fn atr(&self) -> Result<Vec<u8>, TransportError>;

    fn transmit(&mut self, apdu: &[u8]) -> Result<TransmitReply, TransportError>;

    /// Release the connection. Calling it again after success is a no-op.
    fn close(&mut self) -> Result<(), TransportError>;
}
