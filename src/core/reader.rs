use pcsc::{Card, Context, Disposition, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use std::ffi::CString;

use crate::core::error::TransportError;
use crate::core::transport::{CardConnection, CardTransport, TransmitReply};

/// PCSC-backed card transport
///
/// A fresh PCSC context is established for every enumeration and every
/// connection attempt, so a restarted PCSC service is picked up on the next
/// call without any bookkeeping here.
pub struct PcscTransport {
    share_mode: ShareMode,
}

impl PcscTransport {
    /// Create a transport connecting in shared mode
    pub fn new() -> Self {
        Self::with_share_mode(ShareMode::Shared)
    }

    pub fn with_share_mode(share_mode: ShareMode) -> Self {
        Self { share_mode }
    }

    fn establish(&self) -> Result<Context, TransportError> {
        Ok(Context::establish(Scope::User)?)
    }
}

impl Default for PcscTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CardTransport for PcscTransport {
    fn list_readers(&self) -> Result<Vec<String>, TransportError> {
        let context = self.establish()?;

        let len = match context.list_readers_len() {
            Ok(len) => len,
            Err(pcsc::Error::NoReadersAvailable) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut readers_buf = vec![0; len];
        let readers = match context.list_readers(&mut readers_buf) {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(readers
            .map(|name| name.to_string_lossy().to_string())
            .collect())
    }

    fn open(&self, reader: &str) -> Result<Box<dyn CardConnection>, TransportError> {
        let reader_cstr = CString::new(reader)
            .map_err(|_| TransportError::Other(format!("Invalid reader name: {reader}")))?;

        let context = self.establish()?;
        let card = context.connect(&reader_cstr, self.share_mode, Protocols::ANY)?;

        log::debug!("Opened card connection on reader: {}", reader);
        Ok(Box::new(PcscConnection { card: Some(card) }))
    }
}

/// Open PCSC card handle; `None` once closed
struct PcscConnection {
    card: Option<Card>,
}

impl PcscConnection {
    fn card(&self) -> Result<&Card, TransportError> {
        self.card
            .as_ref()
            .ok_or_else(|| TransportError::Other("Card connection already closed".to_string()))
    }
}

impl CardConnection for PcscConnection {
    fn atr(&self) -> Result<Vec<u8>, TransportError> {
        let status = self.card()?.status2_owned()?;
        Ok(status.atr().to_vec())
    }

    fn transmit(&mut self, apdu: &[u8]) -> Result<TransmitReply, TransportError> {
        let card = self.card()?;
        let mut response_buf = [0; MAX_BUFFER_SIZE];
        let response = card.transmit(apdu, &mut response_buf)?;
        split_status_word(response)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match self.card.take() {
            Some(card) => card
                .disconnect(Disposition::LeaveCard)
                .map_err(|(_card, e)| TransportError::Pcsc(e)),
            None => Ok(()),
        }
    }
}

/// Split a raw card response into data and its trailing SW1/SW2
fn split_status_word(response: &[u8]) -> Result<TransmitReply, TransportError> {
    match response {
        [data @ .., sw1, sw2] => Ok(TransmitReply {
            data: data.to_vec(),
            sw1: *sw1,
            sw2: *sw2,
        }),
        _ => Err(TransportError::Other(format!(
            "Response too short for a status word ({} byte(s))",
            response.len()
        ))),
    }
}
