use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{BridgeError, TransportError};
use crate::core::retry::{Clock, RetryPolicy, SystemClock, DEFAULT_RETRY_INTERVAL};
use crate::core::transport::{CardConnection, CardTransport};
use crate::core::utils::{describe_status_word, format_hex};

/// The reader a session is attached to, together with its open card handle
struct ActiveConnection {
    reader: String,
    card: Box<dyn CardConnection>,
}

/// One client's view of the card subsystem: at most one open connection.
///
/// Operations block (PCSC calls, the wait-for-card loop), so async callers
/// run them on a blocking thread.
pub struct ReaderSession {
    transport: Arc<dyn CardTransport>,
    clock: Arc<dyn Clock>,
    retry_interval: Duration,
    active: Option<ActiveConnection>,
}

impl ReaderSession {
    pub fn new(transport: Arc<dyn CardTransport>) -> Self {
        Self::with_clock(transport, Arc::new(SystemClock))
    }

    /// Create a session whose wait loop uses `clock` instead of wall time
    pub fn with_clock(transport: Arc<dyn CardTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            active: None,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// List attached readers.
    ///
    /// Enumeration is advisory: a transport failure is logged and reported as
    /// an empty list instead of an error.
    pub fn list_readers(&self) -> Vec<String> {
        self.transport.list_readers().unwrap_or_else(|e| {
            log::warn!("Failed to list readers, reporting none: {}", e);
            Vec::new()
        })
    }

    /// Connect to the reader at `index` of a fresh enumeration and return the
    /// card's ATR.
    ///
    /// Any connection already held is closed first. With `wait` set, opening
    /// is retried until a card shows up or `timeout` elapses.
    pub fn connect(
        &mut self,
        index: i64,
        wait: bool,
        timeout: Duration,
    ) -> Result<Vec<u8>, BridgeError> {
        self.disconnect();

        let readers = self
            .transport
            .list_readers()
            .map_err(|e| BridgeError::ConnectFailed(format!("Failed to list readers: {e}")))?;

        if readers.is_empty() {
            return Err(BridgeError::NoReadersFound);
        }

        let reader = usize::try_from(index)
            .ok()
            .and_then(|i| readers.get(i))
            .ok_or(BridgeError::InvalidIndex {
                index,
                count: readers.len(),
            })?
            .clone();

        log::info!("Connecting to reader: {} (wait: {})", reader, wait);

        let open_and_identify = || -> Result<_, TransportError> {
            let card = self.transport.open(&reader)?;
            let atr = card.atr()?;
            Ok((card, atr))
        };

        let (card, atr) = if wait {
            RetryPolicy::new(self.retry_interval, timeout)
                .run(self.clock.as_ref(), open_and_identify)
                .map_err(|e| BridgeError::CardNotPresent {
                    timeout_secs: timeout.as_secs(),
                    last_error: e.to_string(),
                })?
        } else {
            open_and_identify().map_err(|e| BridgeError::ConnectFailed(e.to_string()))?
        };

        log::info!(
            "Connected to reader: {} (ATR: {})",
            reader,
            format_hex(&atr)
        );
        self.active = Some(ActiveConnection { reader, card });
        Ok(atr)
    }

    /// Drop the current connection, if any.
    ///
    /// Never fails: a close error is logged and the session is cleared anyway.
    pub fn disconnect(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        match active.card.close() {
            Ok(()) => log::info!("Disconnected from reader: {}", active.reader),
            Err(e) => log::warn!(
                "Failed to disconnect cleanly from reader {}: {}",
                active.reader,
                e
            ),
        }
    }

    /// Send `apdu` to the connected card and return the response data with
    /// SW1 SW2 appended.
    pub fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, BridgeError> {
        let active = self.active.as_mut().ok_or(BridgeError::NotConnected)?;

        if apdu.is_empty() {
            return Err(BridgeError::MalformedRequest(
                "APDU cannot be empty".to_string(),
            ));
        }

        log::debug!("Transmitting APDU: {}", format_hex(apdu));

        let reply = active
            .card
            .transmit(apdu)
            .map_err(|e| BridgeError::TransmitFailed(e.to_string()))?;

        log::debug!(
            "Received {} data byte(s), SW {:02X}{:02X}: {}",
            reply.data.len(),
            reply.sw1,
            reply.sw2,
            describe_status_word(reply.sw1, reply.sw2)
        );

        Ok(reply.into_bytes())
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Name of the reader the session is connected to
    pub fn current_reader(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.reader.as_str())
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
