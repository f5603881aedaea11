//! In-memory card transport shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nfc_bridge::{CardConnection, CardTransport, TransmitReply, TransportError};

pub const MOCK_ATR: [u8; 17] = [
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x03,
    0x00, 0x00,
];

#[derive(Default)]
struct FakeState {
    readers: Vec<String>,
    card_present: bool,
    list_fails: bool,
    responses: HashMap<Vec<u8>, Vec<u8>>,
    opens: usize,
    connects: usize,
    open_connections: usize,
    transmits: usize,
}

/// Fake reader subsystem: a list of readers, one card slot shared by all of them
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new(readers: &[&str]) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().readers = readers.iter().map(|r| r.to_string()).collect();
        transport
    }

    pub fn with_card(self) -> Self {
        self.insert_card();
        self
    }

    pub fn insert_card(&self) {
        self.state.lock().unwrap().card_present = true;
    }

    pub fn remove_card(&self) {
        self.state.lock().unwrap().card_present = false;
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().list_fails = true;
    }

    /// Raw card answer (data followed by SW1 SW2) for an exact APDU
    pub fn add_response(&self, apdu: &[u8], response: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(apdu.to_vec(), response.to_vec());
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    /// Opens that produced a connection
    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open_connections
    }

    pub fn transmits(&self) -> usize {
        self.state.lock().unwrap().transmits
    }
}

impl CardTransport for FakeTransport {
    fn list_readers(&self) -> Result<Vec<String>, TransportError> {
        let state = self.state.lock().unwrap();
        if state.list_fails {
            return Err(TransportError::Other("Mock PCSC error: Failed to list readers".into()));
        }
        Ok(state.readers.clone())
    }

    fn open(&self, reader: &str) -> Result<Box<dyn CardConnection>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.opens += 1;

        if !state.readers.iter().any(|r| r == reader) {
            return Err(TransportError::Other("Mock PCSC error: Reader not found".into()));
        }
        if !state.card_present {
            return Err(TransportError::Pcsc(pcsc::Error::NoSmartcard));
        }

        state.connects += 1;
        state.open_connections += 1;
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct FakeConnection {
    state: Arc<Mutex<FakeState>>,
    closed: bool,
}

impl CardConnection for FakeConnection {
    fn atr(&self) -> Result<Vec<u8>, TransportError> {
        Ok(MOCK_ATR.to_vec())
    }

    fn transmit(&mut self, apdu: &[u8]) -> Result<TransmitReply, TransportError> {
        let mut state = self.state.lock().unwrap();
        if self.closed || !state.card_present {
            return Err(TransportError::Pcsc(pcsc::Error::RemovedCard));
        }
        state.transmits += 1;

        let raw = match state.responses.get(apdu) {
            Some(response) => response.clone(),
            None => match apdu {
                [0x00, 0xA4, 0x04, 0x00, ..] => vec![0x90, 0x00], // SELECT
                [0x00, 0xB0, 0x00, 0x00, ..] => vec![0x48, 0x65, 0x6C, 0x6C, 0x6F, 0x90, 0x00], // READ BINARY
                _ => vec![0x6D, 0x00], // INS not supported
            },
        };

        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(TransmitReply {
            data: data.to_vec(),
            sw1: sw[0],
            sw2: sw[1],
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().open_connections -= 1;
        }
        Ok(())
    }
}
