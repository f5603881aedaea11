use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::BridgeError;
use crate::core::session::ReaderSession;
use crate::core::utils::{format_hex, parse_hex};

/// Default wait-for-card timeout used when a `connect` request has none
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest `timeout` a `connect` request may ask for, in seconds
pub const MAX_CONNECT_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Number of handled requests kept per connection
const MAX_HISTORY: usize = 256;

/// A decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List,
    Connect {
        index: i64,
        wait: bool,
        /// Seconds; `None` means the dispatcher default
        timeout: Option<u64>,
    },
    Disconnect,
    Xfr {
        apdu: Vec<u8>,
    },
}

#[derive(Deserialize)]
struct ConnectFields {
    #[serde(default)]
    index: i64,
    #[serde(default = "default_wait")]
    wait: bool,
    #[serde(default)]
    timeout: Option<u64>,
}

fn default_wait() -> bool {
    true
}

#[derive(Deserialize)]
struct XfrFields {
    #[serde(default)]
    apdu: String,
}

impl Request {
    /// Decode one request message.
    ///
    /// The message must be a JSON object with a string `cmd`. Unknown
    /// commands are reported as [`BridgeError::UnknownCommand`], everything
    /// else that does not decode as [`BridgeError::MalformedRequest`].
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| BridgeError::MalformedRequest(format!("Invalid JSON: {e}")))?;

        let cmd = value
            .as_object()
            .ok_or_else(|| BridgeError::MalformedRequest("Request must be a JSON object".into()))?
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::MalformedRequest("Missing string field 'cmd'".into()))?;

        match cmd {
            "list" => Ok(Request::List),
            "connect" => {
                let fields: ConnectFields = decode_fields(value.clone())?;
                if let Some(timeout) = fields.timeout.filter(|t| *t > MAX_CONNECT_TIMEOUT_SECS) {
                    return Err(BridgeError::MalformedRequest(format!(
                        "timeout {timeout} exceeds {MAX_CONNECT_TIMEOUT_SECS} seconds"
                    )));
                }
                Ok(Request::Connect {
                    index: fields.index,
                    wait: fields.wait,
                    timeout: fields.timeout,
                })
            }
            "disconnect" => Ok(Request::Disconnect),
            "xfr" => {
                let fields: XfrFields = decode_fields(value.clone())?;
                let apdu = parse_hex(&fields.apdu)
                    .map_err(|e| BridgeError::MalformedRequest(format!("{e:#}")))?;
                Ok(Request::Xfr { apdu })
            }
            _ => Err(BridgeError::UnknownCommand),
        }
    }

    pub fn command_type(&self) -> CommandType {
        match self {
            Request::List => CommandType::List,
            Request::Connect { .. } => CommandType::Connect,
            Request::Disconnect => CommandType::Disconnect,
            Request::Xfr { .. } => CommandType::Transmit,
        }
    }
}

fn decode_fields<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, BridgeError> {
    serde_json::from_value(value).map_err(|e| BridgeError::MalformedRequest(e.to_string()))
}

/// Response envelope sent back for every request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rapdu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn failure(error: &BridgeError) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn to_json(&self) -> String {
        // A struct of strings and booleans always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"ok":false}"#.to_string())
    }
}

/// What a successful command produced
enum Outcome {
    Readers(Vec<String>),
    Atr(Vec<u8>),
    Rapdu(Vec<u8>),
    Done,
}

impl Outcome {
    fn output(&self) -> Vec<u8> {
        match self {
            Outcome::Atr(bytes) | Outcome::Rapdu(bytes) => bytes.clone(),
            Outcome::Readers(_) | Outcome::Done => Vec::new(),
        }
    }

    fn into_response(self) -> Response {
        match self {
            Outcome::Readers(readers) => Response {
                readers: Some(readers),
                ..Response::success()
            },
            Outcome::Atr(atr) => Response {
                atr: Some(format_hex(&atr)),
                ..Response::success()
            },
            Outcome::Rapdu(rapdu) => Response {
                rapdu: Some(format_hex(&rapdu)),
                ..Response::success()
            },
            Outcome::Done => Response::success(),
        }
    }
}

/// Kinds of requests recorded in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    List,
    Connect,
    Disconnect,
    Transmit,
    /// Unparseable message or unknown `cmd`
    Invalid,
}

/// One handled request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub timestamp: DateTime<Utc>,
    pub command_type: CommandType,
    pub input: Vec<u8>,
    pub output: Vec<u8>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Statistics about handled requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatistics {
    pub total_commands: usize,
    pub successful_commands: usize,
    pub failed_commands: usize,
    pub average_duration_ms: u64,
}

/// Per-connection request handler owning that connection's reader session
pub struct CommandDispatcher {
    session: ReaderSession,
    connect_timeout: Duration,
    history: VecDeque<CommandRecord>,
}

impl CommandDispatcher {
    pub fn new(session: ReaderSession) -> Self {
        Self {
            session,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            history: VecDeque::new(),
        }
    }

    /// Timeout applied to `connect` requests that do not carry one
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Handle one raw request message and produce its response.
    ///
    /// Never fails: every error becomes an `ok: false` response.
    pub fn handle(&mut self, text: &str) -> Response {
        let start_time = Instant::now();
        let timestamp = Utc::now();

        let (command_type, input, result) = match Request::parse(text) {
            Ok(request) => {
                let input = match &request {
                    Request::Xfr { apdu } => apdu.clone(),
                    _ => Vec::new(),
                };
                (request.command_type(), input, self.execute(request))
            }
            Err(e) => (CommandType::Invalid, Vec::new(), Err(e)),
        };

        let duration_ms = start_time.elapsed().as_millis() as u64;

        let (response, output, error) = match result {
            Ok(outcome) => {
                let output = outcome.output();
                (outcome.into_response(), output, None)
            }
            Err(e) => {
                log::warn!("{:?} request failed: {}", command_type, e);
                (Response::failure(&e), Vec::new(), Some(e.to_string()))
            }
        };

        self.record(CommandRecord {
            timestamp,
            command_type,
            input,
            output,
            success: response.ok,
            error,
            duration_ms,
        });

        response
    }

    fn execute(&mut self, request: Request) -> Result<Outcome, BridgeError> {
        match request {
            Request::List => Ok(Outcome::Readers(self.session.list_readers())),
            Request::Connect {
                index,
                wait,
                timeout,
            } => {
                let timeout = timeout.map_or(self.connect_timeout, Duration::from_secs);
                self.session.connect(index, wait, timeout).map(Outcome::Atr)
            }
            Request::Disconnect => {
                self.session.disconnect();
                Ok(Outcome::Done)
            }
            Request::Xfr { apdu } => self.session.transmit(&apdu).map(Outcome::Rapdu),
        }
    }

    fn record(&mut self, record: CommandRecord) {
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    /// Disconnect the session; called when the client connection goes away
    pub fn close(&mut self) {
        self.session.disconnect();

        let stats = self.get_statistics();
        log::info!(
            "Session closed: {} command(s), {} ok, {} failed, avg {} ms",
            stats.total_commands,
            stats.successful_commands,
            stats.failed_commands,
            stats.average_duration_ms
        );
    }

    pub fn session(&self) -> &ReaderSession {
        &self.session
    }

    /// Most recent handled requests, oldest first
    pub fn history(&self) -> impl Iterator<Item = &CommandRecord> {
        self.history.iter()
    }

    /// Get statistics about the retained history
    pub fn get_statistics(&self) -> CommandStatistics {
        let total_commands = self.history.len();
        let successful_commands = self.history.iter().filter(|cmd| cmd.success).count();
        let failed_commands = total_commands - successful_commands;

        let average_duration_ms = if total_commands == 0 {
            0
        } else {
            self.history.iter().map(|cmd| cmd.duration_ms).sum::<u64>() / total_commands as u64
        };

        CommandStatistics {
            total_commands,
            successful_commands,
            failed_commands,
            average_duration_ms,
        }
    }
}
