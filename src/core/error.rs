use thiserror::Error;

/// Failure reported by the underlying card transport (PCSC or a test double)
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("{0}")]
    Pcsc(#[from] pcsc::Error),

    #[error("{0}")]
    Other(String),
}

/// Every failure a client request can end in.
///
/// The `Display` text is what the client sees in the `error` field of the
/// response, so keep it short and human readable.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("No PC/SC readers found")]
    NoReadersFound,

    #[error("Reader index {index} out of range ({count} reader(s) available)")]
    InvalidIndex { index: i64, count: usize },

    #[error("Card not present within {timeout_secs}s: {last_error}")]
    CardNotPresent { timeout_secs: u64, last_error: String },

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Transmit failed: {0}")]
    TransmitFailed(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("unknown cmd")]
    UnknownCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command_text_is_exact() {
        assert_eq!(BridgeError::UnknownCommand.to_string(), "unknown cmd");
    }

    #[test]
    fn test_error_descriptions() {
        let err = BridgeError::InvalidIndex { index: 3, count: 1 };
        assert_eq!(
            err.to_string(),
            "Reader index 3 out of range (1 reader(s) available)"
        );

        let err = BridgeError::CardNotPresent {
            timeout_secs: 30,
            last_error: "No smart card inserted".to_string(),
        };
        assert!(err.to_string().contains("30s"));
        assert!(err.to_string().contains("No smart card inserted"));
    }

    #[test]
    fn test_transport_error_wraps_pcsc() {
        let err: TransportError = pcsc::Error::NoSmartcard.into();
        assert!(matches!(err, TransportError::Pcsc(pcsc::Error::NoSmartcard)));
        assert!(!err.to_string().is_empty());
    }
}
