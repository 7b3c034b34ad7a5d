use crate::instrument::Instrument;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// All errors generated in `barter-chart`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChartError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid indicator: {0}")]
    InvalidIndicator(String),

    #[error("unknown or disabled instrument: {0}")]
    UnknownInstrument(Instrument),

    #[error("FetchError: {0}")]
    Fetch(#[from] FetchError),

    #[error("ChartSession is closed")]
    SessionClosed,
}

/// Retryable failure to fetch historical candles or instrument metadata.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP error status: {0}")]
    Status(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Http(error.to_string())
        }
    }
}

/// Failure of a live market data connection.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("no data received for {0:?}")]
    ReadTimeout(Duration),

    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Determine if an error requires the live connection to be dropped and re-established.
    pub fn is_terminal(&self) -> bool {
        match self {
            TransportError::Socket(error_msg) => {
                let error_lower = error_msg.to_lowercase();
                error_lower.contains("terminated")
                    || error_lower.contains("connection closed")
                    || error_lower.contains("already closed")
                    || error_lower.contains("io error")
                    || error_lower.contains("reset")
                    || error_lower.contains("timeout")
            }
            _ => true,
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            other => Self::Socket(other.to_string()),
        }
    }
}
