//! Error types for SeisRelay
//!
//! # Error Recovery Strategies
//!
//! Different error types call for different handling:
//!
//! - **`Config`**: The configuration file is invalid.  Fix it and restart.
//! - **`InvalidPacket`**: A packet is missing required fields or carries an
//!   impossible sample count.  Inside the sanitizer this becomes a quiet
//!   rejection; raised out of [`crate::relay::SubscriptionManager::enqueue_packet`]
//!   it indicates a caller bug.
//! - **`StreamIdentifierMismatch`**: A packet was routed to the wrong stream.
//!   Always a caller bug; raised.
//! - **`InconsistentSamplingRate`** / **`UnsupportedSamplingRate`**: The
//!   duplicate detector cannot compare the packet against its history.  The
//!   packet is rejected with a WARN; the pipeline keeps running.
//! - **`Io`** / **`Serialization`**: Transport trouble.  The upstream
//!   subscriber retries connection-level failures on its reconnect schedule
//!   and treats protocol-level failures as fatal.
//! - **`PrematureSubscriberExit`**: The upstream subscriber thread gave up
//!   (fatal stream error or exhausted reconnect schedule without progress)
//!   while a shutdown had not been requested.  The daemon exits non-zero.

use thiserror::Error;

/// Errors that can occur in SeisRelay
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{actual} does not match stream identifier {expected}")]
    StreamIdentifierMismatch { expected: String, actual: String },

    #[error("Inconsistent sampling rates for {0}")]
    InconsistentSamplingRate(String),

    #[error("Could not classify sampling rate {rate} for {name}")]
    UnsupportedSamplingRate { name: String, rate: i32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Premature end of subscriber thread")]
    PrematureSubscriberExit,

    #[error("{0}")]
    Other(String),
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<prost::EncodeError> for Error {
    fn from(e: prost::EncodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
