//! Error types for fetch operations.

use reqwest::StatusCode;
use std::io;
use thiserror::Error;

/// Errors that can occur while fetching a resource.
#[derive(Error, Debug)]
pub enum FetchError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// Connection, DNS or timeout failure. Never retried by the fetcher.
    #[error(transparent)]
    TransportError(#[from] reqwest::Error),

    /// JSON deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// The declared or realized body length exceeds the size ceiling.
    #[error("response exceeds size limit of {limit} bytes (declared length: {declared:?})")]
    OverSize {
        /// The ceiling that was exceeded.
        limit: u64,
        /// The length the server declared, if any.
        declared: Option<u64>,
    },

    /// The server answered with a status this fetch cannot use.
    #[error("unexpected response status: {0}")]
    ServerError(StatusCode),

    /// A range worker received the full body instead of its byte range.
    #[error("server ignored the range request for block {index}")]
    RangeIgnored {
        /// Index of the affected block.
        index: usize,
    },

    /// A range worker reached end of stream before its block was complete.
    #[error("block {index} ended early: expected {expected} bytes, received {received}")]
    ShortBlock {
        /// Index of the affected block.
        index: usize,
        /// Bytes the block covers.
        expected: u64,
        /// Bytes actually written.
        received: u64,
    },

    /// The gzip stream was malformed.
    #[error("failed to decompress response body: {0}")]
    DecompressError(#[source] io::Error),

    /// A header name or value could not be used in a request.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A worker task panicked or was aborted.
    #[error("range worker failed: {0}")]
    WorkerFailed(String),
}

impl FetchError {
    /// Returns `true` for network-level failures a caller may want to retry.
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::TransportError(_))
    }
}
