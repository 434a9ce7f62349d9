/// Error kinds for the sensor pipeline.
///
/// Per-frame decode problems never surface here — the decoder returns
/// `None` and the capture loop moves on. Everything else maps onto one
/// of these variants so callers can apply the matching policy (fatal at
/// startup, retry with backoff, or log and drop).
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SensorError {
    /// Monitor-mode enable or channel set failed.
    #[error("interface operation failed: {0}")]
    Interface(String),

    /// Capture handle could not be opened or a read failed.
    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    /// A frame could not be decoded. Swallowed per-frame by the capture
    /// loop; only surfaced by APIs that decode on behalf of a caller.
    #[error("frame decode error: {0}")]
    Decode(&'static str),

    /// Document sink upsert or connection failed.
    #[error("document sink error: {0}")]
    Sink(String),

    /// Event bus publish or connection failed.
    #[error("event bus error: {0}")]
    Bus(String),

    /// Vendor lookup service unreachable or returned an error status.
    #[error("vendor lookup error: {0}")]
    Lookup(String),

    /// A lifecycle operation was called in the wrong state.
    #[error("{0}")]
    State(&'static str),
}
