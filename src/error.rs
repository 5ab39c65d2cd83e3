//! Error taxonomy for the mesh core.
//!
//! Link- and frame-layer failures (malformed frames, auth failures,
//! duplicates) are recovered from locally and never surface past the
//! scheduler; session-layer failures (`NoRoute`, `RetryExhausted`,
//! `WindowFull`) are returned to the caller that initiated the send.

use core::fmt;

/// Errors produced by the mesh core.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A decoded frame failed one of the structural checks in the header
    /// invariants (bad version, TTL, channel, length, ...).
    MalformedFrame,

    /// AEAD tag verification failed while opening a sealed payload.
    AuthFailure,

    /// `(source, packet_id)` or `(group_id, sequence)` has already been
    /// admitted within the relevant replay window.
    Duplicate,

    /// Route discovery did not yield a path to the destination before its
    /// deadline.
    NoRoute,

    /// The in-flight acknowledgement window is full; the caller may retry
    /// the send later.
    WindowFull,

    /// Carrier-sense reported the channel busy past the backoff retry
    /// budget.
    RadioBusy,

    /// A tracked send exhausted `MAX_RETRIES` without an acknowledgement.
    RetryExhausted,

    /// The persistent store failed to complete a write; in-RAM state is
    /// retained and operation continues.
    StoreUnavailable,

    /// The AEAD nonce counter would wrap on the next encryption. Fatal:
    /// the caller must rekey before further payloads can be sealed.
    NonceWrap,

    /// A byte buffer did not contain enough data, or a value did not fit in
    /// the destination buffer.
    Eof,

    /// A field held a value outside its legal range.
    InvalidValue,

    /// A route, neighbor, group, ADR, or similar bounded table is full.
    TableFull,

    /// Parsing didn't consume (or writing didn't fill) the entire buffer.
    IncompleteParse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::MalformedFrame => "malformed frame",
            Error::AuthFailure => "AEAD authentication failure",
            Error::Duplicate => "duplicate packet or replayed sequence",
            Error::NoRoute => "no route to destination",
            Error::WindowFull => "in-flight acknowledgement window full",
            Error::RadioBusy => "radio reported channel busy",
            Error::RetryExhausted => "retries exhausted without acknowledgement",
            Error::StoreUnavailable => "persistent store unavailable",
            Error::NonceWrap => "nonce counter would wrap, rekey required",
            Error::Eof => "end of buffer",
            Error::InvalidValue => "invalid value for field",
            Error::TableFull => "bounded table is full",
            Error::IncompleteParse => "excess data in buffer",
        })
    }
}
