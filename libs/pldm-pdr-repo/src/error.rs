//! Error taxonomy shared by the repository, the codec, and (via re-export) the
//! manager-side crate. No `thiserror`/`anyhow` here — no_std library crates in
//! this tree (e.g. `services/pddb/src/api.rs`'s `PddbRetcode`) hand-roll a
//! small `Copy` enum instead, so this one follows suit.

/// Every fallible operation in this crate returns one of these. None of them are
/// raised by panicking; repository and codec operations are total functions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PdrError {
    /// Unknown record/terminus/remote handle on a read, remove, or lookup.
    NotFound,
    /// A fixed-capacity collection (index, termini table, handle map, tracker
    /// record, blob) is already at capacity.
    Full,
    /// `dataTransferHandle` was at or beyond the end of the addressed record.
    InvalidOffset,
    /// Decode bounds check failed, or a length field didn't match available bytes.
    InvalidLength,
    /// Well-formed bytes but semantically invalid content (a structural
    /// validation rule failed, or a header whose advertised size doesn't fit
    /// its surrounding record).
    Malformed,
    /// The integrator's transport returned an error, or a non-success completion
    /// code, for a `send_recv`. Carries the raw completion code byte when one was
    /// available, for logging.
    TransportError(u8),
    /// Operation not valid for the event's format (caught by validation, or hit at
    /// the handler's `refreshAllRecords`-under-`formatIsPDRHandles` guard).
    Unsupported,
    /// Blob has insufficient remaining capacity for a new record.
    NoSpace,
}

impl core::fmt::Display for PdrError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PdrError::NotFound => write!(f, "handle not found"),
            PdrError::Full => write!(f, "fixed-capacity store is full"),
            PdrError::InvalidOffset => write!(f, "data transfer handle beyond record"),
            PdrError::InvalidLength => write!(f, "length field out of bounds"),
            PdrError::Malformed => write!(f, "malformed or invalid record/event"),
            PdrError::TransportError(cc) => write!(f, "transport error (completion code {cc:#04x})"),
            PdrError::Unsupported => write!(f, "operation not valid for this format"),
            PdrError::NoSpace => write!(f, "blob has no space for this record"),
        }
    }
}

pub type PdrResult<T> = Result<T, PdrError>;
