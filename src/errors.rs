use thiserror::Error;

/// Recoverable failures surfaced to callers.
///
/// Malformed input buffers are *not* an error: loading one yields an
/// empty bitmap (see [`crate::Bitmap::from_buffer_copy`]). Internal
/// invariant violations (a zero-sized container, a corrupted move
/// detected by the integrity hash) abort via panic instead of being
/// reported here, since no consistent state remains to return to.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A positional query asked for an element past the end of the set.
    #[error("select index {index} out of bounds for cardinality {cardinality}")]
    OutOfBounds { index: u64, cardinality: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
