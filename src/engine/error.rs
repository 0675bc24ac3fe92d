use thiserror::Error;

/// Errors raised while transcoding between custard and tar.
#[derive(Debug, Error)]
pub enum Error {
    /// Fewer bytes were available than a fixed-size structure requires.
    #[error("short read at offset {offset}: expected {expected} bytes, got {got}")]
    ShortRead {
        /// Input offset where the structure started.
        offset: u64,
        /// Bytes the structure needs.
        expected: u64,
        /// Bytes actually available.
        got: u64,
    },

    /// Custard header text does not follow the grammar.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// A member block does not carry the "ustar" magic.
    #[error("invalid ustar magic for member {name:?}")]
    InvalidMagic { name: String },

    /// The stored checksum matches neither the unsigned nor the signed sum.
    #[error("checksum mismatch for member {name:?}: stored {stored}, computed {unsigned} (unsigned) or {signed} (signed)")]
    ChecksumMismatch {
        name: String,
        stored: u64,
        unsigned: i64,
        signed: i64,
    },

    /// A value is wider than the octal field it has to fit in.
    #[error("value {value} does not fit in {width} octal digits")]
    OctalOverflow { value: u64, width: usize },

    /// A numeric tar field holds something other than octal digits.
    #[error("invalid octal field: {0:?}")]
    InvalidOctal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedHeader(msg.into())
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
