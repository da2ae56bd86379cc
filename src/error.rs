// Error taxonomy for the deduplication index.
//
// `QUEUED` from the design (spec.md §7) is deliberately not a variant here:
// it is an internal dispatch signal (see `request::Dispatch`), never a
// user-visible error.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("component is structurally corrupt: {0}")]
    CorruptComponent(String),

    #[error("data is corrupt: {0}")]
    CorruptData(String),

    #[error("file is corrupt: {0}")]
    CorruptFile(String),

    #[error("index was not saved cleanly, rebuild required")]
    NotSavedCleanly,

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("unexpected end of file")]
    EndOfFile,

    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("delta list overflow in zone {zone}, list {list}")]
    Overflow { zone: u32, list: u32 },

    #[error("duplicate name encountered")]
    DuplicateName,

    #[error("invalid internal state: {0}")]
    BadState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index is disabled after a previous unrecoverable error")]
    Disabled,

    #[error("no index is open")]
    NoIndex,

    #[error("index is busy (suspending or freeing)")]
    Busy,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// `true` for errors that are swallowed rather than propagated during
    /// normal writes and during rebuild (spec.md §7).
    #[must_use]
    pub fn is_swallowed_during_write(&self) -> bool {
        matches!(self, Self::Overflow { .. } | Self::DuplicateName)
    }

    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::CorruptComponent(_) | Self::CorruptData(_) | Self::CorruptFile(_)
        )
    }
}
