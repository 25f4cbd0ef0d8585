/// Errors that can occur while managing the shared frame buffer.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// The backing memory could not be created or mapped.
    #[error("failed to allocate {size} byte frame buffer: {source}")]
    Allocation {
        size: usize,
        source: std::io::Error,
    },

    /// A mapping or lease asked for more bytes than were allocated.
    #[error("requested {requested} bytes, buffer capacity is {capacity} bytes")]
    SizeExceeded { requested: usize, capacity: usize },

    /// A view was requested outside the allocated range.
    #[error("range {offset}..{offset}+{len} is outside the {capacity} byte buffer")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// Slots are still leased to in-flight operations.
    #[error("frame buffer still has {outstanding} slot lease(s) outstanding")]
    InUse { outstanding: usize },

    /// Creating a consumer mapping failed.
    #[error("failed to map frame buffer: {0}")]
    Map(std::io::Error),

    /// The requested size or slot layout is unusable.
    #[error("invalid buffer layout: {0}")]
    InvalidLayout(String),
}

pub type Result<T> = std::result::Result<T, BufferError>;
