use thiserror::Error;

/// Request-level errors surfaced by the pipeline.
///
/// Every fallible stage maps its failures into exactly one of these kinds.
/// Errors propagate unchanged from the component that raised them; callers
/// can rely on the kind to pick a response (404, 403, 415, 504, ...).
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The identifier does not resolve in the chosen source provider.
    #[error("not found: {0}")]
    NotFound(String),

    /// The upstream store rejected our credentials.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The format detector recognized no reader for the source bytes.
    #[error("unsupported source format: {0}")]
    UnsupportedSourceFormat(String),

    /// The operation list requests an encoding with no writer.
    #[error("unsupported output format: {0}")]
    UnsupportedOutputFormat(String),

    /// Operation-list normalization failed (negative crop, bad quality, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transient source I/O failure.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A stage exceeded its time budget.
    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: &'static str, seconds: u64 },

    /// The caller cancelled the request mid-flight.
    #[error("request cancelled")]
    Cancelled,

    /// Any other fault, including delegate failures.
    #[error("internal error: {0}")]
    Internal(String),
}

// =============================================================================
// I/O Errors
// =============================================================================

/// Errors from reading source bytes (local files, HTTP, object stores).
#[derive(Debug, Error)]
pub enum IoError {
    /// The object or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials were rejected by the backing store.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Requested range exceeds resource bounds.
    #[error("range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Any other upstream failure.
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        match e {
            IoError::NotFound(s) => Error::NotFound(s),
            IoError::AccessDenied(s) => Error::AccessDenied(s),
            IoError::RangeOutOfBounds { .. } => Error::Internal(e.to_string()),
            IoError::Connection(s) | IoError::Upstream(s) => Error::UpstreamUnavailable(s),
        }
    }
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => IoError::AccessDenied(e.to_string()),
            _ => IoError::Upstream(e.to_string()),
        }
    }
}

// =============================================================================
// TIFF Errors
// =============================================================================

/// Errors from parsing TIFF/BigTIFF structure.
#[derive(Debug, Error)]
pub enum TiffError {
    /// First two bytes are neither II nor MM.
    #[error("invalid TIFF magic: 0x{0:04X}")]
    InvalidMagic(u16),

    /// Version word is neither 42 (TIFF) nor 43 (BigTIFF).
    #[error("invalid TIFF version: {0}")]
    InvalidVersion(u16),

    /// BigTIFF offset size must be 8.
    #[error("invalid BigTIFF offset size: {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// Not enough bytes for the structure being parsed.
    #[error("file too small: need {required} bytes, have {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// An IFD offset points outside the file.
    #[error("invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// An entry declared a field type we do not know.
    #[error("unknown field type: {0}")]
    UnknownFieldType(u16),

    /// A required tag is absent.
    #[error("missing required tag: {0}")]
    MissingTag(&'static str),

    /// A tag value is present but malformed for its use.
    #[error("invalid value for tag {tag}: {message}")]
    InvalidTagValue {
        tag: &'static str,
        message: String,
    },

    /// The directory uses a compression scheme no decoder handles.
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// A tile or strip failed to decompress or decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// I/O failure while fetching structure or pixel bytes.
    #[error(transparent)]
    Io(#[from] IoError),
}

impl From<TiffError> for Error {
    fn from(e: TiffError) -> Self {
        match e {
            TiffError::Io(io) => io.into(),
            TiffError::UnsupportedCompression(s) => Error::UnsupportedSourceFormat(s),
            other => Error::Internal(other.to_string()),
        }
    }
}

// =============================================================================
// Format Errors
// =============================================================================

/// Errors from format detection and non-TIFF container parsing.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The bytes match no recognized signature.
    #[error("unrecognized format: {reason}")]
    Unrecognized { reason: String },

    /// A recognized container is structurally broken.
    #[error("malformed {format} stream: {message}")]
    Malformed {
        format: &'static str,
        message: String,
    },

    /// I/O failure while sniffing.
    #[error(transparent)]
    Io(#[from] IoError),
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        match e {
            FormatError::Io(io) => io.into(),
            FormatError::Unrecognized { reason } => Error::UnsupportedSourceFormat(reason),
            FormatError::Malformed { .. } => Error::Internal(e.to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
