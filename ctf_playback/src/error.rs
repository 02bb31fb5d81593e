use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Failures raised while compiling metadata. Any of these makes the whole
/// trace unusable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("missing required property `{property}` in {scope}")]
    MissingProperty { scope: String, property: String },

    #[error("property `{property}` in {scope}: expected {expected}, got {found}")]
    PropertyType {
        scope: String,
        property: String,
        expected: &'static str,
        found: String,
    },

    #[error("unresolved type `{name}` referenced from {scope}")]
    UnresolvedType { name: String, scope: String },

    #[error("type `{name}` declared twice in {scope}")]
    DuplicateType { name: String, scope: String },

    #[error("type `{name}` is defined in terms of itself")]
    CyclicType { name: String },

    #[error("field `{field}` declared twice in {scope}")]
    DuplicateField { field: String, scope: String },

    #[error("enumerator `{label}` has malformed range {start}...{stop}")]
    InvalidEnumRange { label: String, start: i128, stop: i128 },

    #[error("enumerator `{label}` overlaps `{other}`")]
    OverlappingEnumRange { label: String, other: String },

    #[error("invalid field reference `{expression}`: {reason}")]
    InvalidFieldPath { expression: String, reason: String },

    #[error("variant field `{field}` has no tag")]
    UntaggedVariant { field: String },

    #[error("stream id {0} declared twice")]
    DuplicateStream(u64),

    #[error("event id {event_id} declared twice in stream {stream_id}")]
    DuplicateEvent { stream_id: u64, event_id: u64 },

    #[error("event `{event}` references undeclared stream {stream_id}")]
    UnknownStream { event: String, stream_id: u64 },

    #[error("event `{event}` omits stream_id but {streams} streams are declared")]
    AmbiguousStream { event: String, streams: usize },

    #[error("unsupported {what}")]
    Unsupported { what: String },

    #[error("malformed metadata packet at byte {offset}: {reason}")]
    Packetized { offset: usize, reason: String },
}

pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

impl MetadataError {
    pub fn missing(scope: impl fmt::Display, property: impl fmt::Display) -> Self {
        Self::MissingProperty {
            scope: scope.to_string(),
            property: property.to_string(),
        }
    }

    pub fn property_type(
        scope: impl fmt::Display,
        property: impl fmt::Display,
        expected: &'static str,
        found: impl fmt::Debug,
    ) -> Self {
        Self::PropertyType {
            scope: scope.to_string(),
            property: property.to_string(),
            expected,
            found: format!("{found:?}"),
        }
    }

    pub fn unsupported(what: impl fmt::Display) -> Self {
        Self::Unsupported {
            what: what.to_string(),
        }
    }

    pub fn packetized(offset: usize, reason: impl fmt::Display) -> Self {
        Self::Packetized {
            offset,
            reason: reason.to_string(),
        }
    }
}

/// Failures raised while decoding binary streams. They abort the current
/// packet or event; the caller chooses how to recover.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(
        "read of {bits} bits for `{field}` at byte {byte_offset} (bit {bit_offset}) \
         crosses the boundary at byte {limit_byte}"
    )]
    Overrun {
        field: String,
        bits: u64,
        byte_offset: u64,
        bit_offset: u64,
        limit_byte: u64,
    },

    #[error("`{path}` does not name an already decoded field (at byte {byte_offset})")]
    UnresolvedPath { path: String, byte_offset: u64 },

    #[error("`{path}` resolved to a non-integer value (at byte {byte_offset})")]
    NotAnInteger { path: String, byte_offset: u64 },

    #[error(
        "`{field}` has a data-driven length of {length} but its elements occupy no bits \
         (at byte {byte_offset})"
    )]
    ZeroWidthElements {
        field: String,
        length: u64,
        byte_offset: u64,
    },

    #[error("variant `{field}` tag `{tag}` resolved to a non-enumeration value (at byte {byte_offset})")]
    VariantTagNotEnum {
        field: String,
        tag: String,
        byte_offset: u64,
    },

    #[error("variant `{field}` has no option for tag value {value} (at byte {byte_offset})")]
    VariantTagUnmatched {
        field: String,
        value: String,
        byte_offset: u64,
    },

    #[error("packet at byte {byte_offset} names undeclared stream {stream_id}")]
    UnknownStream { stream_id: u64, byte_offset: u64 },

    #[error("packet at byte {byte_offset} has no stream_id but the trace declares {streams} streams")]
    AmbiguousStream { streams: usize, byte_offset: u64 },

    #[error("event at byte {byte_offset} names undeclared event {event_id} of stream {stream_id}")]
    UnknownEvent {
        stream_id: u64,
        event_id: u64,
        byte_offset: u64,
    },

    #[error("event at byte {byte_offset} has no id but stream {stream_id} declares {events} events")]
    AmbiguousEvent {
        stream_id: u64,
        events: usize,
        byte_offset: u64,
    },

    #[error("packet at byte {byte_offset} has magic {found:#x}, expected {expected:#x}")]
    BadMagic {
        found: u64,
        expected: u64,
        byte_offset: u64,
    },

    #[error("packet at byte {byte_offset} carries a uuid that differs from the trace uuid")]
    UuidMismatch { byte_offset: u64 },

    #[error("packet at byte {byte_offset} has invalid size: {reason}")]
    InvalidPacketSize { byte_offset: u64, reason: String },

    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("cannot skip packet at byte {byte_offset}: its size is unknown")]
    CannotSkip { byte_offset: u64 },
}

pub type PlaybackResult<T> = std::result::Result<T, PlaybackError>;

impl PlaybackError {
    pub fn unresolved(path: impl fmt::Display, byte_offset: u64) -> Self {
        Self::UnresolvedPath {
            path: path.to_string(),
            byte_offset,
        }
    }

    pub fn invalid_state(operation: &'static str, state: impl fmt::Debug) -> Self {
        Self::InvalidState {
            operation,
            state: format!("{state:?}"),
        }
    }

    pub fn packet_size(byte_offset: u64, reason: impl fmt::Display) -> Self {
        Self::InvalidPacketSize {
            byte_offset,
            reason: reason.to_string(),
        }
    }
}

/// Umbrella error for callers that drive both phases.
#[derive(Debug, Error)]
pub enum CtfError {
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CtfError>;

impl CtfError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
