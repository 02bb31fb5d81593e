//! Packet and event playback over binary event streams.
//!
//! [`StreamPlayback`] walks one stream packet by packet; [`TracePlayback`]
//! merges several streams of the same trace in timestamp order.

pub mod source;
pub mod stream;
pub mod trace;

pub use source::{ByteSource, MappedFile};
pub use stream::{Event, EventMetadata, Packet, PlaybackState, StreamPlayback};
pub use trace::{StreamEvent, TracePlayback};

use crate::value::IntegerValue;

/// Expected value of a `magic` field in the trace packet header.
pub const PACKET_MAGIC: u64 = 0xC1FC_1FC1;

/// Hooks a trace source can override.
pub trait PlaybackCustomization: Send + Sync {
    /// Name of the clock a timestamp field counts cycles of. The default
    /// uses the integer type's `map = clock.<name>.value` attribute.
    fn timestamp_clock_name(&self, field: &IntegerValue) -> Option<String> {
        field.descriptor().mapped_clock.clone()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCustomization;

impl PlaybackCustomization for DefaultCustomization {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackOptions {
    /// Reject packets whose header `magic` is not [`PACKET_MAGIC`].
    pub verify_magic: bool,
    /// Reject packets whose header `uuid` differs from the trace uuid.
    pub verify_uuid: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            verify_magic: true,
            verify_uuid: true,
        }
    }
}

/// Inconsistencies in packet context values. They are reported on the
/// packet and logged, never corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketAnomaly {
    TimestampRangeInverted { begin: u64, end: u64 },
    DiscardedCounterDecreased { previous: u64, current: u64 },
}
