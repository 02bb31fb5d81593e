//! Compiled trace metadata: the catalog of trace, stream, event, clock and
//! environment descriptors that playback decodes against.
//!
//! [`Metadata`] is immutable after [`Metadata::compile`] returns, so one
//! instance can be shared across threads decoding different streams.

pub mod ast;
pub mod compiler;
pub mod packetized;
pub mod scope;

use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
};

use crate::{
    error::MetadataResult,
    types::{ByteOrder, StructType},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceDescriptor {
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub uuid: Option<[u8; 16]>,
    pub byte_order: ByteOrder,
    pub packet_header: Option<StructType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub id: u64,
    pub packet_context: Option<StructType>,
    pub event_header: Option<StructType>,
    pub event_context: Option<StructType>,
}

impl StreamDescriptor {
    pub fn implicit(id: u64) -> Self {
        Self {
            id,
            packet_context: None,
            event_header: None,
            event_context: None,
        }
    }
}

/// One event class. Carries every layout needed to decode an instance, in
/// decode order: the stream's event header and context, then its own
/// context and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub id: u64,
    pub stream_id: u64,
    pub name: String,
    pub log_level: Option<i64>,
    pub model_emf_uri: Option<String>,
    pub header: Option<StructType>,
    pub stream_context: Option<StructType>,
    pub context: Option<StructType>,
    pub payload: Option<StructType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockDescriptor {
    pub name: String,
    pub uuid: Option<[u8; 16]>,
    pub description: Option<String>,
    /// Cycles per second.
    pub freq: u64,
    pub precision: u64,
    pub offset_s: i64,
    /// In cycles, added on top of `offset_s`.
    pub offset: i64,
    pub absolute: bool,
}

const NANOS_PER_SEC: i128 = 1_000_000_000;

impl ClockDescriptor {
    /// Converts a cycle count to nanoseconds since the clock's origin.
    pub fn cycles_to_ns(&self, cycles: u64) -> i64 {
        let cycles = i128::from(self.offset) + i128::from(cycles);
        let freq = i128::from(self.freq.max(1));
        let nanos = if freq == NANOS_PER_SEC {
            cycles
        } else {
            cycles * NANOS_PER_SEC / freq
        };
        let total = i128::from(self.offset_s) * NANOS_PER_SEC + nanos;
        total.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Integer(i128),
    String(String),
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Integer(value) => write!(f, "{value}"),
            EnvValue::String(text) => write!(f, "{text:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvironmentDescriptor {
    pub entries: BTreeMap<String, EnvValue>,
}

impl EnvironmentDescriptor {
    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.entries.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub trace: TraceDescriptor,
    pub environment: EnvironmentDescriptor,
    pub clocks: BTreeMap<String, ClockDescriptor>,
    pub streams: BTreeMap<u64, StreamDescriptor>,
    pub events: BTreeMap<(u64, u64), Arc<EventDescriptor>>,
}

impl Metadata {
    /// Compiles a parsed metadata tree. This is the single validation gate:
    /// playback never re-checks type legality.
    pub fn compile(tree: &ast::Metadata) -> MetadataResult<Self> {
        compiler::compile(tree)
    }

    pub fn stream(&self, id: u64) -> Option<&StreamDescriptor> {
        self.streams.get(&id)
    }

    pub fn event(&self, stream_id: u64, event_id: u64) -> Option<&Arc<EventDescriptor>> {
        self.events.get(&(stream_id, event_id))
    }

    pub fn events_of(&self, stream_id: u64) -> impl Iterator<Item = &Arc<EventDescriptor>> {
        self.events
            .range((stream_id, 0)..=(stream_id, u64::MAX))
            .map(|(_, event)| event)
    }

    pub fn clock(&self, name: &str) -> Option<&ClockDescriptor> {
        self.clocks.get(name)
    }
}
