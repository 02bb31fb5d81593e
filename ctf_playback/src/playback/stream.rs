//! Playback of one binary event stream.
//!
//! A stream is a run of packets. Each packet starts with the optional trace
//! packet header and stream packet context, followed by events up to the
//! packet's content size. The playback walks them with a small state
//! machine:
//!
//! ```text
//! BeforePacketHeader -> PacketHeaderRead -> PacketContextRead
//!     -> ReadingEvents -> PacketExhausted -> (next packet)
//! ```

use std::{fmt, sync::Arc};

use serde_json::{json, Value};
use tracing::{trace, warn};

use super::{
    source::ByteSource, DefaultCustomization, PacketAnomaly, PlaybackCustomization, PlaybackOptions,
    PACKET_MAGIC,
};
use crate::{
    cursor::{BitCursor, CursorState},
    decoder::decode_scope,
    error::{PlaybackError, PlaybackResult},
    expr::{PathRoot, ScopeValues},
    metadata::{EventDescriptor, Metadata, StreamDescriptor},
    value::{FieldValue, IntegerValue, StructValue},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    BeforePacketHeader,
    PacketHeaderRead,
    PacketContextRead,
    ReadingEvents,
    PacketExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Zero-based position of the packet in its stream.
    pub index: usize,
    pub byte_offset: u64,
    pub stream_id: u64,
    pub header: Option<StructValue>,
    pub context: Option<StructValue>,
    /// Header, context and events, in bits.
    pub content_bits: u64,
    /// Content plus padding, in bits.
    pub packet_bits: u64,
    /// Whether the context declared `packet_size`. Without it the packet
    /// spans the rest of the stream.
    pub size_declared: bool,
    pub timestamp_begin: Option<i64>,
    pub timestamp_end: Option<i64>,
    /// Both bounds are present and `begin <= end`.
    pub timestamps_valid: bool,
    /// Running discarded-event counter from the packet context.
    pub discarded_events: Option<u64>,
    /// Events lost between the previous packet and this one.
    pub lost_events: u64,
    pub anomalies: Vec<PacketAnomaly>,
}

/// The part of an event read before its descriptor is known: the stream
/// event header and stream event context.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMetadata {
    pub byte_offset: u64,
    pub descriptor: Arc<EventDescriptor>,
    pub header: Option<StructValue>,
    pub stream_context: Option<StructValue>,
    /// Timestamp in clock cycles, extended to 64 bits.
    pub cycles: Option<u64>,
    /// Timestamp in nanoseconds, or raw cycles when no clock applies.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub byte_offset: u64,
    pub stream_id: u64,
    pub descriptor: Arc<EventDescriptor>,
    pub header: Option<StructValue>,
    pub stream_context: Option<StructValue>,
    pub context: Option<StructValue>,
    pub payload: Option<StructValue>,
    pub cycles: Option<u64>,
    pub timestamp: Option<i64>,
    pub payload_bits: u64,
    /// Discarded-event counter of the enclosing packet.
    pub discarded_events: u64,
}

impl Event {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Payload field `name`.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.payload.as_ref()?.field(name)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name(),
            "id": self.descriptor.id,
            "stream_id": self.stream_id,
            "byte_offset": self.byte_offset,
            "timestamp": self.timestamp,
            "cycles": self.cycles,
            "header": self.header.as_ref().map(StructValue::to_json),
            "stream_context": self.stream_context.as_ref().map(StructValue::to_json),
            "context": self.context.as_ref().map(StructValue::to_json),
            "fields": self.payload.as_ref().map(StructValue::to_json),
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "[{ts}] ")?,
            None => write!(f, "[-] ")?,
        }
        write!(f, "{}: {{ stream_id = {} }}", self.name(), self.stream_id)?;
        for scope in [&self.stream_context, &self.context, &self.payload].into_iter().flatten() {
            write!(f, ", {scope}")?;
        }
        Ok(())
    }
}

pub struct StreamPlayback<'m, S> {
    metadata: &'m Metadata,
    source: S,
    options: PlaybackOptions,
    customization: Arc<dyn PlaybackCustomization>,
    state: PlaybackState,
    cursor: CursorState,
    /// Byte offset of the next packet header.
    next_packet: u64,
    packet: Option<Packet>,
    packets_read: usize,
    /// Bit position of the event being read, once `move_to_next_event`
    /// found one.
    event_start: Option<u64>,
    pending: Option<EventMetadata>,
    last_cycles: Option<u64>,
    last_timestamp: Option<i64>,
    last_discarded: Option<u64>,
}

impl<S> fmt::Debug for StreamPlayback<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPlayback")
            .field("state", &self.state)
            .field("next_packet", &self.next_packet)
            .field("packets_read", &self.packets_read)
            .finish_non_exhaustive()
    }
}

impl<'m, S: ByteSource> StreamPlayback<'m, S> {
    pub fn new(metadata: &'m Metadata, source: S) -> Self {
        Self {
            metadata,
            source,
            options: PlaybackOptions::default(),
            customization: Arc::new(DefaultCustomization),
            state: PlaybackState::BeforePacketHeader,
            cursor: CursorState::default(),
            next_packet: 0,
            packet: None,
            packets_read: 0,
            event_start: None,
            pending: None,
            last_cycles: None,
            last_timestamp: None,
            last_discarded: None,
        }
    }

    pub fn with_options(mut self, options: PlaybackOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_customization(mut self, customization: Arc<dyn PlaybackCustomization>) -> Self {
        self.customization = customization;
        self
    }

    pub fn metadata(&self) -> &'m Metadata {
        self.metadata
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// The packet most recently read with [`read_packet_metadata`](Self::read_packet_metadata).
    pub fn packet(&self) -> Option<&Packet> {
        self.packet.as_ref()
    }

    pub fn packets_read(&self) -> usize {
        self.packets_read
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Reads the header and context of the next packet. Returns `false` at
    /// the end of the stream.
    pub fn read_packet_metadata(&mut self) -> PlaybackResult<bool> {
        match self.state {
            PlaybackState::BeforePacketHeader | PlaybackState::PacketExhausted => {}
            state => return Err(PlaybackError::invalid_state("read_packet_metadata", state)),
        }

        let metadata = self.metadata;
        let data = self.source.bytes();
        let offset = self.next_packet;
        let stream_len = data.len() as u64;
        if offset >= stream_len {
            return Ok(false);
        }

        self.state = PlaybackState::BeforePacketHeader;
        self.packet = None;
        self.event_start = None;
        self.pending = None;

        let mut cursor = BitCursor::new(data);
        cursor.start_packet(offset);

        let header = match &metadata.trace.packet_header {
            Some(ty) => Some(decode_scope(
                &mut cursor,
                ScopeValues::default(),
                PathRoot::TracePacketHeader,
                ty,
            )?),
            None => None,
        };
        if let Some(header) = &header {
            self.check_header(header, offset)?;
        }
        self.state = PlaybackState::PacketHeaderRead;

        let stream = resolve_stream(metadata, header.as_ref(), offset)?;
        let context = match &stream.packet_context {
            Some(ty) => {
                let scopes = ScopeValues {
                    trace_packet_header: header.as_ref(),
                    ..ScopeValues::default()
                };
                Some(decode_scope(&mut cursor, scopes, PathRoot::StreamPacketContext, ty)?)
            }
            None => None,
        };

        let declared_packet = context
            .as_ref()
            .and_then(|ctx| ctx.find_integer("packet_size"))
            .map(IntegerValue::raw);
        let declared_content = context
            .as_ref()
            .and_then(|ctx| ctx.find_integer("content_size"))
            .map(IntegerValue::raw);
        let remaining_bits = (stream_len - offset) * 8;
        let packet_bits = declared_packet.unwrap_or(remaining_bits);
        let content_bits = declared_content.unwrap_or(packet_bits);

        if packet_bits == 0 || packet_bits % 8 != 0 {
            return Err(PlaybackError::packet_size(
                offset,
                format!("packet size of {packet_bits} bits is not a positive number of bytes"),
            ));
        }
        if content_bits > packet_bits {
            return Err(PlaybackError::packet_size(
                offset,
                format!("content size {content_bits} exceeds packet size {packet_bits}"),
            ));
        }
        if packet_bits > remaining_bits {
            return Err(PlaybackError::packet_size(
                offset,
                format!(
                    "packet of {} bytes extends past the end of the stream ({} bytes left)",
                    packet_bits / 8,
                    remaining_bits / 8
                ),
            ));
        }
        if content_bits < cursor.packet_position() {
            return Err(PlaybackError::packet_size(
                offset,
                format!(
                    "content size {content_bits} is smaller than the {} bits of header and context",
                    cursor.packet_position()
                ),
            ));
        }
        cursor.set_limit(content_bits);

        let mut anomalies = Vec::new();
        let begin = context.as_ref().and_then(|ctx| integer_with_suffix(ctx, "_begin"));
        let end = context.as_ref().and_then(|ctx| integer_with_suffix(ctx, "_end"));
        let timestamps_valid = match (begin, end) {
            (Some(begin), Some(end)) if begin.raw() > end.raw() => {
                warn!(
                    byte_offset = offset,
                    begin = begin.raw(),
                    end = end.raw(),
                    "packet timestamp range is inverted"
                );
                anomalies.push(PacketAnomaly::TimestampRangeInverted {
                    begin: begin.raw(),
                    end: end.raw(),
                });
                false
            }
            (Some(_), Some(_)) => true,
            _ => false,
        };
        let begin_cycles = begin.map(IntegerValue::raw);
        let timestamp_begin = begin.map(|field| self.to_ns(field, field.raw()));
        let timestamp_end = end.map(|field| self.to_ns(field, field.raw()));

        let discarded = context
            .as_ref()
            .and_then(|ctx| ctx.find_integer("events_discarded").or_else(|| ctx.find_integer("discarded_events")))
            .map(IntegerValue::raw);
        let lost_events = match (self.last_discarded, discarded) {
            (Some(previous), Some(current)) if current < previous => {
                warn!(
                    byte_offset = offset,
                    previous,
                    current,
                    "discarded event counter decreased"
                );
                anomalies.push(PacketAnomaly::DiscardedCounterDecreased { previous, current });
                0
            }
            (Some(previous), Some(current)) => current - previous,
            (None, Some(current)) => current,
            (_, None) => 0,
        };
        if lost_events > 0 {
            warn!(
                stream_id = stream.id,
                byte_offset = offset,
                lost_events,
                "events were discarded before this packet"
            );
        }

        self.cursor = cursor.state();
        if begin_cycles.is_some() {
            self.last_cycles = begin_cycles;
            self.last_timestamp = timestamp_begin;
        }
        if discarded.is_some() {
            self.last_discarded = discarded;
        }
        self.next_packet = offset + packet_bits / 8;
        trace!(
            stream_id = stream.id,
            byte_offset = offset,
            content_bits,
            packet_bits,
            "read packet metadata"
        );
        self.packet = Some(Packet {
            index: self.packets_read,
            byte_offset: offset,
            stream_id: stream.id,
            header,
            context,
            content_bits,
            packet_bits,
            size_declared: declared_packet.is_some(),
            timestamp_begin,
            timestamp_end,
            timestamps_valid,
            discarded_events: discarded,
            lost_events,
            anomalies,
        });
        self.packets_read += 1;
        self.state = PlaybackState::PacketContextRead;
        Ok(true)
    }

    fn check_header(&self, header: &StructValue, byte_offset: u64) -> PlaybackResult<()> {
        if self.options.verify_magic {
            if let Some(magic) = header.field("magic").and_then(FieldValue::as_integer) {
                if magic.raw() != PACKET_MAGIC {
                    return Err(PlaybackError::BadMagic {
                        found: magic.raw(),
                        expected: PACKET_MAGIC,
                        byte_offset,
                    });
                }
            }
        }
        if self.options.verify_uuid {
            if let (Some(expected), Some(FieldValue::Array(items))) =
                (self.metadata.trace.uuid, header.field("uuid"))
            {
                let found: Option<Vec<u8>> = items
                    .iter()
                    .map(|item| item.as_integer().map(|int| int.raw() as u8))
                    .collect();
                if found.is_some_and(|found| found != expected) {
                    return Err(PlaybackError::UuidMismatch { byte_offset });
                }
            }
        }
        Ok(())
    }

    /// Positions the playback on the next event of the current packet.
    /// Returns `false` once the packet's content is exhausted. An event whose
    /// metadata was read but whose payload was not is finished first.
    pub fn move_to_next_event(&mut self) -> PlaybackResult<bool> {
        match self.state {
            PlaybackState::PacketContextRead | PlaybackState::ReadingEvents => {}
            PlaybackState::PacketExhausted => return Ok(false),
            state => return Err(PlaybackError::invalid_state("move_to_next_event", state)),
        }
        if self.event_start.is_some() {
            self.read_event()?;
        }

        let stream = self.current_stream("move_to_next_event")?;
        let mut cursor = BitCursor::resume(self.source.bytes(), self.cursor);
        if let Some(header) = &stream.event_header {
            cursor.align(header.alignment);
        }
        if cursor.at_limit() {
            self.state = PlaybackState::PacketExhausted;
            return Ok(false);
        }
        self.cursor = cursor.state();
        self.event_start = Some(self.cursor.position);
        self.state = PlaybackState::ReadingEvents;
        Ok(true)
    }

    /// Decodes the stream event header and stream event context of the
    /// current event and identifies its descriptor.
    pub fn read_event_metadata(&mut self) -> PlaybackResult<&EventMetadata> {
        let meta = match self.pending.take() {
            Some(meta) => meta,
            None => self.decode_event_metadata()?,
        };
        let meta: &EventMetadata = self.pending.insert(meta);
        Ok(meta)
    }

    fn decode_event_metadata(&mut self) -> PlaybackResult<EventMetadata> {
        if self.state != PlaybackState::ReadingEvents || self.event_start.is_none() {
            return Err(PlaybackError::invalid_state("read_event_metadata", self.state));
        }
        let metadata = self.metadata;
        let stream = self.current_stream("read_event_metadata")?;
        let packet = self.current_packet("read_event_metadata")?;
        let mut cursor = BitCursor::resume(self.source.bytes(), self.cursor);
        let byte_offset = cursor.byte_offset();

        let packet_scopes = ScopeValues {
            trace_packet_header: packet.header.as_ref(),
            stream_packet_context: packet.context.as_ref(),
            ..ScopeValues::default()
        };
        let header = match &stream.event_header {
            Some(ty) => Some(decode_scope(&mut cursor, packet_scopes, PathRoot::StreamEventHeader, ty)?),
            None => None,
        };

        let descriptor = match header.as_ref().and_then(|h| h.find_integer("id")) {
            Some(id) => metadata
                .event(stream.id, id.raw())
                .ok_or(PlaybackError::UnknownEvent {
                    stream_id: stream.id,
                    event_id: id.raw(),
                    byte_offset,
                })?,
            None => {
                let mut events = metadata.events_of(stream.id);
                match (events.next(), events.next()) {
                    (Some(only), None) => only,
                    _ => {
                        return Err(PlaybackError::AmbiguousEvent {
                            stream_id: stream.id,
                            events: metadata.events_of(stream.id).count(),
                            byte_offset,
                        })
                    }
                }
            }
        }
        .clone();

        let (cycles, timestamp, extended) = match header.as_ref().and_then(|h| h.find_integer("timestamp")) {
            Some(field) => {
                let cycles = extend_timestamp(self.last_cycles, field.raw(), field.descriptor().size);
                (Some(cycles), Some(self.to_ns(field, cycles)), true)
            }
            None => (self.last_cycles, self.last_timestamp, false),
        };

        let stream_context = match &stream.event_context {
            Some(ty) => {
                let scopes = ScopeValues {
                    stream_event_header: header.as_ref(),
                    ..packet_scopes
                };
                Some(decode_scope(&mut cursor, scopes, PathRoot::StreamEventContext, ty)?)
            }
            None => None,
        };

        self.cursor = cursor.state();
        if extended {
            self.last_cycles = cycles;
            self.last_timestamp = timestamp;
        }
        Ok(EventMetadata {
            byte_offset,
            descriptor,
            header,
            stream_context,
            cycles,
            timestamp,
        })
    }

    /// Decodes the rest of the current event: its context and payload.
    pub fn read_event(&mut self) -> PlaybackResult<Event> {
        if self.pending.is_none() {
            self.read_event_metadata()?;
        }
        let (context, payload, payload_bits, end) = {
            let meta = self
                .pending
                .as_ref()
                .ok_or_else(|| PlaybackError::invalid_state("read_event", self.state))?;
            let packet = self.current_packet("read_event")?;
            let mut cursor = BitCursor::resume(self.source.bytes(), self.cursor);
            let scopes = ScopeValues {
                trace_packet_header: packet.header.as_ref(),
                stream_packet_context: packet.context.as_ref(),
                stream_event_header: meta.header.as_ref(),
                stream_event_context: meta.stream_context.as_ref(),
                event_context: None,
            };

            let context = match &meta.descriptor.context {
                Some(ty) => Some(decode_scope(&mut cursor, scopes, PathRoot::EventContext, ty)?),
                None => None,
            };
            let (payload, payload_bits) = match &meta.descriptor.payload {
                Some(ty) => {
                    cursor.align(ty.alignment);
                    let start = cursor.position();
                    let scopes = ScopeValues {
                        event_context: context.as_ref(),
                        ..scopes
                    };
                    let payload = decode_scope(&mut cursor, scopes, PathRoot::EventFields, ty)?;
                    (Some(payload), cursor.position() - start)
                }
                None => (None, 0),
            };
            (context, payload, payload_bits, cursor.state())
        };

        let event_start = self.event_start.unwrap_or(self.cursor.position);
        if end.position <= event_start {
            return Err(PlaybackError::packet_size(
                event_start / 8,
                "event occupies no bits, packet content cannot advance",
            ));
        }

        let meta = self
            .pending
            .take()
            .ok_or_else(|| PlaybackError::invalid_state("read_event", self.state))?;
        let packet = self.current_packet("read_event")?;
        let event = Event {
            byte_offset: meta.byte_offset,
            stream_id: packet.stream_id,
            discarded_events: packet.discarded_events.unwrap_or(0),
            descriptor: meta.descriptor,
            header: meta.header,
            stream_context: meta.stream_context,
            context,
            payload,
            cycles: meta.cycles,
            timestamp: meta.timestamp,
            payload_bits,
        };
        self.cursor = end;
        self.event_start = None;
        trace!(
            event = event.name(),
            byte_offset = event.byte_offset,
            payload_bits,
            "read event"
        );
        Ok(event)
    }

    /// Reads the next event, crossing packet boundaries. Returns `None` at
    /// the end of the stream.
    pub fn next_event(&mut self) -> PlaybackResult<Option<Event>> {
        loop {
            match self.state {
                PlaybackState::BeforePacketHeader | PlaybackState::PacketExhausted => {
                    if !self.read_packet_metadata()? {
                        return Ok(None);
                    }
                }
                PlaybackState::PacketContextRead | PlaybackState::ReadingEvents => {
                    if self.move_to_next_event()? {
                        return self.read_event().map(Some);
                    }
                }
                state @ PlaybackState::PacketHeaderRead => {
                    return Err(PlaybackError::invalid_state("next_event", state))
                }
            }
        }
    }

    /// Abandons the rest of the current packet, typically after a playback
    /// error, so that the next read starts at the following packet. Fails
    /// when the packet's extent is unknown because its header or context
    /// could not be decoded.
    pub fn skip_packet(&mut self) -> PlaybackResult<()> {
        let Some(packet) = &self.packet else {
            return Err(PlaybackError::CannotSkip {
                byte_offset: self.next_packet,
            });
        };
        if self.state == PlaybackState::PacketHeaderRead {
            return Err(PlaybackError::CannotSkip {
                byte_offset: packet.byte_offset,
            });
        }
        trace!(byte_offset = packet.byte_offset, "skipping rest of packet");
        self.state = PlaybackState::PacketExhausted;
        self.event_start = None;
        self.pending = None;
        Ok(())
    }

    fn current_packet(&self, operation: &'static str) -> PlaybackResult<&Packet> {
        self.packet
            .as_ref()
            .ok_or_else(|| PlaybackError::invalid_state(operation, self.state))
    }

    fn current_stream(&self, operation: &'static str) -> PlaybackResult<&'m StreamDescriptor> {
        let packet = self.current_packet(operation)?;
        self.metadata
            .stream(packet.stream_id)
            .ok_or(PlaybackError::UnknownStream {
                stream_id: packet.stream_id,
                byte_offset: packet.byte_offset,
            })
    }

    fn to_ns(&self, field: &IntegerValue, cycles: u64) -> i64 {
        self.customization
            .timestamp_clock_name(field)
            .and_then(|name| self.metadata.clock(&name))
            .map(|clock| clock.cycles_to_ns(cycles))
            .unwrap_or_else(|| i64::try_from(cycles).unwrap_or(i64::MAX))
    }
}

fn resolve_stream<'m>(
    metadata: &'m Metadata,
    header: Option<&StructValue>,
    byte_offset: u64,
) -> PlaybackResult<&'m StreamDescriptor> {
    match header.and_then(|h| h.find_integer("stream_id")) {
        Some(id) => metadata.stream(id.raw()).ok_or(PlaybackError::UnknownStream {
            stream_id: id.raw(),
            byte_offset,
        }),
        None => {
            let mut streams = metadata.streams.values();
            match (streams.next(), streams.next()) {
                (Some(only), None) => Ok(only),
                _ => Err(PlaybackError::AmbiguousStream {
                    streams: metadata.streams.len(),
                    byte_offset,
                }),
            }
        }
    }
}

fn integer_with_suffix<'v>(context: &'v StructValue, suffix: &str) -> Option<&'v IntegerValue> {
    context
        .fields()
        .filter(|(name, _)| name.ends_with(suffix))
        .find_map(|(_, value)| value.as_integer())
}

/// Widens a timestamp field of `bits` bits using the previous full value:
/// the high bits are carried over, and a smaller low part means the field
/// wrapped once.
pub fn extend_timestamp(previous: Option<u64>, raw: u64, bits: u32) -> u64 {
    let Some(previous) = previous else {
        return raw;
    };
    if bits >= 64 {
        return raw;
    }
    let mask = (1u64 << bits) - 1;
    let mut full = (previous & !mask) | (raw & mask);
    if full < previous {
        full = full.wrapping_add(mask + 1);
    }
    full
}
