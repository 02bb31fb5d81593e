#![allow(dead_code)]

//! Fixtures shared by the integration tests: an LTTng-shaped trace layout
//! and helpers that lay out matching little-endian packets.

use byteorder::{LittleEndian, WriteBytesExt};
use ctf_playback::metadata::ast::{
    self, typealias, ArrayDimension, BlockEntry, Declaration, Enumerator, StructEntry,
    TypeSpecifier,
};
use ctf_playback::Metadata;

pub const TRACE_UUID: &str = "2a6422d0-6cee-11e0-8c08-cb07d7b3a564";
pub const TRACE_UUID_BYTES: [u8; 16] = [
    0x2a, 0x64, 0x22, 0xd0, 0x6c, 0xee, 0x11, 0xe0, 0x8c, 0x08, 0xcb, 0x07, 0xd7, 0xb3, 0xa5, 0x64,
];
pub const MAGIC: u32 = 0xC1FC_1FC1;
pub const TICK_ID: u8 = 1;
pub const BIG_ID: u32 = 40;
pub const CLOCK_FREQ: u64 = 1_000_000;
/// Trace packet header plus stream packet context, in bytes.
pub const PACKET_PREAMBLE: usize = 24 + 36;

fn uint(size: u64) -> TypeSpecifier {
    TypeSpecifier::integer(&[
        ("size", size.into()),
        ("align", 8u64.into()),
        ("signed", "false".into()),
    ])
}

fn clock_mapped(size: u64, align: u64) -> TypeSpecifier {
    TypeSpecifier::integer(&[
        ("size", size.into()),
        ("align", align.into()),
        ("signed", "false".into()),
        ("map", "clock.monotonic.value".into()),
    ])
}

/// Trace with a checked packet header, one stream with a timestamped
/// packet context and a compact/extended event header, and two events:
/// `tick` (id 1, `uint16 n`) and `big` (id 40, `uint32 value`).
pub fn lttng_like_tree() -> ast::Metadata {
    let packet_header = TypeSpecifier::anonymous_struct(vec![
        StructEntry::field(TypeSpecifier::named("uint32_t"), "magic"),
        StructEntry::array(
            TypeSpecifier::named("uint8_t"),
            "uuid",
            vec![ArrayDimension::Fixed(16)],
        ),
        StructEntry::field(TypeSpecifier::named("uint32_t"), "stream_id"),
    ]);
    let packet_context = TypeSpecifier::anonymous_struct(vec![
        StructEntry::field(clock_mapped(64, 8), "timestamp_begin"),
        StructEntry::field(clock_mapped(64, 8), "timestamp_end"),
        StructEntry::field(TypeSpecifier::named("uint64_t"), "content_size"),
        StructEntry::field(TypeSpecifier::named("uint64_t"), "packet_size"),
        StructEntry::field(TypeSpecifier::named("uint32_t"), "events_discarded"),
    ]);
    let id_enum = TypeSpecifier::enumeration(
        TypeSpecifier::integer(&[("size", 5u64.into()), ("align", 1u64.into())]),
        vec![Enumerator::range("compact", 0, 30), Enumerator::value("extended", 31)],
    );
    let event_header = TypeSpecifier::anonymous_struct(vec![
        StructEntry::field(id_enum, "id"),
        StructEntry::field(
            TypeSpecifier::variant(
                "id",
                vec![
                    StructEntry::field(
                        TypeSpecifier::anonymous_struct(vec![StructEntry::field(
                            clock_mapped(27, 1),
                            "timestamp",
                        )]),
                        "compact",
                    ),
                    StructEntry::field(
                        TypeSpecifier::anonymous_struct(vec![
                            StructEntry::field(TypeSpecifier::named("uint32_t"), "id"),
                            StructEntry::field(clock_mapped(64, 8), "timestamp"),
                        ]),
                        "extended",
                    ),
                ],
            ),
            "v",
        ),
    ]);

    ast::Metadata {
        declarations: vec![
            typealias(uint(8), "uint8_t"),
            typealias(uint(16), "uint16_t"),
            typealias(uint(32), "uint32_t"),
            typealias(uint(64), "uint64_t"),
            Declaration::Trace(vec![
                BlockEntry::property("major", 1u64),
                BlockEntry::property("minor", 8u64),
                BlockEntry::string_property("uuid", TRACE_UUID),
                BlockEntry::property("byte_order", "le"),
                BlockEntry::assign("packet.header", packet_header),
            ]),
            Declaration::Env(vec![
                BlockEntry::string_property("hostname", "buildbox"),
                BlockEntry::property("tracer_major", 2u64),
            ]),
            Declaration::Clock(vec![
                BlockEntry::string_property("name", "monotonic"),
                BlockEntry::property("freq", CLOCK_FREQ),
                BlockEntry::property("offset_s", 0u64),
            ]),
            Declaration::Stream(vec![
                BlockEntry::property("id", 0u64),
                BlockEntry::assign("packet.context", packet_context),
                BlockEntry::assign("event.header", event_header),
            ]),
            Declaration::Event(vec![
                BlockEntry::string_property("name", "tick"),
                BlockEntry::property("id", u64::from(TICK_ID)),
                BlockEntry::property("stream_id", 0u64),
                BlockEntry::assign(
                    "fields",
                    TypeSpecifier::anonymous_struct(vec![StructEntry::field(
                        TypeSpecifier::named("uint16_t"),
                        "n",
                    )]),
                ),
            ]),
            Declaration::Event(vec![
                BlockEntry::string_property("name", "big"),
                BlockEntry::property("id", u64::from(BIG_ID)),
                BlockEntry::property("stream_id", 0u64),
                BlockEntry::property("loglevel", 4u64),
                BlockEntry::assign(
                    "fields",
                    TypeSpecifier::anonymous_struct(vec![StructEntry::field(
                        TypeSpecifier::named("uint32_t"),
                        "value",
                    )]),
                ),
            ]),
        ],
    }
}

pub fn lttng_like_metadata() -> Metadata {
    Metadata::compile(&lttng_like_tree()).expect("fixture metadata compiles")
}

/// Compact header (5-bit id, 27-bit timestamp) followed by a `tick` payload.
pub fn tick(timestamp_low: u32, n: u16) -> Vec<u8> {
    let mut out = Vec::new();
    let word = ((timestamp_low & 0x07FF_FFFF) << 5) | u32::from(TICK_ID);
    out.write_u32::<LittleEndian>(word).unwrap();
    out.write_u16::<LittleEndian>(n).unwrap();
    out
}

/// Extended header (escape id 31, 32-bit id, 64-bit timestamp) followed by
/// a `big` payload.
pub fn big(timestamp: u64, value: u32) -> Vec<u8> {
    let mut out = vec![31u8];
    out.write_u32::<LittleEndian>(BIG_ID).unwrap();
    out.write_u64::<LittleEndian>(timestamp).unwrap();
    out.write_u32::<LittleEndian>(value).unwrap();
    out
}

#[derive(Debug, Clone)]
pub struct PacketSpec {
    pub magic: u32,
    pub uuid: [u8; 16],
    pub stream_id: u32,
    pub begin: u64,
    pub end: u64,
    pub discarded: u32,
    pub padding: usize,
    /// Overrides the computed content size, in bits.
    pub content_bits: Option<u64>,
}

impl PacketSpec {
    pub fn new(begin: u64, end: u64) -> Self {
        Self {
            magic: MAGIC,
            uuid: TRACE_UUID_BYTES,
            stream_id: 0,
            begin,
            end,
            discarded: 0,
            padding: 0,
            content_bits: None,
        }
    }

    pub fn discarded(mut self, discarded: u32) -> Self {
        self.discarded = discarded;
        self
    }

    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// Lays out header, context, `events` and zero padding.
    pub fn build(&self, events: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = events.concat();
        let content_bits = ((PACKET_PREAMBLE + body.len()) * 8) as u64;
        let packet_bits = content_bits + (self.padding * 8) as u64;

        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(self.magic).unwrap();
        out.extend_from_slice(&self.uuid);
        out.write_u32::<LittleEndian>(self.stream_id).unwrap();
        out.write_u64::<LittleEndian>(self.begin).unwrap();
        out.write_u64::<LittleEndian>(self.end).unwrap();
        out.write_u64::<LittleEndian>(self.content_bits.unwrap_or(content_bits))
            .unwrap();
        out.write_u64::<LittleEndian>(packet_bits).unwrap();
        out.write_u32::<LittleEndian>(self.discarded).unwrap();
        assert_eq!(out.len(), PACKET_PREAMBLE);
        out.extend_from_slice(&body);
        out.resize(out.len() + self.padding, 0);
        out
    }
}
