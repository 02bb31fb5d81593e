//! Bit-addressed reader over one event stream.
//!
//! Positions are absolute bit offsets into the stream. Alignment is computed
//! relative to the start of the current packet, and every read is bounded by
//! the current limit (the packet's content end).

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

use crate::{
    error::{PlaybackError, PlaybackResult},
    types::ByteOrder,
};

/// Position of a cursor detached from its data, so an owner of the bytes
/// can park a cursor between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorState {
    pub packet_start: u64,
    pub position: u64,
    pub limit: u64,
}

#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    data: &'a [u8],
    packet_start: u64,
    position: u64,
    limit: u64,
}

impl<'a> BitCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            packet_start: 0,
            position: 0,
            limit: data.len() as u64 * 8,
        }
    }

    /// Rebuilds a cursor parked with [`state`](Self::state).
    pub fn resume(data: &'a [u8], state: CursorState) -> Self {
        let stream_bits = data.len() as u64 * 8;
        Self {
            data,
            packet_start: state.packet_start.min(stream_bits),
            position: state.position.min(stream_bits),
            limit: state.limit.min(stream_bits),
        }
    }

    pub fn state(&self) -> CursorState {
        CursorState {
            packet_start: self.packet_start,
            position: self.position,
            limit: self.limit,
        }
    }

    /// Moves to a new packet starting at `byte_offset`, bounded by the end
    /// of the stream until [`set_limit`](Self::set_limit) narrows it.
    pub fn start_packet(&mut self, byte_offset: u64) {
        self.packet_start = byte_offset * 8;
        self.position = self.packet_start;
        self.limit = self.stream_bits();
    }

    /// Bounds reads at `packet_bits` bits past the packet start, clamped to
    /// the end of the stream.
    pub fn set_limit(&mut self, packet_bits: u64) {
        self.limit = self
            .packet_start
            .saturating_add(packet_bits)
            .min(self.stream_bits());
    }

    pub fn stream_bits(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn byte_offset(&self) -> u64 {
        self.position / 8
    }

    pub fn packet_start_byte(&self) -> u64 {
        self.packet_start / 8
    }

    /// Bits consumed since the packet start.
    pub fn packet_position(&self) -> u64 {
        self.position - self.packet_start
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn at_limit(&self) -> bool {
        self.position >= self.limit
    }

    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    /// Advances to the next multiple of `alignment` bits relative to the
    /// packet start. Alignments of 0 or 1 are no-ops.
    pub fn align(&mut self, alignment: u32) {
        let alignment = u64::from(alignment);
        if alignment <= 1 {
            return;
        }
        let offset = self.packet_position() % alignment;
        if offset != 0 {
            self.position += alignment - offset;
        }
    }

    fn ensure<F>(&self, bits: u64, field: F) -> PlaybackResult<()>
    where
        F: FnOnce() -> String,
    {
        if self.position.saturating_add(bits) > self.limit {
            return Err(PlaybackError::Overrun {
                field: field(),
                bits,
                byte_offset: self.byte_offset(),
                bit_offset: self.position,
                limit_byte: self.limit.div_ceil(8),
            });
        }
        Ok(())
    }

    /// Reads `count` bits (at most 64) without aligning first. Signed
    /// values come back sign-extended to 64 bits.
    pub fn read_bits<F>(
        &mut self,
        count: u32,
        signed: bool,
        byte_order: ByteOrder,
        field: F,
    ) -> PlaybackResult<u64>
    where
        F: FnOnce() -> String,
    {
        debug_assert!(count <= 64);
        if count == 0 {
            return Ok(0);
        }
        self.ensure(u64::from(count), field)?;

        let raw = if self.position % 8 == 0 && count % 8 == 0 {
            let start = (self.position / 8) as usize;
            let bytes = &self.data[start..start + (count / 8) as usize];
            match byte_order {
                ByteOrder::Little => LittleEndian::read_uint(bytes, bytes.len()),
                ByteOrder::Big => BigEndian::read_uint(bytes, bytes.len()),
            }
        } else {
            self.read_unaligned(count, byte_order)
        };
        self.position += u64::from(count);

        Ok(if signed { sign_extend(raw, count) } else { raw })
    }

    fn read_unaligned(&self, count: u32, byte_order: ByteOrder) -> u64 {
        let mut value = 0u64;
        for i in 0..u64::from(count) {
            let bit = self.position + i;
            let byte = self.data[(bit / 8) as usize];
            match byte_order {
                // Little endian fills each byte from its least significant bit.
                ByteOrder::Little => {
                    let set = (byte >> (bit % 8)) & 1;
                    value |= u64::from(set) << i;
                }
                ByteOrder::Big => {
                    let set = (byte >> (7 - bit % 8)) & 1;
                    value = (value << 1) | u64::from(set);
                }
            }
        }
        value
    }

    /// Reads `len` whole bytes. The cursor must be byte aligned.
    pub fn read_bytes<F>(&mut self, len: u64, field: F) -> PlaybackResult<&'a [u8]>
    where
        F: FnOnce() -> String,
    {
        debug_assert_eq!(self.position % 8, 0);
        self.ensure(len.saturating_mul(8), field)?;
        let start = (self.position / 8) as usize;
        self.position += len * 8;
        Ok(&self.data[start..start + len as usize])
    }

    /// Reads a NUL-terminated byte string, consuming the terminator. A string
    /// cut off by the limit ends there.
    pub fn read_cstring<F>(&mut self, field: F) -> PlaybackResult<&'a [u8]>
    where
        F: FnOnce() -> String,
    {
        debug_assert_eq!(self.position % 8, 0);
        self.ensure(8, field)?;
        let start = (self.position / 8) as usize;
        let end = (self.limit / 8) as usize;
        let window = &self.data[start..end];
        match window.iter().position(|&b| b == 0) {
            Some(nul) => {
                self.position += (nul as u64 + 1) * 8;
                Ok(&window[..nul])
            }
            None => {
                self.position = end as u64 * 8;
                Ok(window)
            }
        }
    }
}

fn sign_extend(raw: u64, count: u32) -> u64 {
    if count >= 64 {
        return raw;
    }
    let sign = 1u64 << (count - 1);
    if raw & sign != 0 {
        raw | !((1u64 << count) - 1)
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use proptest::prelude::*;

    fn name() -> String {
        "test.field".to_string()
    }

    #[test]
    fn test_read_bits__aligned_little_endian__then_value() {
        let data = [0x01, 0x00, 0x00, 0x00];
        let mut cursor = BitCursor::new(&data);
        assert_eq!(cursor.read_bits(32, false, ByteOrder::Little, name).unwrap(), 1);
        assert!(cursor.at_limit());
    }

    #[test]
    fn test_read_bits__aligned_big_endian__then_value() {
        let data = [0x12, 0x34];
        let mut cursor = BitCursor::new(&data);
        assert_eq!(cursor.read_bits(16, false, ByteOrder::Big, name).unwrap(), 0x1234);
    }

    #[test]
    fn test_read_bits__little_endian_bitfields__then_lsb_first() {
        // 0b1010_1101: low 3 bits = 0b101, next 5 bits = 0b10101
        let data = [0b1010_1101];
        let mut cursor = BitCursor::new(&data);
        assert_eq!(cursor.read_bits(3, false, ByteOrder::Little, name).unwrap(), 0b101);
        assert_eq!(cursor.read_bits(5, false, ByteOrder::Little, name).unwrap(), 0b10101);
    }

    #[test]
    fn test_read_bits__big_endian_bitfields__then_msb_first() {
        let data = [0b1010_1101];
        let mut cursor = BitCursor::new(&data);
        assert_eq!(cursor.read_bits(3, false, ByteOrder::Big, name).unwrap(), 0b101);
        assert_eq!(cursor.read_bits(5, false, ByteOrder::Big, name).unwrap(), 0b01101);
    }

    #[test]
    fn test_read_bits__signed_narrow__then_sign_extended() {
        let data = [0b0000_0110];
        let mut cursor = BitCursor::new(&data);
        // low 3 bits 0b110 = -2 in 3-bit two's complement
        let raw = cursor.read_bits(3, true, ByteOrder::Little, name).unwrap();
        assert_eq!(raw as i64, -2);
    }

    #[test]
    fn test_read_bits__past_limit__then_overrun_with_offsets() {
        let data = [0u8; 4];
        let mut cursor = BitCursor::new(&data);
        cursor.set_limit(16);
        cursor.read_bits(8, false, ByteOrder::Little, name).unwrap();
        let err = cursor.read_bits(16, false, ByteOrder::Little, name).unwrap_err();
        match err {
            PlaybackError::Overrun {
                field,
                byte_offset,
                limit_byte,
                ..
            } => {
                assert_eq!(field, "test.field");
                assert_eq!(byte_offset, 1);
                assert_eq!(limit_byte, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_align__relative_to_packet_start__then_not_stream_start() {
        let data = [0u8; 32];
        let mut cursor = BitCursor::new(&data);
        cursor.start_packet(3);
        cursor.read_bits(8, false, ByteOrder::Little, name).unwrap();
        cursor.align(32);
        assert_eq!(cursor.packet_position(), 32);
        assert_eq!(cursor.byte_offset(), 7);
    }

    #[test]
    fn test_resume__parked_state__then_continues_where_left() {
        let data = [0x11, 0x22, 0x33, 0x44];
        let mut cursor = BitCursor::new(&data);
        cursor.start_packet(1);
        cursor.set_limit(16);
        cursor.read_bits(8, false, ByteOrder::Little, name).unwrap();
        let state = cursor.state();

        let mut resumed = BitCursor::resume(&data, state);
        assert_eq!(resumed.read_bits(8, false, ByteOrder::Little, name).unwrap(), 0x33);
        assert!(resumed.at_limit());
        assert_eq!(resumed.packet_start_byte(), 1);
    }

    #[test]
    fn test_read_cstring__terminated__then_consumes_nul() {
        let data = b"hi\0x";
        let mut cursor = BitCursor::new(data);
        assert_eq!(cursor.read_cstring(name).unwrap(), b"hi");
        assert_eq!(cursor.byte_offset(), 3);
    }

    #[test]
    fn test_read_cstring__unterminated__then_stops_at_limit() {
        let data = b"abcdef";
        let mut cursor = BitCursor::new(data);
        cursor.set_limit(32);
        assert_eq!(cursor.read_cstring(name).unwrap(), b"abcd");
        assert!(cursor.at_limit());
    }

    proptest! {
        #[test]
        fn prop_align__then_multiple_of_alignment(
            packet_start in 0u64..64,
            advance in 0u64..512,
            shift in 0u32..7,
        ) {
            let data = [0u8; 256];
            let mut cursor = BitCursor::new(&data);
            cursor.start_packet(packet_start);
            cursor.seek(packet_start * 8 + advance);
            let alignment = 1u32 << shift;
            let before = cursor.packet_position();
            cursor.align(alignment);
            prop_assert_eq!(cursor.packet_position() % u64::from(alignment), 0);
            prop_assert!(cursor.packet_position() - before < u64::from(alignment));
        }

        #[test]
        fn prop_read_bits__then_matches_reference(
            bytes in proptest::array::uniform16(any::<u8>()),
            offset in 0u32..64,
            count in 1u32..=64,
        ) {
            let mask = if count == 64 { u128::from(u64::MAX) } else { (1u128 << count) - 1 };

            let mut cursor = BitCursor::new(&bytes);
            cursor.seek(u64::from(offset));
            let little = cursor.read_bits(count, false, ByteOrder::Little, name).unwrap();
            let expected = (u128::from_le_bytes(bytes) >> offset) & mask;
            prop_assert_eq!(u128::from(little), expected);

            let mut cursor = BitCursor::new(&bytes);
            cursor.seek(u64::from(offset));
            let big = cursor.read_bits(count, false, ByteOrder::Big, name).unwrap();
            let expected = (u128::from_be_bytes(bytes) >> (128 - offset - count)) & mask;
            prop_assert_eq!(u128::from(big), expected);
        }
    }
}
