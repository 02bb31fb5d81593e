//! Packetized metadata stream framing.
//!
//! A metadata file is either plain TSDL text or a sequence of packets, each
//! carrying a fixed 37-byte header followed by a slice of the text. The
//! header byte order is detected from the magic number.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use tracing::debug;

use crate::error::{MetadataError, MetadataResult};

pub const METADATA_MAGIC: u32 = 0x75D1_1D57;
pub const HEADER_LEN: usize = 37;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub uuid: [u8; 16],
    pub checksum: u32,
    /// In bits, header included.
    pub content_size: u32,
    /// In bits, header and padding included.
    pub packet_size: u32,
    pub compression_scheme: u8,
    pub encryption_scheme: u8,
    pub checksum_scheme: u8,
    pub major: u8,
    pub minor: u8,
}

impl PacketHeader {
    fn parse<B: byteorder::ByteOrder>(bytes: &[u8]) -> Self {
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[4..20]);
        Self {
            uuid,
            checksum: B::read_u32(&bytes[20..24]),
            content_size: B::read_u32(&bytes[24..28]),
            packet_size: B::read_u32(&bytes[28..32]),
            compression_scheme: bytes[32],
            encryption_scheme: bytes[33],
            checksum_scheme: bytes[34],
            major: bytes[35],
            minor: bytes[36],
        }
    }
}

pub fn is_packetized(bytes: &[u8]) -> bool {
    bytes.len() >= 4
        && (LittleEndian::read_u32(&bytes[..4]) == METADATA_MAGIC
            || BigEndian::read_u32(&bytes[..4]) == METADATA_MAGIC)
}

/// Returns the metadata text, concatenating packet payloads when the input
/// is packetized and passing plain text through.
///
/// This is where a TSDL grammar front end starts: it reads the raw
/// `metadata` file, hands the bytes to this function, parses the returned
/// text into an [`ast::Metadata`](super::ast::Metadata) and then calls
/// [`Metadata::compile`](super::Metadata::compile). `ctf-dump` takes an
/// already parsed tree and does not call it.
pub fn metadata_text(bytes: &[u8]) -> MetadataResult<String> {
    if !is_packetized(bytes) {
        return String::from_utf8(bytes.to_vec())
            .map_err(|err| MetadataError::packetized(err.utf8_error().valid_up_to(), "metadata text is not UTF-8"));
    }

    let mut text = Vec::with_capacity(bytes.len());
    let mut offset = 0usize;
    let mut packets = 0usize;
    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < HEADER_LEN {
            return Err(MetadataError::packetized(offset, "truncated packet header"));
        }
        let header = if LittleEndian::read_u32(&rest[..4]) == METADATA_MAGIC {
            PacketHeader::parse::<LittleEndian>(rest)
        } else if BigEndian::read_u32(&rest[..4]) == METADATA_MAGIC {
            PacketHeader::parse::<BigEndian>(rest)
        } else {
            return Err(MetadataError::packetized(offset, "bad packet magic"));
        };

        if header.compression_scheme != 0 || header.encryption_scheme != 0 {
            return Err(MetadataError::packetized(
                offset,
                "compressed or encrypted metadata packets are not supported",
            ));
        }
        if header.content_size % 8 != 0 || header.packet_size % 8 != 0 {
            return Err(MetadataError::packetized(offset, "packet sizes are not byte multiples"));
        }
        let content_len = (header.content_size / 8) as usize;
        let packet_len = (header.packet_size / 8) as usize;
        if content_len < HEADER_LEN || packet_len < content_len {
            return Err(MetadataError::packetized(offset, "content size out of range"));
        }
        if packet_len > rest.len() {
            return Err(MetadataError::packetized(offset, "packet extends past end of file"));
        }

        text.extend_from_slice(&rest[HEADER_LEN..content_len]);
        offset += packet_len;
        packets += 1;
    }
    debug!(packets, bytes = text.len(), "reassembled packetized metadata");

    String::from_utf8(text)
        .map_err(|err| MetadataError::packetized(err.utf8_error().valid_up_to(), "metadata text is not UTF-8"))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn packet(payload: &str, padding: usize, big_endian: bool) -> Vec<u8> {
        let content = (HEADER_LEN + payload.len()) as u32 * 8;
        let total = content + padding as u32 * 8;
        let mut out = Vec::new();
        let push = |out: &mut Vec<u8>, value: u32| {
            if big_endian {
                out.extend_from_slice(&value.to_be_bytes());
            } else {
                out.extend_from_slice(&value.to_le_bytes());
            }
        };
        push(&mut out, METADATA_MAGIC);
        out.extend_from_slice(&[0xAB; 16]);
        push(&mut out, 0);
        push(&mut out, content);
        push(&mut out, total);
        out.extend_from_slice(&[0, 0, 0, 1, 8]);
        out.extend_from_slice(payload.as_bytes());
        out.resize(out.len() + padding, 0);
        out
    }

    #[test]
    fn test_metadata_text__plain_text__then_passthrough() {
        let text = "/* CTF 1.8 */ trace { major = 1; };";
        assert_eq!(metadata_text(text.as_bytes()).unwrap(), text);
    }

    #[test]
    fn test_metadata_text__two_packets_mixed_order__then_concatenated() {
        let mut bytes = packet("trace { ", 3, false);
        bytes.extend(packet("major = 1; };", 0, true));
        assert_eq!(metadata_text(&bytes).unwrap(), "trace { major = 1; };");
    }

    #[test]
    fn test_metadata_text__compressed__then_rejected() {
        let mut bytes = packet("x", 0, false);
        bytes[32] = 1;
        assert!(matches!(
            metadata_text(&bytes),
            Err(MetadataError::Packetized { offset: 0, .. })
        ));
    }

    #[test]
    fn test_metadata_text__truncated_second_packet__then_error_at_offset() {
        let first = packet("abc", 0, false);
        let mut bytes = first.clone();
        bytes.extend_from_slice(&packet("def", 0, false)[..10]);
        match metadata_text(&bytes) {
            Err(MetadataError::Packetized { offset, .. }) => assert_eq!(offset, first.len()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_is_packetized__text__then_false() {
        assert!(!is_packetized(b"/* CTF"));
        assert!(is_packetized(&packet("", 0, true)));
    }
}
