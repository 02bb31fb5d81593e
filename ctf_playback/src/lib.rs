//! Common Trace Format playback: compiles trace metadata into a resolved
//! type model and decodes binary event streams against it.

pub mod app;
pub mod cursor;
pub mod decoder;
pub mod error;
pub mod expr;
pub mod metadata;
pub mod playback;
pub mod types;
pub mod value;

pub use error::{CtfError, MetadataError, PlaybackError, Result};
pub use metadata::{packetized::metadata_text, Metadata};
pub use playback::{
    ByteSource, Event, MappedFile, Packet, PacketAnomaly, PlaybackCustomization, PlaybackOptions,
    StreamPlayback, TracePlayback,
};
pub use value::{FieldValue, IntegerValue, StructValue};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_metadata_is_shareable_across_threads() {
        assert_send_sync::<Metadata>();
        assert_send_sync::<StreamPlayback<'static, MappedFile>>();
    }
}
