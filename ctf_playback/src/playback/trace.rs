//! Timestamp-ordered playback across all streams of a trace.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::{debug, warn};

use super::{
    source::ByteSource,
    stream::{Event, StreamPlayback},
};
use crate::{
    error::{PlaybackError, PlaybackResult},
    metadata::Metadata,
};

/// An event tagged with the index of the stream it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub stream: usize,
    pub event: Event,
}

/// Merge-sort playback over several streams using a min-heap keyed by
/// `(timestamp, stream index)`. Events without a timestamp sort first.
///
/// A stream that fails is reported once and then drops out of the merge,
/// unless corrupt packets are skipped.
pub struct TracePlayback<'m, S> {
    streams: Vec<StreamPlayback<'m, S>>,
    heads: Vec<Option<Event>>,
    heap: BinaryHeap<Reverse<(i64, usize)>>,
    primed: bool,
    skip_corrupt_packets: bool,
    deferred: Vec<PlaybackError>,
    cancel: Arc<AtomicBool>,
}

impl<'m, S: ByteSource> TracePlayback<'m, S> {
    pub fn new(streams: Vec<StreamPlayback<'m, S>>) -> Self {
        let heads = streams.iter().map(|_| None).collect();
        Self {
            streams,
            heads,
            heap: BinaryHeap::new(),
            primed: false,
            skip_corrupt_packets: false,
            deferred: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One [`StreamPlayback`] with default options per source.
    pub fn open(metadata: &'m Metadata, sources: impl IntoIterator<Item = S>) -> Self {
        Self::new(
            sources
                .into_iter()
                .map(|source| StreamPlayback::new(metadata, source))
                .collect(),
        )
    }

    /// On a playback error, skip to the stream's next packet instead of
    /// reporting it.
    pub fn skip_corrupt_packets(mut self, skip: bool) -> Self {
        self.skip_corrupt_packets = skip;
        self
    }

    /// Shares the cancellation flag with `cancel`, so another thread can
    /// stop playback between two events.
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn streams(&self) -> &[StreamPlayback<'m, S>] {
        &self.streams
    }

    /// Next event in timestamp order across all streams, or `None` once
    /// every stream is exhausted or playback was cancelled.
    pub fn next_event(&mut self) -> PlaybackResult<Option<StreamEvent>> {
        if self.is_cancelled() {
            debug!("trace playback cancelled");
            return Ok(None);
        }
        if !self.primed {
            self.primed = true;
            for stream in 0..self.streams.len() {
                if let Err(err) = self.advance(stream) {
                    warn!(stream, error = %err, "stream dropped out of playback");
                    self.deferred.push(err);
                }
            }
        }
        if let Some(err) = self.deferred.pop() {
            return Err(err);
        }

        let Some(Reverse((_, stream))) = self.heap.pop() else {
            return Ok(None);
        };
        let Some(event) = self.heads[stream].take() else {
            return Ok(None);
        };
        if let Err(err) = self.advance(stream) {
            warn!(stream, error = %err, "stream dropped out of playback");
            self.deferred.push(err);
        }
        Ok(Some(StreamEvent { stream, event }))
    }

    /// Reads the next event of `stream` into its heap slot.
    fn advance(&mut self, stream: usize) -> PlaybackResult<()> {
        let playback = &mut self.streams[stream];
        loop {
            match playback.next_event() {
                Ok(Some(event)) => {
                    let key = event.timestamp.unwrap_or(i64::MIN);
                    self.heads[stream] = Some(event);
                    self.heap.push(Reverse((key, stream)));
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Err(err) if self.skip_corrupt_packets => {
                    warn!(stream, error = %err, "skipping corrupt packet");
                    if let Err(skip_err) = playback.skip_packet() {
                        warn!(stream, error = %skip_err, "cannot resynchronize stream, abandoning it");
                        return Ok(());
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<S: ByteSource> Iterator for TracePlayback<'_, S> {
    type Item = PlaybackResult<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}
