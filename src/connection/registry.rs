//! Stream registry: admission policy and concurrency accounting.

use std::collections::HashMap;

use super::stream::{Stream, StreamError};
use super::{ConnectionError, Fault};
use crate::frame::StreamId;

/// Outcome of the admission checks for an incoming HEADERS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The stream is already registered; route the block to it.
    Existing,
    /// A new stream may be created, pending the listener's decision.
    New,
}

/// The connection's map from stream id to stream, plus the counters the
/// admission rules depend on.
///
/// Remote ids are admitted strictly increasing, so `highest_remote_id`
/// alone decides whether an unknown id is new or a replay of a closed
/// stream. Terminal streams stay registered until released so late reads
/// still work; they no longer count against the concurrency slot.
pub(crate) struct StreamRegistry {
    streams: HashMap<u32, Stream>,
    highest_remote_id: u32,
    active_remote: u32,
    max_concurrent_remote: u32,
}

impl StreamRegistry {
    pub fn new(max_concurrent_remote: u32) -> Self {
        Self {
            streams: HashMap::new(),
            highest_remote_id: 0,
            active_remote: 0,
            max_concurrent_remote,
        }
    }

    pub fn highest_remote_id(&self) -> StreamId {
        StreamId::new(self.highest_remote_id)
    }

    pub fn active_remote(&self) -> u32 {
        self.active_remote
    }

    /// Whether an id below the high-water mark names a stream we have no
    /// record of (and therefore treat as closed).
    pub fn is_forgotten(&self, id: StreamId) -> bool {
        id.value() <= self.highest_remote_id && !self.streams.contains_key(&id.value())
    }

    /// Run the admission checks for an incoming HEADERS on `id`.
    ///
    /// Rules, in order: stream 0 is connection-fatal; server-parity ids
    /// are reset as closed; known ids route to their stream; unknown ids
    /// at or below the high-water mark are closed; a full concurrency
    /// table refuses the stream. The listener's accept/refuse decision is
    /// the caller's to apply after `New`.
    pub fn admit(&mut self, id: StreamId) -> Result<Admission, Fault> {
        // The frame decoder already rejects HEADERS on stream 0, so this
        // is unreachable redundancy, kept so admit states its full rule
        // ordering on its own.
        if id.is_connection() {
            return Err(Fault::Connection(ConnectionError::protocol(
                "HEADERS on stream 0",
            )));
        }
        if !id.is_client_initiated() {
            // Strictly a connection error, but we cannot prove the id was
            // never used, so degrade to a stream-level reset.
            return Err(Fault::Stream(StreamError::closed(id)));
        }
        if self.streams.contains_key(&id.value()) {
            return Ok(Admission::Existing);
        }
        if id.value() <= self.highest_remote_id {
            return Err(Fault::Stream(StreamError::closed(id)));
        }
        if self.active_remote >= self.max_concurrent_remote {
            return Err(Fault::Stream(StreamError::refused(id)));
        }
        Ok(Admission::New)
    }

    /// Register an accepted stream and advance the high-water mark.
    pub fn insert(&mut self, stream: Stream) {
        debug_assert!(stream.id().value() > self.highest_remote_id);
        self.highest_remote_id = stream.id().value();
        if stream.occupies_slot() {
            self.active_remote += 1;
        }
        self.streams.insert(stream.id().value(), stream);
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id.value())
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id.value())
    }

    /// Mutate a stream with slot accounting: if the mutation moves the
    /// stream out of the slot-occupying states, the active count drops.
    pub fn apply<R>(&mut self, id: StreamId, f: impl FnOnce(&mut Stream) -> R) -> Option<R> {
        let stream = self.streams.get_mut(&id.value())?;
        let occupied = stream.occupies_slot();
        let result = f(stream);
        if occupied && !stream.occupies_slot() {
            self.active_remote = self.active_remote.saturating_sub(1);
        }
        Some(result)
    }

    /// Drop a stream's registry entry. The application calls this once it
    /// is done with a terminal stream; ids are monotonic, so the entry
    /// can never be confused with a future stream.
    pub fn release(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.remove(&id.value())
            && stream.occupies_slot()
        {
            self.active_remote = self.active_remote.saturating_sub(1);
        }
    }

    /// Ids of every stream currently holding a concurrency slot.
    pub fn slot_holders(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self
            .streams
            .values()
            .filter(|s| s.occupies_slot())
            .map(|s| s.id())
            .collect();
        ids.sort();
        ids
    }

    pub fn streams_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ErrorCode;
    use crate::hpack::HeaderField;

    fn registry(max: u32) -> StreamRegistry {
        StreamRegistry::new(max)
    }

    fn admitted(reg: &mut StreamRegistry, id: u32) {
        assert_eq!(reg.admit(StreamId::new(id)).unwrap(), Admission::New);
        let mut stream = Stream::idle(StreamId::new(id), 65_535, 65_535);
        stream
            .recv_headers(vec![HeaderField::new(":method", "GET")], false)
            .unwrap();
        reg.insert(stream);
    }

    #[test]
    fn stream_zero_is_connection_fatal() {
        let mut reg = registry(10);
        match reg.admit(StreamId::CONNECTION) {
            Err(Fault::Connection(e)) => assert_eq!(e.code(), ErrorCode::ProtocolError),
            other => panic!("expected connection fault, got {:?}", other),
        }
    }

    #[test]
    fn even_id_reset_as_closed() {
        let mut reg = registry(10);
        match reg.admit(StreamId::new(2)) {
            Err(Fault::Stream(e)) => {
                assert_eq!(e.stream_id.value(), 2);
                assert_eq!(e.code, ErrorCode::StreamClosed);
            }
            other => panic!("expected stream fault, got {:?}", other),
        }
    }

    #[test]
    fn known_id_routes_to_existing() {
        let mut reg = registry(10);
        admitted(&mut reg, 1);
        assert_eq!(reg.admit(StreamId::new(1)).unwrap(), Admission::Existing);
    }

    #[test]
    fn descending_unknown_id_is_closed() {
        let mut reg = registry(10);
        admitted(&mut reg, 33);
        match reg.admit(StreamId::new(31)) {
            Err(Fault::Stream(e)) => assert_eq!(e.code, ErrorCode::StreamClosed),
            other => panic!("expected stream fault, got {:?}", other),
        }
        // The established stream is untouched.
        assert!(reg.get(StreamId::new(33)).is_some());
    }

    #[test]
    fn concurrency_ceiling_refuses() {
        let mut reg = registry(2);
        admitted(&mut reg, 1);
        admitted(&mut reg, 3);
        assert_eq!(reg.active_remote(), 2);

        match reg.admit(StreamId::new(5)) {
            Err(Fault::Stream(e)) => assert_eq!(e.code, ErrorCode::RefusedStream),
            other => panic!("expected refusal, got {:?}", other),
        }
    }

    #[test]
    fn slot_freed_by_terminal_transition() {
        let mut reg = registry(2);
        admitted(&mut reg, 1);
        admitted(&mut reg, 3);

        reg.apply(StreamId::new(3), |s| s.recv_reset()).unwrap();
        assert_eq!(reg.active_remote(), 1);

        // Room again; higher id admissible.
        assert_eq!(reg.admit(StreamId::new(5)).unwrap(), Admission::New);
        // Reset stream stays registered until released.
        assert!(reg.get(StreamId::new(3)).is_some());
    }

    #[test]
    fn release_drops_entry() {
        let mut reg = registry(2);
        admitted(&mut reg, 1);
        reg.apply(StreamId::new(1), |s| s.recv_reset()).unwrap();
        reg.release(StreamId::new(1));
        assert!(reg.get(StreamId::new(1)).is_none());
        // Below the high-water mark, the id now reads as forgotten.
        assert!(reg.is_forgotten(StreamId::new(1)));
    }

    #[test]
    fn highest_id_tracks_admissions() {
        let mut reg = registry(10);
        assert_eq!(reg.highest_remote_id().value(), 0);
        admitted(&mut reg, 5);
        admitted(&mut reg, 9);
        assert_eq!(reg.highest_remote_id().value(), 9);
    }

    #[test]
    fn slot_holders_sorted() {
        let mut reg = registry(10);
        admitted(&mut reg, 5);
        admitted(&mut reg, 7);
        admitted(&mut reg, 9);

        let ids: Vec<u32> = reg.slot_holders().iter().map(|id| id.value()).collect();
        assert_eq!(ids, vec![5, 7, 9]);
    }
}
