#![no_main]

use h2_engine::{HeaderBlock, ServerConnection, StreamDecision, StreamId};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut conn = ServerConnection::new();
    conn.set_listener(Box::new(|_: StreamId, _: &HeaderBlock| {
        StreamDecision::Accept
    }));

    // Arbitrary wire input, fed in uneven slices so partial frames and
    // split header blocks are exercised. The connection must never
    // panic; protocol garbage surfaces as events and queued GOAWAY.
    for chunk in data.chunks(7) {
        conn.feed(chunk);
        let _ = conn.poll_events();
        conn.advance_send(conn.pending_send().len());
    }
});
