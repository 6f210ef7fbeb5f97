#![no_main]

use bytes::BytesMut;
use h2_engine::{Frame, FrameDecoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let decoder = FrameDecoder::new();
    let mut buf = BytesMut::from(data);

    // Decode frames until the input runs dry or fails to parse; every
    // decoded frame must be fully walkable without panicking.
    loop {
        match decoder.decode(&mut buf) {
            Ok(Some(frame)) => {
                let _ = frame.stream_id();
                match frame {
                    Frame::Data(f) => {
                        assert!(f.flow_len as usize >= f.data.len());
                    }
                    Frame::Headers(f) => {
                        let _ = (f.end_stream, f.end_headers, f.priority, f.fragment);
                    }
                    Frame::Priority(f) => {
                        let _ = (f.priority.exclusive, f.priority.dependency, f.priority.weight);
                    }
                    Frame::RstStream(f) => {
                        let _ = f.error_code;
                    }
                    Frame::Settings(f) => {
                        for setting in &f.settings {
                            let _ = (setting.id, setting.value);
                        }
                    }
                    Frame::PushPromise(f) => {
                        let _ = (f.promised_stream_id, f.fragment);
                    }
                    Frame::Ping(f) => {
                        let _ = (f.ack, f.data);
                    }
                    Frame::GoAway(f) => {
                        let _ = (f.last_stream_id, f.error_code, f.debug_data);
                    }
                    Frame::WindowUpdate(f) => {
                        assert!(f.increment > 0);
                    }
                    Frame::Continuation(f) => {
                        let _ = (f.end_headers, f.fragment);
                    }
                    Frame::Unknown(f) => {
                        let _ = (f.frame_type, f.flags, f.payload);
                    }
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
});
