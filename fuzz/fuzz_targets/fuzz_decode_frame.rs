#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The decoder must drop hostile frames, never panic or error out of
    // the channel. Exercise it with arbitrary (possibly invalid) UTF-8.
    if let Ok(raw) = std::str::from_utf8(data) {
        let _ = minerace_client::event::decode_frame(raw);
    }

    // Also exercise the raw envelope deserialization path (includes
    // serde_json's own error handling).
    let _ = serde_json::from_slice::<minerace_client::protocol::EventEnvelope>(data);
});
