#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Exercise the raw-byte decode path (includes serde_json's own UTF-8
    // validation and error handling for invalid sequences).
    let _ = serde_json::from_slice::<bingo_channel_client::ChannelMessage>(data);

    // Also exercise the str-based path the channel uses for text frames.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<bingo_channel_client::ChannelMessage>(s);
    }
});
