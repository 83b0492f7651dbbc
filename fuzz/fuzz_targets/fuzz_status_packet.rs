#![no_main]
use libfuzzer_sys::fuzz_target;
use servohand_core::protocol::{checksum, parse_status};

fuzz_target!(|input: (u8, u8, &[u8])| {
    let (expected_id, data_len, buf) = input;
    let data_len = usize::from(data_len % 8);
    if let Ok(status) = parse_status(buf, expected_id, data_len) {
        // Anything accepted must be a well-formed reply from the expected servo.
        assert_eq!(status.id, expected_id);
        assert_eq!(status.data.len(), data_len);
        let end = 6 + data_len;
        assert_eq!(checksum(&buf[2..end - 1]), buf[end - 1]);
    }
});
