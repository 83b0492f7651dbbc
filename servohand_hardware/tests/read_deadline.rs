use std::time::{Duration, Instant};

use rstest::rstest;
use servohand_hardware::error::HwError;
use servohand_hardware::util::read_with_deadline;

#[test]
fn fills_buffer_across_partial_reads() {
    let source = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let mut pos = 0;
    let mut buf = [0u8; 8];
    let n = read_with_deadline(
        |chunk| {
            // hand out at most three bytes per call
            let take = chunk.len().min(3).min(source.len() - pos);
            chunk[..take].copy_from_slice(&source[pos..pos + take]);
            pos += take;
            Ok(take)
        },
        &mut buf,
        Duration::from_millis(50),
        Duration::from_micros(100),
    )
    .expect("full read");
    assert_eq!(n, 8);
    assert_eq!(buf, source);
}

#[test]
fn empty_line_times_out() {
    let start = Instant::now();
    let mut buf = [0u8; 4];
    let err = read_with_deadline(
        |_| Ok(0),
        &mut buf,
        Duration::from_millis(5),
        Duration::from_micros(200),
    )
    .expect_err("expected timeout error");
    assert!(matches!(err, HwError::Timeout), "unexpected error: {err:?}");
    assert!(start.elapsed() >= Duration::from_millis(5));
}

#[rstest]
#[case(std::io::ErrorKind::TimedOut)]
#[case(std::io::ErrorKind::WouldBlock)]
fn transient_errors_are_retried_until_short_read(#[case] kind: std::io::ErrorKind) {
    let mut calls = 0;
    let mut buf = [0u8; 4];
    let n = read_with_deadline(
        |chunk| {
            calls += 1;
            if calls == 1 {
                chunk[0] = 0xAA;
                Ok(1)
            } else {
                Err(std::io::Error::from(kind))
            }
        },
        &mut buf,
        Duration::from_millis(5),
        Duration::from_micros(200),
    )
    .expect("short read is not an error");
    assert_eq!(n, 1);
    assert_eq!(buf[0], 0xAA);
}

#[test]
fn hard_io_error_is_surfaced() {
    let mut buf = [0u8; 4];
    let err = read_with_deadline(
        |_| Err(std::io::Error::other("unplugged")),
        &mut buf,
        Duration::from_millis(5),
        Duration::from_micros(200),
    )
    .expect_err("io error");
    assert!(matches!(err, HwError::Io(_)));
}
