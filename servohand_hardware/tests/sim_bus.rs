use std::time::Duration;

use servohand_hardware::simulated_hand;
use servohand_traits::Transport;

fn packet(id: u8, instruction: u8, params: &[u8]) -> Vec<u8> {
    let len = (params.len() + 2) as u8;
    let mut body = vec![id, len, instruction];
    body.extend_from_slice(params);
    let sum = body.iter().fold(0u8, |a, b| a.wrapping_add(*b));
    let mut p = vec![0xFF, 0xFF];
    p.extend(body);
    p.push(!sum);
    p
}

#[test]
fn goal_write_moves_present_position_when_torque_on() {
    let (mut bus, handle) = simulated_hand();
    bus.write(&packet(2, 0x03, &[40, 1])).unwrap();
    bus.write(&packet(2, 0x03, &[42, 0xE8, 0x03])).unwrap();
    assert_eq!(handle.present_position(2), Some(1000));
}

#[test]
fn goal_write_with_torque_off_leaves_joint_where_it_is() {
    let (mut bus, handle) = simulated_hand();
    handle.set_present_position(2, 77);
    bus.write(&packet(2, 0x03, &[42, 0xE8, 0x03])).unwrap();
    assert_eq!(handle.present_position(2), Some(77));
    assert_eq!(handle.register_word(2, 42), Some(1000));
}

#[test]
fn sync_write_updates_each_listed_servo() {
    let (mut bus, handle) = simulated_hand();
    // start=42, len=2, then (id, lo, hi) per servo
    let params = [42, 2, 1, 0x10, 0x00, 4, 0x20, 0x80];
    bus.write(&packet(0xFE, 0x83, &params)).unwrap();
    assert_eq!(handle.register_word(1, 42), Some(16));
    assert_eq!(handle.register_word(4, 42), Some(-32));
    assert_eq!(handle.packets_to(1), 1);
    assert_eq!(handle.packets_to(2), 0);
}

#[test]
fn scripted_positions_are_consumed_in_order() {
    let (mut bus, handle) = simulated_hand();
    handle.script_positions(7, [10, -20]);
    let mut seen = Vec::new();
    for _ in 0..3 {
        bus.write(&packet(7, 0x02, &[56, 2])).unwrap();
        let mut buf = [0u8; 8];
        bus.read(&mut buf, Duration::from_millis(5)).unwrap();
        seen.push(buf[5]);
    }
    assert_eq!(seen, vec![10, 20, 20]);
}

#[test]
fn corrupted_reply_fails_checksum() {
    let (mut bus, handle) = simulated_hand();
    handle.corrupt_next_replies(1);
    bus.write(&packet(1, 0x02, &[62, 1])).unwrap();
    let mut buf = [0u8; 7];
    bus.read(&mut buf, Duration::from_millis(5)).unwrap();
    let sum = buf[2..6].iter().fold(0u8, |a, b| a.wrapping_add(*b));
    assert_ne!(!sum, buf[6]);
}
