use kilolink_rs::mac::IrTransmitter;
use kilolink_rs::phy::{DistanceMeasurement, Message, MessageType, PulseEncoder};
use kilolink_rs::robot::{
    Application, CalibrationProfile, Dispatch, Kilobot, MemoryEeprom, RecordingActuators,
    RobotState, buffered_link,
};
use kilolink_rs::sim::{SimAdc, light_for_distance};

#[derive(Default)]
struct Inbox(Vec<Message>);

impl Application for Inbox {
    fn receive(&mut self, msg: &Message, _distance: &DistanceMeasurement) {
        self.0.push(*msg);
    }

    fn produce_outbound(&mut self) -> Option<Message> {
        None
    }
}

struct Capture(Vec<(Message, u8)>);

impl IrTransmitter for Capture {
    fn send(&mut self, msg: &Message, tx_mask: u8) -> bool {
        self.0.push((*msg, tx_mask));
        true
    }
}

fn robot(profile: CalibrationProfile) -> Kilobot<SimAdc> {
    let mut eeprom = MemoryEeprom::new();
    profile.flash(&mut eeprom);
    Kilobot::init(SimAdc::new(1), RecordingActuators::new(), eeprom, 1)
}

fn feed<A: Application>(robot: &mut Kilobot<SimAdc>, app: &mut A, start: u64, pulses: &[u64]) -> Vec<Dispatch> {
    pulses
        .iter()
        .filter_map(|&t| robot.on_pulse(start + t, app))
        .collect()
}

#[test]
fn frame_over_the_air_reaches_buffered_application() {
    let profile = CalibrationProfile::default_profile(12);
    let mut rx = robot(profile);
    let (high, low) = light_for_distance(&profile.table(), 60.0);
    rx.adc_mut().set_light(high, low);

    let (mut link, handle) = buffered_link();
    let mut data = [0u8; 9];
    data[..4].copy_from_slice(b"ping");
    let msg = Message::new(MessageType::NORMAL, data);

    let dispatched = feed(&mut rx, &mut link, 1_000, &PulseEncoder::default().encode(&msg));
    assert_eq!(dispatched, vec![Dispatch::Delivered]);

    let (received, distance) = handle.pop_rx().expect("frame queued for the main loop");
    assert_eq!(received, msg);
    let estimate = rx.estimate_distance(&distance) as i32;
    assert!((estimate - 60).abs() <= 2, "estimated {estimate} mm");
}

#[test]
fn queued_frames_leave_in_order_when_running() {
    let mut tx = robot(CalibrationProfile::default_profile(3));
    let (mut link, handle) = buffered_link();
    let mut capture = Capture(Vec::new());

    tx.deliver(
        &Message::new_control(MessageType::Run, [0; 9]),
        &DistanceMeasurement::default(),
        &mut link,
    );
    tx.run_once(&mut link);
    assert_eq!(tx.state(), RobotState::Running);

    for i in 0..3u8 {
        assert!(handle.push_tx(Message::new(0x10, [i; 9])));
    }
    for _ in 0..200 {
        tx.on_tx_tick(&mut link, &mut capture);
    }
    let payloads: Vec<u8> = capture.0.iter().map(|(m, _)| m.data[0]).collect();
    assert_eq!(payloads, vec![0, 1, 2]);
    assert!(capture.0.iter().all(|(_, mask)| *mask == tx.tx_mask()));
    assert_eq!(handle.tx_len(), 0);
}

#[test]
fn overlapping_frames_never_deliver_garbage() {
    let a = Message::new(0x01, [0x11; 9]);
    let b = Message::new(0x02, [0x5A, 0xC3, 0, 1, 2, 3, 4, 5, 6]);
    let encoder = PulseEncoder::default();
    let pa = encoder.encode(&a);
    let pb = encoder.encode(&b);

    let mut silent = 0;
    let mut runs = 0;
    for delta in (1..36_000u64).step_by(211) {
        let mut pulses: Vec<u64> = pa
            .iter()
            .copied()
            .chain(pb.iter().map(|t| t + delta))
            .collect();
        pulses.sort_unstable();

        let mut rx = robot(CalibrationProfile::default_profile(1));
        let mut inbox = Inbox::default();
        feed(&mut rx, &mut inbox, 10_000, &pulses);
        for msg in &inbox.0 {
            assert!(*msg == a || *msg == b, "corrupted frame delivered at delta {delta}");
        }
        if inbox.0.is_empty() {
            silent += 1;
        }
        runs += 1;
    }
    assert!(silent * 2 > runs, "only {silent} of {runs} overlaps were dropped");
}

#[test]
fn single_bit_errors_on_the_wire_are_dropped() {
    let msg = Message::new(0x03, [0xA5; 9]);
    let wire = msg.to_bytes();
    for byte in 0..wire.len() {
        for bit in 0..8 {
            let mut corrupted = wire;
            corrupted[byte] ^= 1 << bit;
            let mut framed = vec![0u8];
            framed.extend_from_slice(&corrupted);

            let mut rx = robot(CalibrationProfile::default_profile(1));
            let mut inbox = Inbox::default();
            let pulses = PulseEncoder::default().encode_bytes(&framed);
            assert!(feed(&mut rx, &mut inbox, 0, &pulses).is_empty());
            assert!(inbox.0.is_empty());
            assert_eq!(rx.rx_stats().crc_errors, 1);
        }
    }
}

#[test]
fn profile_json_configures_robot() {
    let mut profile = CalibrationProfile::default_profile(77);
    profile.tx_mask = 0b0000_0011;
    let json = profile.to_json().unwrap();

    let loaded = CalibrationProfile::from_json(&json).unwrap();
    let robot = robot(loaded);
    assert_eq!(robot.uid(), 77);
    assert_eq!(robot.tx_mask(), 0b0000_0011);
    assert_eq!(robot.state(), RobotState::Idle);
}
