use kilolink_rs::phy::{Message, MessageType};
use kilolink_rs::robot::RobotState;
use kilolink_rs::sim::{SimConfig, Swarm};

#[test]
fn swarm_exchanges_beacons_and_writes_report() {
    let mut swarm = Swarm::new(SimConfig {
        robots: 4,
        spacing_mm: 55.0,
        seed: 21,
        ..Default::default()
    });
    swarm.run_for_seconds(4.0);

    let report = swarm.report();
    for robot in &report.robots {
        assert_eq!(robot.state, RobotState::Running);
        assert!(robot.sent > 0, "robot {} never sent", robot.uid);
        assert!(!robot.neighbors.is_empty(), "robot {} heard nobody", robot.uid);
    }
    let error = report.mean_distance_error_mm().unwrap();
    assert!(error < 5.0, "mean distance error {error} mm");

    let path = std::env::temp_dir().join(format!("kilolink-report-{}.json", std::process::id()));
    report.write(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["seed"], 21);
    assert_eq!(json["robots"].as_array().unwrap().len(), 4);
}

#[test]
fn sleep_command_silences_the_swarm() {
    let mut swarm = Swarm::new(SimConfig {
        robots: 2,
        seed: 8,
        ..Default::default()
    });
    swarm.run_for_seconds(2.0);
    swarm.broadcast(&Message::new_control(MessageType::Sleep, [0; 9]));
    let sent_before: Vec<u32> = (0..2).map(|i| swarm.medium().sent(i)).collect();

    swarm.run_for_seconds(2.0);
    for i in 0..2 {
        assert_eq!(swarm.robot(i).state(), RobotState::Sleeping);
        assert_eq!(swarm.medium().sent(i), sent_before[i]);
    }

    swarm.broadcast(&Message::new_control(MessageType::Wakeup, [0; 9]));
    assert_eq!(swarm.robot(0).state(), RobotState::Idle);
}
