pub mod progress;

use crate::sim::Swarm;
use crate::utils::consts::CPU_HZ;
use progress::ProgressManager;

pub fn print_banner() {
    eprintln!("kilolink-rs");
}

/// Show simulated time and swarm traffic on the simulation bar.
pub fn update_progress(swarm: &Swarm, progress_manager: &ProgressManager) {
    let elapsed_ms = swarm.now() * 1000 / CPU_HZ;
    let (sent, received) = (0..swarm.len()).fold((0, 0), |(sent, received), i| {
        (
            sent + swarm.medium().sent(i),
            received + swarm.robot(i).rx_stats().frames,
        )
    });
    let _ = progress_manager.set_position("simulation", elapsed_ms);
    let _ = progress_manager.set_message(
        "simulation",
        &format!("{} sent, {} received", sent, received),
    );
}
