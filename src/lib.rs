//! Infrared messaging and distance sensing for small swarm robots.
//!
//! - [`phy`]: pulse timing, frame format, CRC and the receiver state machine
//! - [`mac`]: periodic transmit scheduling with random backoff
//! - [`distance`]: distance estimate from the light level of a frame
//! - [`robot`]: one robot's transport context, dispatch and main loop
//! - [`sim`]: a deterministic event-driven swarm to run it all in

pub mod distance;
pub mod error;
pub mod mac;
pub mod phy;
pub mod robot;
pub mod sim;
pub mod ui;
pub mod utils;

pub use error::{KiloError, Result};
