// Physical layer: IR pulse timing, framing and the analog front-end

pub mod adc;
pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod timer;

pub use adc::{AdcChannel, AnalogFrontEnd};
pub use decoder::{IrReceiver, Reception, RxBusy, RxStats};
pub use encoder::PulseEncoder;
pub use frame::{DistanceMeasurement, Message, MessageType};
