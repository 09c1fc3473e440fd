mod device_method;
mod heartbeat;
mod result;
mod telemetry_publisher;
mod ticks;

pub use device_method::*;
pub use heartbeat::*;
pub use result::*;
pub use telemetry_publisher::*;
pub use ticks::*;
