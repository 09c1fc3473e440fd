pub mod domain;
pub mod heartbeat_worker;
pub mod nats;

pub use domain::*;
pub use heartbeat_worker::*;
pub use nats::*;
