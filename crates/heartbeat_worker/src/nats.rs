mod demo_device;
mod device_method_client;
mod heartbeat_batch_service;
mod latency_record_producer;

pub use demo_device::*;
pub use device_method_client::*;
pub use heartbeat_batch_service::*;
pub use latency_record_producer::*;
