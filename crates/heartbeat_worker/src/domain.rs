mod acknowledger;
mod batch_processor;
mod codec;
mod emitter;
mod error;
mod freshness;
mod latency;

pub use acknowledger::*;
pub use batch_processor::*;
pub use codec::*;
pub use emitter::*;
pub use error::*;
pub use freshness::*;
pub use latency::*;
