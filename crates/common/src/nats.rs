mod batch_consumer;
mod client;
mod middleware;
mod trace_context;
mod traits;

pub use batch_consumer::*;
pub use client::*;
pub use middleware::*;
pub use trace_context::*;
pub use traits::*;
