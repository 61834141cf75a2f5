//! Control API handlers

pub mod cycle;
pub mod health;
pub mod sse;

pub use cycle::cycle_routes;
pub use health::health_routes;
pub use sse::cycle_event_stream;
