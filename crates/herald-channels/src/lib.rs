//! Channel transports for herald
//!
//! `herald-core` ships an in-memory channel; this crate adds transports that
//! cross a process boundary.

pub mod stream;

// Re-export main types
pub use stream::StreamChannel;
