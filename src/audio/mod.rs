//! The practice-room audio engine
//!
//! Real-time plugin chain processing over cpal with:
//! - host/device selection and stream config negotiation
//! - CLAP plugin discovery, loading, and editor hosting
//! - lock-free chain snapshots between the control and render contexts
//! - render-callback CPU and level metering

pub mod chain;
pub mod device;
pub mod engine;
pub mod error;
pub mod metering;
pub mod plugin;
