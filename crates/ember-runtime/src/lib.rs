//! Ember Runtime - Frame loop building blocks
//!
//! - `FrameClock` - measures real elapsed time between frames
//! - `TimeSource` - monotonic time abstraction (`MonotonicTime` for production,
//!   `ManualTime` for deterministic tests and headless simulation)
//! - `RuntimeSystem` - trait for systems ticked by the host's frame loop

mod clock;
mod system;

pub use clock::{FrameClock, ManualTime, MonotonicTime, TimeSource};
pub use system::RuntimeSystem;
