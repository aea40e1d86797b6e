//! Sliding-window admission control.

mod key;
mod sliding;
mod window;

pub use key::LimiterKey;
pub use sliding::{Decision, SlidingWindowLimiter};
pub use window::WindowState;
