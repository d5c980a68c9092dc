//! Debounce and throttle wrappers around caller-supplied functions.

mod debounce;
mod throttle;

pub use debounce::{debounce, Debouncer};
pub use throttle::{throttle, Throttle};
