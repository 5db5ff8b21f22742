//! Built-in detection model backends.

pub mod color;
pub mod mock;

pub use color::{ColorRule, ColorRuleDetector};
pub use mock::{MockCounters, MockDetector, Schedule};
