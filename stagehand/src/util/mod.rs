/// Utility functions commonly used
pub mod align;
pub mod format;

pub use align::{align, align_down, lcm};
