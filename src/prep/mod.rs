//! Sample preparation: sliding windows and train-only scaling.

pub mod scaling;
pub mod window;

pub use scaling::{ScalerState, SplitSampleSet};
pub use window::WindowedSample;
