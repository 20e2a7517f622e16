//! Signal-processing building blocks shared by the analysis stages.

pub mod framing;
pub mod math;
pub mod spectrum;

pub use framing::FrameLayout;
