//! Screen capture: frame sources and the fixed-cadence capture loop.

pub mod recorder;
pub mod source;
pub mod types;

pub use recorder::{CaptureHandle, CaptureState};
pub use source::{FrameSource, PrimaryDisplaySource};
pub use types::Frame;
