pub mod config;
pub mod gate;
pub mod metrics;
pub mod predict;
pub mod scan;
pub mod sequencer;
pub mod upload;

// Re-export vision types for convenience
pub use faceshape_vision::{camera, detect, model, Camera, Detection, Detector, ModelBundle};
