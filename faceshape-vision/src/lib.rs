pub mod camera;
pub mod detect;
pub mod model;

// Re-export commonly used types
pub use camera::Camera;
pub use detect::{Detection, Detector};
pub use model::ModelBundle;
