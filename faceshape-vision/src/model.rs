use std::path::Path;

use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

pub const DETECTOR_MODEL_FILE: &str = "face_detector.onnx";
pub const LANDMARK_MODEL_FILE: &str = "face_landmark_68.onnx";
pub const RECOGNITION_MODEL_FILE: &str = "face_recognition.onnx";

/// The three sub-models a scan session needs, loaded from one model
/// directory. Every one of them must open before detection may run; a
/// single failure leaves the whole session unusable.
pub struct ModelBundle {
    pub detector: Session,
    pub landmark: Session,
    pub recognition: Session,
}

impl ModelBundle {
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            detector: load_session(&dir.join(DETECTOR_MODEL_FILE))
                .context("load face detector model")?,
            landmark: load_session(&dir.join(LANDMARK_MODEL_FILE))
                .context("load landmark model")?,
            recognition: load_session(&dir.join(RECOGNITION_MODEL_FILE))
                .context("load recognition model")?,
        })
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder);
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load_session(path: &Path) -> Result<Session> {
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("opening model {}", path.display()))
}
