use std::path::{Path, PathBuf};

use thiserror::Error;

use faceshape_vision::{Detection, Detector};

use crate::metrics::best_detection;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("no face found in image; use a photo with a clearly visible face")]
    NoFace,
    /// Catch-all for unreadable files and detector-level failures.
    #[error("image could not be processed; check that the file is a valid image")]
    Unreadable,
}

/// Monotonic validation attempt ids. The detection call itself cannot be
/// aborted, so a newer selection simply supersedes the old attempt and its
/// late result is discarded.
#[derive(Debug, Default)]
pub struct ValidationTicket {
    latest: u64,
}

impl ValidationTicket {
    pub fn begin(&mut self) -> u64 {
        self.latest += 1;
        self.latest
    }

    pub fn is_current(&self, attempt: u64) -> bool {
        attempt == self.latest
    }

    /// Invalidate any in-flight attempt without starting a new one.
    pub fn supersede(&mut self) {
        self.latest += 1;
    }
}

/// Single-image selection state: pick a file, validate that it contains a
/// face, and only then allow submission. Last selection wins.
#[derive(Debug, Default)]
pub struct UploadFlow {
    ticket: ValidationTicket,
    pending: Option<PathBuf>,
    selected: Option<PathBuf>,
}

impl UploadFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start validating a newly chosen file. Clears the previous selection
    /// and supersedes any validation still in flight.
    pub fn select(&mut self, path: &Path) -> u64 {
        self.selected = None;
        self.pending = Some(path.to_path_buf());
        self.ticket.begin()
    }

    /// Apply a finished validation. Returns false when the attempt was
    /// superseded by a newer selection, in which case nothing changes.
    pub fn apply(&mut self, attempt: u64, outcome: &Result<(), UploadError>) -> bool {
        if !self.ticket.is_current(attempt) {
            return false;
        }
        if outcome.is_ok() {
            self.selected = self.pending.take();
        } else {
            self.pending = None;
        }
        true
    }

    /// The validated selection, if any.
    pub fn selected(&self) -> Option<&Path> {
        self.selected.as_deref()
    }

    pub fn reset(&mut self) {
        self.ticket.supersede();
        self.pending = None;
        self.selected = None;
    }
}

/// One-shot validation of a static image: a face must exist. No centering
/// or size gating here, unlike the camera path.
pub fn validate_image(detector: &mut Detector, path: &Path) -> Result<(), UploadError> {
    let img = image::open(path).map_err(|_| UploadError::Unreadable)?;
    let detections = detector.detect(&img).map_err(|_| UploadError::Unreadable)?;
    require_face(&detections)
}

fn require_face(detections: &[Detection]) -> Result<(), UploadError> {
    match best_detection(detections) {
        Some(_) => Ok(()),
        None => Err(UploadError::NoFace),
    }
}

/// MIME type for the multipart upload, from the file extension.
pub fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}
