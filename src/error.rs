//! Error types for the capture engine

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a capture run
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to initialize the page bridge
    #[error("Bridge initialization failed: {0}")]
    Initialization(String),

    /// A collaborator call (annotator, page query) failed
    #[error("Bridge call failed: {0}")]
    Bridge(String),

    /// One viewport capture attempt was rejected by the host's capture quota.
    /// Retried with an escalating backoff by the frame acquirer.
    #[error("Viewport capture hit the host capture quota")]
    CaptureQuota,

    /// The frame acquirer exhausted its retry budget
    #[error("Viewport capture failed after {attempts} attempts")]
    CaptureFailed { attempts: u32 },

    /// The page never reached the commanded scroll offset. Tolerated by the
    /// orchestrator: the frame is captured at the best-effort position.
    #[error("Scroll to offset {offset} timed out at position {observed}")]
    ScrollTimeout { offset: f64, observed: f64 },

    /// A captured frame could not be decoded; the frame is skipped
    #[error("Frame decode failed: {0}")]
    StitchDecode(String),

    /// No frame was ever captured; the stitch path cannot produce output
    #[error("No frames captured")]
    NoFramesCaptured,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Bridge(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::StitchDecode(err.to_string())
    }
}
