use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Chrome not found: {0}")]
    ChromeNotFound(String),

    #[error("Browser launch timed out: {0}")]
    LaunchTimeout(String),

    #[error("CDP connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Dimension mismatch: expected {expected_width}x{expected_height}, got {actual_width}x{actual_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Comparison error: {0}")]
    Comparison(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code so a calling agent can branch on cause
    /// without parsing prose.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ChromeNotFound(_) => "CHROME_NOT_FOUND",
            Error::LaunchTimeout(_) | Error::Timeout(_) => "CDP_TIMEOUT",
            Error::ConnectionRefused(_) => "CDP_CONNECTION_REFUSED",
            Error::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Error::Comparison(_) => "COMPARISON_ERROR",
            Error::Capture(_) | Error::Fetch(_) => "CAPTURE_ERROR",
            Error::InvalidTarget(_) => "INVALID_TARGET",
            Error::Io(_) | Error::Json(_) => "INTERNAL_ERROR",
        }
    }

    /// Actionable remediation hint rendered into the validation report.
    pub fn hint(&self) -> String {
        match self {
            Error::ChromeNotFound(_) => {
                "Install Google Chrome or Chromium, or start one manually with \
                 --remote-debugging-port before validating."
                    .to_string()
            }
            Error::LaunchTimeout(_) => {
                "Chrome was spawned but never exposed its debugging port. Check that the \
                 binary is runnable and the port is free.".to_string()
            }
            Error::ConnectionRefused(_) => {
                "No browser is listening on the debugging port. Re-run to trigger a launch, \
                 or pass a different --port.".to_string()
            }
            Error::Timeout(msg) => format!(
                "A browser/network step exceeded its timeout ({}). The page may be slow or hung; \
                 try a longer timeout or a simpler URL.",
                msg
            ),
            Error::DimensionMismatch { .. } => {
                "Rendered and reference images have different sizes. Set the viewport to the \
                 reference dimensions, or let it be derived from the target bounds.".to_string()
            }
            Error::Capture(msg) => format!("Screenshot capture failed: {}", msg),
            Error::Comparison(msg) => format!("Pixel comparison failed: {}", msg),
            Error::InvalidTarget(msg) => format!("The resolved design target is unusable: {}", msg),
            Error::Fetch(msg) => format!("Reference image fetch failed after retries: {}", msg),
            Error::Io(e) => format!("IO failure: {}", e),
            Error::Json(e) => format!("Malformed JSON: {}", e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
