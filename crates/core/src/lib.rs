pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{
    Bounds, DesignNode, Issue, Severity, Status, ValidationReport, Viewport,
};
