use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EcoError {
    #[error("failed to read hotspot list at {path}: {message}")]
    #[diagnostic(help("set ECOATLAS_HOTSPOTS or ECOATLAS_DATA_DIR to point at hotspots.json"))]
    HotspotsRead { path: PathBuf, message: String },

    #[error("failed to parse hotspot list: {0}")]
    HotspotsParse(String),

    #[error("failed to read source mapping at {0}")]
    MappingRead(PathBuf),

    #[error("failed to parse source mapping: {0}")]
    MappingParse(String),

    #[error("invalid source mapping: {0}")]
    MappingInvalid(String),

    #[error("invalid setting {name}: {message}")]
    InvalidSetting { name: String, message: String },

    #[error("upstream request failed: {0}")]
    Http(String),

    #[error("upstream returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("malformed upstream payload: {0}")]
    Parse(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("aggregation process failed: {0}")]
    Subprocess(String),

    #[error("aggregation process timed out after {0}s")]
    SubprocessTimeout(u64),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
