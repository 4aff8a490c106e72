//! Error types for asset decoding, graph compilation and the renderer facade

use crate::backend::BackendError;
use thiserror::Error;

/// Asset protocol violations. Fatal to the asset being decoded, never to the renderer.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Unsupported index width {0} (expected 1, 2 or 4)")]
    UnsupportedIndexWidth(u8),
    #[error("Mesh stream ended during {stage}")]
    UnexpectedEnd { stage: &'static str },
    #[error("Mesh stream has {0} trailing bytes after the index stream")]
    TrailingData(usize),
    #[error("HDR header exceeds 10240 bytes")]
    HdrHeaderTooLong,
    #[error("Unsupported HDR format: {0}")]
    HdrBadFormat(String),
    #[error("HDR header has no resolution line")]
    HdrMissingDimensions,
    #[error("Bad RLE data in HDR scanline {row}")]
    BadRle { row: usize },
    #[error("Invalid HDR scanline {row}: expected width {expected}, found {found}")]
    ScanlineMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("HDR image {width}x{height} cannot be encoded in {available} bytes")]
    HdrTooLarge {
        width: u32,
        height: u32,
        available: usize,
    },
    #[error("HDR pixel data is truncated")]
    Truncated,
    #[error("Loader {0} panicked")]
    LoaderPanicked(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Render graph compilation failures
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("Render graph has a dependency cycle through passes {0:?}")]
    Cycle(Vec<String>),
    #[error("Pass references unknown resource {0}")]
    UnknownResource(String),
    #[error("Pass {0} is already registered")]
    DuplicatePass(String),
}

/// Errors surfaced by the renderer facade
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type RendererResult<T> = Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AssetError::ScanlineMismatch {
            row: 3,
            expected: 64,
            found: 32,
        };
        assert_eq!(
            err.to_string(),
            "Invalid HDR scanline 3: expected width 64, found 32"
        );

        let wrapped: RendererError = GraphError::DuplicatePass("pbr".into()).into();
        assert_eq!(wrapped.to_string(), "Pass pbr is already registered");
    }
}
