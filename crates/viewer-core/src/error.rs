use pdf_engine::PdfEngineError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A document could not be opened. Surfaced on the panel that tried.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("{} is not supported: {reason}", path.display())]
    Unsupported { path: PathBuf, reason: String },
}

impl LoadError {
    pub(crate) fn from_engine(path: &Path, err: PdfEngineError) -> Self {
        let path = path.to_path_buf();
        match err {
            PdfEngineError::Io(source) => Self::Unreadable { path, source },
            PdfEngineError::NotPdf | PdfEngineError::EncryptedUnsupported => {
                Self::Unsupported { path, reason: err.to_string() }
            }
            other => Self::Corrupt { path, reason: other.to_string() },
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Unreadable { path, .. }
            | Self::Corrupt { path, .. }
            | Self::Unsupported { path, .. } => path,
        }
    }

    /// Human-readable cause without the path.
    pub fn reason(&self) -> String {
        match self {
            Self::Unreadable { source, .. } => source.to_string(),
            Self::Corrupt { reason, .. } | Self::Unsupported { reason, .. } => reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Expected when a document is switched or the view is torn down. Never
    /// shown to the user.
    #[error("rendering cancelled")]
    Cancelled,
    #[error("page {page} failed to render: {message}")]
    Other { page: u32, message: String },
}

impl RenderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Category of a panel error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Load,
    Render,
}
