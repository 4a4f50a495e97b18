//! Ingestion error types

use docforge_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("PDF parse error for {file_name}: {message}")]
    PdfParseError { file_name: String, message: String },

    #[error("Office document error for {file_name}: {message}")]
    OoxmlError { file_name: String, message: String },

    #[error("No text content extracted from {0}")]
    EmptyDocument(String),

    #[error("Chunking produced no chunks for {0}")]
    NoChunks(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] AppError),
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::UnsupportedFileType(file_name) => {
                AppError::UnsupportedFileType { file_name }
            }
            IngestionError::PdfParseError { file_name, message }
            | IngestionError::OoxmlError { file_name, message } => {
                AppError::ExtractionFailed { file_name, message }
            }
            IngestionError::EmptyDocument(file_name) => AppError::ExtractionFailed {
                file_name,
                message: "No text content extracted from file".to_string(),
            },
            IngestionError::NoChunks(file_name) => AppError::ExtractionFailed {
                file_name,
                message: "Document produced no chunks".to_string(),
            },
            IngestionError::IoError(e) => AppError::Internal {
                message: e.to_string(),
            },
            IngestionError::Common(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_errors_map_to_unprocessable() {
        let err: AppError = IngestionError::EmptyDocument("a.pdf".into()).into();
        assert_eq!(err.status_code().as_u16(), 422);

        let err: AppError = IngestionError::UnsupportedFileType("a.exe".into()).into();
        assert_eq!(err.status_code().as_u16(), 415);
    }
}
