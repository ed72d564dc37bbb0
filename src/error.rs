//! Error types for the edgequake-doc2md library.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`Doc2MdError`]: **fatal**, the run cannot proceed at all (named input
//!   file missing, unsupported extension in single-file mode, store cannot be
//!   written). Returned as `Err(Doc2MdError)` from the top-level entry points.
//!
//! * [`FileError`]: **non-fatal**, a single file failed (unreadable bytes,
//!   converter crash, parser fault) but the rest of the batch is fine. Stored
//!   inside [`crate::output::FileOutcome`] and persisted into the file's
//!   [`crate::store::ConversionRecord`] so the next run retries it.
//!
//! * [`BackendError`]: what a [`crate::backend::DocumentParser`] or
//!   [`crate::backend::FormatConverter`] returns when it faults. The
//!   orchestrator wraps it into a [`FileError`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-doc2md library.
///
/// Per-file failures use [`FileError`] and are recorded rather than
/// propagated here.
#[derive(Debug, Error)]
pub enum Doc2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Single-file mode was given an extension we cannot process.
    #[error("Unsupported file type '{extension}' for '{path}'\nSupported: .pdf, .doc, .docx, .ppt, .pptx")]
    UnsupportedExtension { path: PathBuf, extension: String },

    /// The source directory could not be read.
    #[error("Cannot read source directory '{path}': {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Dependency errors ─────────────────────────────────────────────────
    /// The office-to-PDF converter is not installed.
    #[error("Cannot convert '{path}': {tool} was not found.\n{hint}")]
    ConverterUnavailable {
        path: PathBuf,
        tool: String,
        hint: String,
    },

    // ── Store errors ──────────────────────────────────────────────────────
    /// Could not write the conversion store document.
    #[error("Failed to write conversion store '{path}': {source}")]
    StoreWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not serialise the conversion store.
    #[error("Failed to serialise conversion store: {0}")]
    StoreSerialize(#[from] serde_json::Error),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create an output or intermediate directory.
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single file.
///
/// The batch continues; the message is kept in the file's record as
/// `status = "error"`.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum FileError {
    /// The file could not be read while computing its fingerprint.
    #[error("{path}: fingerprint failed: {detail}")]
    Fingerprint { path: PathBuf, detail: String },

    /// The format converter faulted.
    #[error("{path}: format conversion faulted: {detail}")]
    Convert { path: PathBuf, detail: String },

    /// The document parser faulted.
    #[error("{path}: parsing faulted: {detail}")]
    Parse { path: PathBuf, detail: String },

    /// A filesystem operation around the conversion failed.
    #[error("{path}: I/O error: {detail}")]
    Io { path: PathBuf, detail: String },

    /// The blocking worker panicked or was cancelled.
    #[error("{path}: worker failed: {detail}")]
    Worker { path: PathBuf, detail: String },
}

/// Errors raised by collaborator implementations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external process exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    Process {
        program: String,
        status: String,
        stderr: String,
    },

    /// The PDF engine could not be loaded or rejected the document.
    #[error("PDF engine error: {0}")]
    Pdf(String),

    /// The vision LLM could not be configured or kept failing.
    #[error("Vision LLM error: {0}")]
    Llm(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converter_unavailable_display_carries_hint() {
        let e = Doc2MdError::ConverterUnavailable {
            path: PathBuf::from("slides.pptx"),
            tool: "LibreOffice".into(),
            hint: "sudo apt-get install libreoffice".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("slides.pptx"), "got: {msg}");
        assert!(msg.contains("apt-get"), "got: {msg}");
    }

    #[test]
    fn unsupported_extension_lists_supported_types() {
        let e = Doc2MdError::UnsupportedExtension {
            path: PathBuf::from("notes.txt"),
            extension: ".txt".into(),
        };
        assert!(e.to_string().contains(".pptx"));
    }

    #[test]
    fn file_error_round_trips_through_json() {
        let e = FileError::Parse {
            path: PathBuf::from("a.pdf"),
            detail: "no pages".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: FileError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), e.to_string());
    }

    #[test]
    fn process_error_display() {
        let e = BackendError::Process {
            program: "soffice".into(),
            status: "exit status: 1".into(),
            stderr: "source file could not be loaded".into(),
        };
        assert!(e.to_string().starts_with("'soffice' exited"));
    }
}
