//! # edgequake-doc2md
//!
//! Incremental batch conversion of PDF and office documents to Markdown.
//!
//! ## Why this crate?
//!
//! Converting a document folder is slow and, with a vision model in the loop,
//! costs money per page. Re-running the whole folder after one file changed
//! is wasteful. This crate remembers what it converted, keyed by a content
//! fingerprint, and on the next run only touches files that are new, changed,
//! previously failed, or whose outputs went missing. Renamed and moved files
//! are recognised by content and their records follow them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source/
//!  │
//!  ├─ 1. Discover   *.pdf, *.doc, *.docx, *.ppt, *.pptx (optionally recursive)
//!  ├─ 2. Identify   canonical key + SHA-256 fingerprint
//!  ├─ 3. Decide     skip / convert / parse-only against the conversion store
//!  ├─ 4. Convert    office → PDF via LibreOffice (intermediate, cleaned up later)
//!  ├─ 5. Parse      PDF → Markdown + images (pdfium text layer, vision LLM for scans)
//!  └─ 6. Record     status + fingerprint written atomically to file_hashes.json
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2md::{convert_batch, BatchConfig, LibreOfficeConverter, VisionConfig, VisionParser};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .source_dir("source")
//!         .output_dir("md")
//!         .recursive(true)
//!         .build()?;
//!     let parser = Arc::new(VisionParser::new(VisionConfig::default()));
//!     let converter = Arc::new(LibreOfficeConverter::detect());
//!     let summary = convert_batch(&config, parser, converter).await?;
//!     eprintln!("{}", summary.headline());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2md` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doc2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod discover;
pub mod error;
pub mod fingerprint;
pub mod output;
pub mod plan;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    DocumentParser, FormatConverter, LibreOfficeConverter, ParseMethod, ParseTarget,
    ParsedDocument, VisionParser,
};
pub use config::{BatchConfig, BatchConfigBuilder, VisionConfig, VisionConfigBuilder};
pub use convert::{convert_batch, convert_batch_sync, convert_file, convert_file_sync};
pub use discover::{discover, SourceFile, SourceKind};
pub use error::{BackendError, Doc2MdError, FileError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use output::{BatchSummary, FileAction, FileOutcome};
pub use plan::{ConvertReason, Plan, SkipReason};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{ArtifactState, ConversionRecord, ConversionStatus, ConversionStore, StoredEntry};
