//! Collaborator contracts and the built-in implementations.
//!
//! The orchestrator depends only on the two traits here:
//!
//! ```text
//! office file ──▶ FormatConverter ──▶ intermediate PDF ──▶ DocumentParser ──▶ <stem>.md + images
//! PDF ───────────────────────────────────────────────────▶ DocumentParser ──▶ <stem>.md + images
//! ```
//!
//! Both are blocking calls; the orchestrator runs them inside
//! `tokio::task::spawn_blocking`.
//!
//! * [`office::LibreOfficeConverter`]: `soffice --headless --convert-to pdf`
//! * [`vision::VisionParser`]: pdfium text layer, vision LLM for scanned pages

pub mod markdown;
pub mod office;
pub mod vision;

pub use office::LibreOfficeConverter;
pub use vision::VisionParser;

use crate::error::BackendError;
use std::path::{Component, Path, PathBuf};

/// Where a parser writes its artifacts for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTarget {
    /// Directory for `<stem>.md`.
    pub markdown_dir: PathBuf,
    /// Directory for extracted images.
    pub image_dir: PathBuf,
    /// Output file stem (the source file's stem, not the intermediate's).
    pub stem: String,
}

impl ParseTarget {
    pub fn markdown_path(&self) -> PathBuf {
        self.markdown_dir.join(format!("{}.md", self.stem))
    }

    /// Markdown link text for an image written into `image_dir`.
    pub fn image_link(&self, image: &Path) -> String {
        relative_link(&self.markdown_dir, image)
    }
}

/// How a document's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMethod {
    /// Every page had a usable text layer.
    Text,
    /// Every page was transcribed from an image.
    Ocr,
    Mixed,
}

/// What a parser produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub markdown_path: PathBuf,
    pub images: Vec<PathBuf>,
    pub method: ParseMethod,
}

/// Turns a PDF into Markdown plus images.
pub trait DocumentParser: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Parse `pdf`, writing `target.markdown_path()` and any images.
    ///
    /// `Ok` means the Markdown file was written completely. A fault returns
    /// `Err` and must not leave a partial Markdown file behind.
    fn parse(&self, pdf: &Path, target: &ParseTarget) -> Result<ParsedDocument, BackendError>;
}

/// Turns an office document into a PDF.
pub trait FormatConverter: Send + Sync {
    /// Short name for logs and error messages.
    fn name(&self) -> &str;

    /// Whether the external tool can be found.
    fn is_available(&self) -> bool;

    /// Installation instructions shown when the tool is missing.
    fn install_hint(&self) -> String;

    /// Convert `source` into a PDF inside `out_dir`.
    ///
    /// `Ok(Some(path))`: the PDF exists and is complete. `Ok(None)`: the tool
    /// ran but produced nothing. `Err`: the tool faulted.
    fn convert(&self, source: &Path, out_dir: &Path) -> Result<Option<PathBuf>, BackendError>;
}

/// Write `contents` to `path` via a temp file in the same directory, so a
/// crash never leaves a truncated file at `path`.
pub fn write_markdown(path: &Path, contents: &str) -> Result<(), BackendError> {
    crate::store::write_atomic(path, contents.as_bytes())?;
    Ok(())
}

/// Forward-slash path from `from_dir` to `to`, for Markdown links.
pub fn relative_link(from_dir: &Path, to: &Path) -> String {
    let cwd = std::env::current_dir().unwrap_or_default();
    let from = absolute(&cwd, from_dir);
    let to = absolute(&cwd, to);

    let from_parts: Vec<_> = from.components().collect();
    let to_parts: Vec<_> = to.components().collect();
    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut segments: Vec<String> = Vec::new();
    for _ in common..from_parts.len() {
        segments.push("..".to_string());
    }
    for part in &to_parts[common..] {
        segments.push(part.as_os_str().to_string_lossy().into_owned());
    }
    segments.join("/")
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_link_is_relative_to_markdown_dir() {
        let target = ParseTarget {
            markdown_dir: "md/sub".into(),
            image_dir: "md/images/sub".into(),
            stem: "doc".into(),
        };
        assert_eq!(target.markdown_path(), PathBuf::from("md/sub/doc.md"));
        assert_eq!(
            target.image_link(Path::new("md/images/sub/doc_p1_1.png")),
            "../images/sub/doc_p1_1.png"
        );
    }

    #[test]
    fn relative_link_for_sibling_directory() {
        assert_eq!(
            relative_link(Path::new("md"), Path::new("md/images/a.png")),
            "images/a.png"
        );
        assert_eq!(
            relative_link(Path::new("md"), Path::new("pics/a.png")),
            "../pics/a.png"
        );
    }

    #[test]
    fn write_markdown_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/a.md");
        write_markdown(&path, "# first\n").unwrap();
        write_markdown(&path, "# second\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# second\n");
    }
}
