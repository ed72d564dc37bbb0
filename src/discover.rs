//! Candidate discovery and output layout.
//!
//! Flat mode looks at the direct children of the source root; recursive mode
//! walks the whole subtree. Extensions match case-insensitively. In recursive
//! mode every file's directory relative to the root is mirrored under the
//! output, image and intermediate directories, so `source/a/b/x.pdf` lands
//! at `md/a/b/x.md`.

use crate::error::Doc2MdError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Office extensions routed through the format converter first.
pub const OFFICE_EXTENSIONS: &[&str] = &["doc", "docx", "ppt", "pptx"];

/// What kind of source a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pdf,
    Office,
}

impl SourceKind {
    /// Classify by extension, case-insensitively. `None` for anything else.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if ext == "pdf" {
            Some(SourceKind::Pdf)
        } else if OFFICE_EXTENSIONS.contains(&ext.as_str()) {
            Some(SourceKind::Office)
        } else {
            None
        }
    }
}

/// A discovered candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub kind: SourceKind,
    /// Directory relative to the source root; empty in flat mode.
    pub rel_dir: PathBuf,
}

impl SourceFile {
    /// A file outside any traversal: outputs go flat into the target dirs.
    pub fn standalone(path: impl Into<PathBuf>, kind: SourceKind) -> Self {
        Self {
            path: path.into(),
            kind,
            rel_dir: PathBuf::new(),
        }
    }

    /// File name without its final extension.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }
}

/// List candidate files under `root`, sorted by path.
pub fn discover(root: &Path, recursive: bool) -> Result<Vec<SourceFile>, Doc2MdError> {
    if !root.is_dir() {
        return Err(Doc2MdError::SourceUnreadable {
            path: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                // Root-level failure is fatal; deeper failures only lose a subtree.
                if e.depth() == 0 {
                    let path = root.to_path_buf();
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk failed"));
                    return Err(Doc2MdError::SourceUnreadable { path, source });
                }
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let Some(kind) = SourceKind::from_path(&path) else {
            continue;
        };
        let rel_dir = path
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        files.push(SourceFile {
            path,
            kind,
            rel_dir,
        });
    }

    debug!(
        "Discovered {} candidate(s) under {} ({})",
        files.len(),
        root.display(),
        if recursive { "recursive" } else { "flat" }
    );
    Ok(files)
}

/// Where artifacts for files in one relative directory go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub output_dir: PathBuf,
    pub image_dir: PathBuf,
    pub intermediate_dir: PathBuf,
}

impl Layout {
    /// The layout for `file`, mirroring its relative directory.
    pub fn for_file(&self, file: &SourceFile) -> Layout {
        Layout {
            output_dir: self.output_dir.join(&file.rel_dir),
            image_dir: self.image_dir.join(&file.rel_dir),
            intermediate_dir: self.intermediate_dir.join(&file.rel_dir),
        }
    }

    pub fn markdown_path(&self, stem: &str) -> PathBuf {
        self.output_dir.join(format!("{stem}.md"))
    }

    /// Where the converter is expected to write the intermediate PDF.
    pub fn intermediate_pdf(&self, stem: &str) -> PathBuf {
        self.intermediate_dir.join(format!("{stem}.pdf"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"x").unwrap();
    }

    #[test]
    fn classifies_extensions_case_insensitively() {
        assert_eq!(SourceKind::from_path(Path::new("A.PDF")), Some(SourceKind::Pdf));
        assert_eq!(
            SourceKind::from_path(Path::new("deck.PpTx")),
            Some(SourceKind::Office)
        );
        assert_eq!(SourceKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(SourceKind::from_path(Path::new("pdf")), None);
    }

    #[test]
    fn flat_mode_ignores_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.pdf");
        touch(dir.path(), "b.docx");
        touch(dir.path(), "c.txt");
        touch(dir.path(), "sub/d.pdf");

        let found = discover(dir.path(), false).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.docx"]);
        assert!(found.iter().all(|f| f.rel_dir.as_os_str().is_empty()));
    }

    #[test]
    fn recursive_mode_records_relative_dirs() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.pdf");
        touch(dir.path(), "x/y/deep.ppt");

        let found = discover(dir.path(), true).unwrap();
        assert_eq!(found.len(), 2);
        let deep = found.iter().find(|f| f.kind == SourceKind::Office).unwrap();
        assert_eq!(deep.rel_dir, PathBuf::from("x/y"));
        assert_eq!(deep.stem(), "deep");
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(&dir.path().join("nope"), false).unwrap_err();
        assert!(matches!(err, Doc2MdError::SourceUnreadable { .. }));
    }

    #[test]
    fn layout_mirrors_relative_directory() {
        let layout = Layout {
            output_dir: "md".into(),
            image_dir: "md/images".into(),
            intermediate_dir: "tmp_pdf".into(),
        };
        let file = SourceFile {
            path: "source/a/b.docx".into(),
            kind: SourceKind::Office,
            rel_dir: "a".into(),
        };
        let l = layout.for_file(&file);
        assert_eq!(l.markdown_path("b"), PathBuf::from("md/a/b.md"));
        assert_eq!(l.intermediate_pdf("b"), PathBuf::from("tmp_pdf/a/b.pdf"));
        assert_eq!(l.image_dir, PathBuf::from("md/images/a"));
    }
}
