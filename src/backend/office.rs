//! Office → PDF via LibreOffice in headless mode.
//!
//! The `soffice` binary is looked up on `PATH` first, then in the usual
//! per-platform install locations. Each conversion runs with a throwaway user
//! profile so concurrent invocations do not fight over the profile lock, and
//! writes into a scratch directory that is renamed into place only once the
//! PDF is complete.

use super::FormatConverter;
use crate::error::BackendError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// LibreOffice-backed [`FormatConverter`].
#[derive(Debug, Clone)]
pub struct LibreOfficeConverter {
    program: Option<PathBuf>,
}

impl LibreOfficeConverter {
    /// Locate `soffice` on this machine. The result may be unavailable; check
    /// [`FormatConverter::is_available`].
    pub fn detect() -> Self {
        let program = locate_soffice();
        match &program {
            Some(p) => debug!("LibreOffice found at {}", p.display()),
            None => debug!("LibreOffice not found"),
        }
        Self { program }
    }

    /// Use a specific executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }
}

impl FormatConverter for LibreOfficeConverter {
    fn name(&self) -> &str {
        "LibreOffice"
    }

    fn is_available(&self) -> bool {
        self.program.as_deref().is_some_and(Path::is_file)
    }

    fn install_hint(&self) -> String {
        install_instructions()
    }

    fn convert(&self, source: &Path, out_dir: &Path) -> Result<Option<PathBuf>, BackendError> {
        let program = self
            .program
            .as_deref()
            .ok_or_else(|| BackendError::Other("LibreOffice (soffice) not found".into()))?;

        fs::create_dir_all(out_dir)?;
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| BackendError::Other(format!("no file name in {}", source.display())))?;
        let target = out_dir.join(format!("{stem}.pdf"));

        let scratch = tempfile::Builder::new().prefix(".soffice-").tempdir_in(out_dir)?;
        let profile = tempfile::Builder::new().prefix("doc2md-lo-profile-").tempdir()?;

        info!("Converting {} to PDF with LibreOffice", source.display());
        let output = Command::new(program)
            .arg(format!("-env:UserInstallation={}", file_url(profile.path())))
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(scratch.path())
            .arg(source)
            .output()?;

        if !output.status.success() {
            return Err(BackendError::Process {
                program: program.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let produced = scratch.path().join(format!("{stem}.pdf"));
        match fs::metadata(&produced) {
            Ok(meta) if meta.len() > 0 => {
                fs::rename(&produced, &target)?;
                debug!("Intermediate PDF written to {}", target.display());
                Ok(Some(target))
            }
            _ => {
                warn!(
                    "LibreOffice exited cleanly but produced no PDF for {}",
                    source.display()
                );
                Ok(None)
            }
        }
    }
}

/// `file://` URL form LibreOffice expects for `-env:UserInstallation`.
fn file_url(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    if s.starts_with('/') {
        format!("file://{s}")
    } else {
        format!("file:///{s}")
    }
}

fn locate_soffice() -> Option<PathBuf> {
    for name in ["soffice", "libreoffice"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }
    candidate_paths().into_iter().find(|p| p.is_file())
}

/// Well-known install locations, most likely first.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if cfg!(windows) {
        for var in ["ProgramFiles", "ProgramFiles(x86)"] {
            if let Ok(base) = std::env::var(var) {
                paths.push(
                    PathBuf::from(base)
                        .join("LibreOffice")
                        .join("program")
                        .join("soffice.exe"),
                );
            }
        }
    } else if cfg!(target_os = "macos") {
        paths.push(PathBuf::from(
            "/Applications/LibreOffice.app/Contents/MacOS/soffice",
        ));
        paths.push(PathBuf::from(
            "/Applications/OpenOffice.app/Contents/MacOS/soffice",
        ));
    } else {
        paths.push(PathBuf::from("/usr/bin/soffice"));
        paths.push(PathBuf::from("/usr/local/bin/soffice"));
        paths.push(PathBuf::from("/snap/bin/libreoffice"));
        // Vendor tarballs install as /opt/libreoffice<version>/program/soffice.
        if let Ok(entries) = fs::read_dir("/opt") {
            let mut versioned: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with("libreoffice"))
                .map(|e| e.path().join("program").join("soffice"))
                .collect();
            versioned.sort();
            versioned.reverse();
            paths.extend(versioned);
        }
    }
    paths
}

/// Installation instructions for the current platform, followed by the
/// others.
pub fn install_instructions() -> String {
    const LINUX: &str = "Ubuntu/Debian: sudo apt-get install libreoffice";
    const MACOS: &str = "macOS: brew install --cask libreoffice";
    const WINDOWS: &str =
        "Windows: download from https://www.libreoffice.org/download/download/";

    let ordered = if cfg!(windows) {
        [WINDOWS, MACOS, LINUX]
    } else if cfg!(target_os = "macos") {
        [MACOS, LINUX, WINDOWS]
    } else {
        [LINUX, MACOS, WINDOWS]
    };
    format!(
        "LibreOffice is required to convert .doc/.docx/.ppt/.pptx files.\n  {}\n  {}\n  {}",
        ordered[0], ordered[1], ordered[2]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_unavailable() {
        let c = LibreOfficeConverter::with_program("/definitely/not/here/soffice");
        assert!(!c.is_available());
    }

    #[test]
    fn convert_without_program_faults() {
        let c = LibreOfficeConverter { program: None };
        let dir = tempfile::tempdir().unwrap();
        let err = c.convert(Path::new("x.docx"), dir.path()).unwrap_err();
        assert!(err.to_string().contains("soffice"));
    }

    #[test]
    fn install_instructions_cover_all_platforms() {
        let hint = install_instructions();
        assert!(hint.contains("apt-get install libreoffice"));
        assert!(hint.contains("brew install"));
        assert!(hint.contains("libreoffice.org"));
    }

    #[test]
    fn file_url_forms() {
        assert_eq!(file_url(Path::new("/tmp/p")), "file:///tmp/p");
        assert_eq!(file_url(Path::new("C:\\Temp\\p")), "file:///C:/Temp/p");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn nonzero_exit_is_a_fault() {
        if !Path::new("/bin/false").exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let c = LibreOfficeConverter::with_program("/bin/false");
        let err = c.convert(Path::new("deck.pptx"), dir.path()).unwrap_err();
        assert!(matches!(err, BackendError::Process { .. }));
        assert!(!dir.path().join("deck.pdf").exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn clean_exit_without_output_is_a_failure() {
        if !Path::new("/bin/true").exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let c = LibreOfficeConverter::with_program("/bin/true");
        assert_eq!(c.convert(Path::new("deck.pptx"), dir.path()).unwrap(), None);
        // Scratch directory cleaned up.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
