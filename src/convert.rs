//! Batch and single-file entry points: the conversion orchestrator.
//!
//! ## Per-file flow
//!
//! ```text
//! identify ──▶ fingerprint ──▶ resolve ──▶ decide ──┬─▶ skip (maybe migrate key)
//!                                                    └─▶ convert / parse ──▶ record ──▶ persist
//! ```
//!
//! Each file runs in `spawn_blocking` (hashing, `soffice` and pdfium are all
//! blocking). Up to `concurrency` files run at once via `buffer_unordered`.
//! The store is shared behind one `Mutex`; resolve, record, prune and persist
//! each happen under that lock, and the store is written after every record
//! update so an interrupted batch keeps its progress.
//!
//! Per-file faults never escape: they become `Failed`/`Error` records and
//! [`FileAction`]s. Only setup problems return `Err(Doc2MdError)`.

use crate::backend::{DocumentParser, FormatConverter, ParseTarget};
use crate::config::BatchConfig;
use crate::discover::{discover, Layout, SourceFile, SourceKind};
use crate::error::{Doc2MdError, FileError};
use crate::fingerprint::fingerprint;
use crate::output::{BatchSummary, FileAction, FileOutcome};
use crate::plan::{self, Artifacts, ConvertReason, Plan, SkipReason};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::store::{
    ArtifactState, ConversionRecord, ConversionStatus, ConversionStore, FileIdentity, KeySpace,
    Resolution,
};
use futures::stream::{self, StreamExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything a worker needs, shared across blocking tasks.
struct Job {
    space: KeySpace,
    layout: Layout,
    /// `None` in force mode.
    store: Option<Mutex<ConversionStore>>,
    parser: Arc<dyn DocumentParser>,
    /// `None` when the converter's tool is not installed.
    converter: Option<Arc<dyn FormatConverter>>,
    progress: ProgressCallback,
}

impl Job {
    fn new(
        config: &BatchConfig,
        root: Option<&Path>,
        parser: Arc<dyn DocumentParser>,
        converter: Option<Arc<dyn FormatConverter>>,
    ) -> Self {
        let store = match &config.store_path {
            Some(path) => Some(Mutex::new(ConversionStore::load(path))),
            None => {
                info!("Force mode: conversion store bypassed");
                None
            }
        };
        Self {
            space: KeySpace::new(root),
            layout: Layout {
                output_dir: config.output_dir.clone(),
                image_dir: config.image_dir.clone(),
                intermediate_dir: config.intermediate_dir.clone(),
            },
            store,
            parser,
            converter,
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
        }
    }

    /// Run `f` under the store lock, then persist. No-op in force mode.
    fn update_store(&self, f: impl FnOnce(&mut ConversionStore)) {
        if let Some(store) = &self.store {
            let mut guard = lock(store);
            f(&mut guard);
            if let Err(e) = guard.persist() {
                warn!("{}", e);
            }
        }
    }
}

fn lock(store: &Mutex<ConversionStore>) -> MutexGuard<'_, ConversionStore> {
    // A panicking worker cannot leave the map half-updated: every mutation
    // is a single insert/remove.
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Batch mode ───────────────────────────────────────────────────────────

/// Convert every candidate under `config.source_dir`.
///
/// Unchanged files are skipped, failed ones retried, and each outcome is
/// recorded in the store. Returns `Ok` even when individual files fail;
/// inspect [`BatchSummary::failed`].
///
/// # Errors
/// Only setup failures: unreadable source directory, output directories that
/// cannot be created.
pub async fn convert_batch(
    config: &BatchConfig,
    parser: Arc<dyn DocumentParser>,
    converter: Arc<dyn FormatConverter>,
) -> Result<BatchSummary, Doc2MdError> {
    let started = Instant::now();
    let files = discover(&config.source_dir, config.recursive)?;
    create_dir(&config.output_dir)?;
    create_dir(&config.image_dir)?;

    let office_count = files.iter().filter(|f| f.kind == SourceKind::Office).count();
    let converter = if office_count > 0 && !converter.is_available() {
        warn!(
            "{} not found: {} office file(s) will be skipped.\n{}",
            converter.name(),
            office_count,
            converter.install_hint()
        );
        None
    } else {
        Some(converter)
    };

    let job = Arc::new(Job::new(
        config,
        Some(config.source_dir.as_path()),
        parser,
        converter,
    ));
    let total = files.len();
    info!(
        "Found {} candidate file(s) in {}",
        total,
        config.source_dir.display()
    );
    job.progress.on_batch_start(total);

    let outcomes: Vec<FileOutcome> = stream::iter(files)
        .map(|file| {
            let job = Arc::clone(&job);
            let abort = Arc::clone(&config.abort);
            async move {
                if abort.load(Ordering::SeqCst) {
                    return None;
                }
                Some(run_blocking(job, file).await)
            }
        })
        .buffer_unordered(config.concurrency)
        .filter_map(futures::future::ready)
        .collect()
        .await;

    let interrupted = config.is_aborted();
    if interrupted {
        warn!("Interrupted: no new files started; finished files are recorded");
    }

    if !config.keep_intermediates {
        remove_intermediate_dir(&config.intermediate_dir);
        job.update_store(|store| {
            let n = store.demote_present_intermediates();
            if n > 0 {
                debug!("Marked {} intermediate PDF(s) as placeholders", n);
            }
        });
    } else {
        job.update_store(|_| {});
    }

    let mut summary = BatchSummary::from_outcomes(total, outcomes, interrupted);
    summary.duration_ms = started.elapsed().as_millis() as u64;
    info!("{}", summary.headline());
    job.progress.on_batch_complete(&summary);
    Ok(summary)
}

/// Synchronous wrapper around [`convert_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_batch_sync(
    config: &BatchConfig,
    parser: Arc<dyn DocumentParser>,
    converter: Arc<dyn FormatConverter>,
) -> Result<BatchSummary, Doc2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Doc2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_batch(config, parser, converter))
}

// ── Single-file mode ─────────────────────────────────────────────────────

/// Convert one named file, honouring the store like a batch run would.
///
/// Output lands directly in `config.output_dir` (mirrored only when
/// `config.recursive` and the file lives under `config.source_dir`). The
/// file's intermediate PDF is removed afterwards unless retention is on.
///
/// # Errors
/// * [`Doc2MdError::FileNotFound`]: `path` is not a file
/// * [`Doc2MdError::UnsupportedExtension`]: not a PDF or office document
/// * [`Doc2MdError::ConverterUnavailable`]: office file, converter missing
pub async fn convert_file(
    path: impl AsRef<Path>,
    config: &BatchConfig,
    parser: Arc<dyn DocumentParser>,
    converter: Arc<dyn FormatConverter>,
) -> Result<FileOutcome, Doc2MdError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Doc2MdError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let kind = SourceKind::from_path(path).ok_or_else(|| Doc2MdError::UnsupportedExtension {
        path: path.to_path_buf(),
        extension: path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| "(none)".to_string()),
    })?;
    if kind == SourceKind::Office && !converter.is_available() {
        return Err(Doc2MdError::ConverterUnavailable {
            path: path.to_path_buf(),
            tool: converter.name().to_string(),
            hint: converter.install_hint(),
        });
    }
    create_dir(&config.output_dir)?;
    create_dir(&config.image_dir)?;

    let mut file = SourceFile::standalone(path, kind);
    if config.recursive {
        file.rel_dir = relative_dir(&config.source_dir, path).unwrap_or_default();
    }

    let job = Arc::new(Job::new(
        config,
        Some(config.source_dir.as_path()),
        parser,
        Some(converter),
    ));
    let outcome = run_blocking(Arc::clone(&job), file).await;

    if !config.keep_intermediates {
        if let Some(pdf) = &outcome.intermediate {
            if let Err(e) = fs::remove_file(pdf) {
                warn!("Could not remove intermediate {}: {}", pdf.display(), e);
            }
            job.update_store(|store| {
                store.set_intermediate(&outcome.key, ArtifactState::Placeholder);
            });
        }
    }
    Ok(outcome)
}

/// Synchronous wrapper around [`convert_file`].
pub fn convert_file_sync(
    path: impl AsRef<Path>,
    config: &BatchConfig,
    parser: Arc<dyn DocumentParser>,
    converter: Arc<dyn FormatConverter>,
) -> Result<FileOutcome, Doc2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Doc2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_file(path, config, parser, converter))
}

// ── Per-file work ────────────────────────────────────────────────────────

/// Run [`process_file`] on the blocking pool, turning a panic into an
/// `Errored` outcome.
async fn run_blocking(job: Arc<Job>, file: SourceFile) -> FileOutcome {
    let key = job.space.identify(&file.path).key;
    let source = file.path.clone();
    let kind = file.kind;
    let worker = Arc::clone(&job);
    match tokio::task::spawn_blocking(move || process_file(&worker, &file)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{}: worker failed: {}", key, e);
            job.progress.on_file_error(&key, &e.to_string());
            FileOutcome {
                action: FileAction::Errored {
                    error: FileError::Worker {
                        path: source.clone(),
                        detail: e.to_string(),
                    },
                },
                source,
                key,
                kind,
                output_path: None,
                duration_ms: 0,
                intermediate: None,
            }
        }
    }
}

/// Why an attempt produced no Markdown.
enum Failure {
    /// A collaborator ran but produced nothing.
    NoOutput(String),
    Fault(FileError),
}

/// Decide, act, and record for one file.
fn process_file(job: &Job, file: &SourceFile) -> FileOutcome {
    let started = Instant::now();
    let id = job.space.identify(&file.path);
    let layout = job.layout.for_file(file);
    let stem = file.stem();
    let markdown_path = layout.markdown_path(&stem);
    let intermediate_path =
        (file.kind == SourceKind::Office).then(|| layout.intermediate_pdf(&stem));

    let finish = |action: FileAction, output_path: Option<PathBuf>, intermediate: Option<PathBuf>| {
        FileOutcome {
            source: file.path.clone(),
            key: id.key.clone(),
            kind: file.kind,
            action,
            output_path,
            duration_ms: started.elapsed().as_millis() as u64,
            intermediate,
        }
    };

    if file.kind == SourceKind::Office && job.converter.is_none() {
        debug!("{}: skipped, no office converter", id.key);
        job.progress
            .on_file_skipped(&id.key, SkipReason::ConverterUnavailable);
        return finish(
            FileAction::Skipped {
                reason: SkipReason::ConverterUnavailable,
            },
            None,
            None,
        );
    }

    let (current, fingerprint_error) = match fingerprint(&file.path) {
        Ok(fp) => (Some(fp), None),
        Err(e) => {
            warn!("{}: cannot fingerprint ({}), converting anyway", id.key, e);
            (None, Some(e.to_string()))
        }
    };

    let (plan, resolution) = match &job.store {
        None => (Plan::Convert(ConvertReason::Forced), None),
        Some(store) => {
            let store = lock(store);
            let resolution = store.resolve(&job.space, &id, current.as_ref());
            let artifacts = Artifacts {
                expected: match &intermediate_path {
                    Some(pdf) => ArtifactState::observe(pdf).is_present(),
                    None => markdown_path.is_file(),
                },
                companion: intermediate_path.as_ref().map(|_| markdown_path.is_file()),
                recorded_output: resolution
                    .as_ref()
                    .and_then(|r| r.entry.output_path())
                    .is_some_and(Path::is_file),
            };
            (
                plan::decide(current.as_ref(), resolution.as_ref(), artifacts),
                resolution,
            )
        }
    };

    let converted = match plan {
        Plan::Convert(reason) => FileAction::Converted { reason },
        Plan::ParseOnly => FileAction::ParsedOnly,
        Plan::Skip(reason) => {
            let output = if markdown_path.is_file() {
                Some(markdown_path.clone())
            } else {
                resolution
                    .as_ref()
                    .and_then(|r| r.entry.output_path())
                    .map(Path::to_path_buf)
            };
            if let Some(res) = &resolution {
                tidy_on_skip(job, &id, res, reason, output.as_deref());
            }
            info!("{}: skipped ({:?})", id.key, reason);
            job.progress.on_file_skipped(&id.key, reason);
            return finish(FileAction::Skipped { reason }, output, None);
        }
    };

    info!("{}: {}", id.key, plan);
    job.progress.on_file_start(&id.key, plan);

    let target = ParseTarget {
        markdown_dir: layout.output_dir.clone(),
        image_dir: layout.image_dir.clone(),
        stem,
    };
    let (result, intermediate_state, intermediate_left) =
        run_pipeline(job, file, plan, &layout, &target, intermediate_path.as_deref());

    let status = match (&fingerprint_error, &result) {
        (Some(e), _) => ConversionStatus::Error(format!("fingerprint failed: {e}")),
        (None, Ok(_)) => ConversionStatus::Success,
        (None, Err(Failure::NoOutput(detail))) => {
            debug!("{}: {}", id.key, detail);
            ConversionStatus::Failed
        }
        (None, Err(Failure::Fault(e))) => ConversionStatus::Error(e.to_string()),
    };
    let mut record = ConversionRecord::new(current, status).with_intermediate(intermediate_state);
    if let Ok(md) = &result {
        record = record.with_output(md.clone());
    }
    job.update_store(|store| {
        store.write_authoritative(&job.space, &id, resolution.as_ref(), record);
    });

    match result {
        Ok(md) => {
            info!("{}: wrote {}", id.key, md.display());
            job.progress.on_file_complete(&id.key, Some(&md));
            finish(converted, Some(md), intermediate_left)
        }
        Err(Failure::NoOutput(detail)) => {
            warn!("{}: failed: {}", id.key, detail);
            job.progress.on_file_error(&id.key, &detail);
            finish(FileAction::Failed { detail }, None, intermediate_left)
        }
        Err(Failure::Fault(error)) => {
            warn!("{}", error);
            job.progress.on_file_error(&id.key, &error.to_string());
            finish(FileAction::Errored { error }, None, intermediate_left)
        }
    }
}

/// Converter (office, full conversion) then parser.
///
/// Returns the Markdown path or the failure, plus the intermediate PDF's
/// state and its path when one is left on disk.
fn run_pipeline(
    job: &Job,
    file: &SourceFile,
    plan: Plan,
    layout: &Layout,
    target: &ParseTarget,
    intermediate: Option<&Path>,
) -> (Result<PathBuf, Failure>, ArtifactState, Option<PathBuf>) {
    let io_fault = |path: &Path, e: std::io::Error| {
        Failure::Fault(FileError::Io {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    };

    let pdf = match (file.kind, plan, intermediate) {
        (SourceKind::Pdf, _, _) => file.path.clone(),
        (SourceKind::Office, Plan::ParseOnly, Some(existing)) => existing.to_path_buf(),
        (SourceKind::Office, _, _) => {
            let Some(converter) = &job.converter else {
                return (
                    Err(Failure::NoOutput("office converter unavailable".into())),
                    ArtifactState::Absent,
                    None,
                );
            };
            if let Err(e) = fs::create_dir_all(&layout.intermediate_dir) {
                return (
                    Err(io_fault(&layout.intermediate_dir, e)),
                    ArtifactState::Absent,
                    None,
                );
            }
            match converter.convert(&file.path, &layout.intermediate_dir) {
                Ok(Some(pdf)) => pdf,
                Ok(None) => {
                    return (
                        Err(Failure::NoOutput(format!(
                            "{} produced no PDF",
                            converter.name()
                        ))),
                        ArtifactState::Absent,
                        None,
                    )
                }
                Err(e) => {
                    return (
                        Err(Failure::Fault(FileError::Convert {
                            path: file.path.clone(),
                            detail: e.to_string(),
                        })),
                        ArtifactState::Absent,
                        None,
                    )
                }
            }
        }
    };

    let (state, left) = if file.kind == SourceKind::Office {
        let state = ArtifactState::observe(&pdf);
        (state, state.is_present().then(|| pdf.clone()))
    } else {
        (ArtifactState::Absent, None)
    };

    if let Err(e) = fs::create_dir_all(&target.markdown_dir) {
        return (Err(io_fault(&target.markdown_dir, e)), state, left);
    }

    let result = match job.parser.parse(&pdf, target) {
        Ok(doc) if doc.markdown_path.is_file() => Ok(doc.markdown_path),
        Ok(doc) => Err(Failure::NoOutput(format!(
            "{} reported success but {} is missing",
            job.parser.name(),
            doc.markdown_path.display()
        ))),
        Err(e) => Err(Failure::Fault(FileError::Parse {
            path: file.path.clone(),
            detail: e.to_string(),
        })),
    };
    (result, state, left)
}

/// On skip: move a record found under a legacy or stale key to the canonical
/// key, and record a companion-satisfied intermediate as a placeholder.
fn tidy_on_skip(
    job: &Job,
    id: &FileIdentity,
    res: &Resolution,
    reason: SkipReason,
    output: Option<&Path>,
) {
    let placeholder = reason == SkipReason::SatisfiedByCompanion
        && res.entry.intermediate() != ArtifactState::Placeholder;
    if !res.needs_migration() && !placeholder {
        return;
    }
    let mut record = res.entry.clone().into_record();
    if placeholder {
        record.intermediate = ArtifactState::Placeholder;
    }
    if record.output_path.is_none() {
        record.output_path = output.map(Path::to_path_buf);
    }
    if res.needs_migration() {
        info!("{}: record migrated from '{}'", id.key, res.key);
    }
    job.update_store(|store| {
        store.write_authoritative(&job.space, id, Some(res), record);
    });
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn create_dir(dir: &Path) -> Result<(), Doc2MdError> {
    fs::create_dir_all(dir).map_err(|source| Doc2MdError::CreateDirFailed {
        path: dir.to_path_buf(),
        source,
    })
}

fn remove_intermediate_dir(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => debug!("Removed intermediate directory {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Could not remove intermediate directory {}: {}",
            dir.display(),
            e
        ),
    }
}

/// `file`'s directory relative to `root`, when it lives under it.
fn relative_dir(root: &Path, file: &Path) -> Option<PathBuf> {
    let root = fs::canonicalize(root).ok()?;
    let parent = fs::canonicalize(file).ok()?.parent()?.to_path_buf();
    parent.strip_prefix(&root).ok().map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_dir_inside_and_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("src");
        fs::create_dir_all(root.join("a/b")).unwrap();
        let inner = root.join("a/b/x.pdf");
        fs::write(&inner, b"x").unwrap();
        let outer = dir.path().join("y.pdf");
        fs::write(&outer, b"y").unwrap();

        assert_eq!(relative_dir(&root, &inner), Some(PathBuf::from("a/b")));
        assert_eq!(relative_dir(&root, &outer), None);
    }

    #[test]
    fn poisoned_store_lock_is_recovered() {
        let store = Arc::new(Mutex::new(ConversionStore::in_memory()));
        let clone = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("worker panic");
        })
        .join();
        assert!(store.is_poisoned());
        assert!(lock(&store).is_empty());
    }
}
