//! Configuration types.
//!
//! [`BatchConfig`] controls a batch run (where files come from, where
//! artifacts go, where the conversion store lives, how many files at once).
//! [`VisionConfig`] controls the built-in [`crate::backend::VisionParser`].
//! Both are built through a builder that clamps numeric knobs and validates in
//! `build()`.

use crate::error::Doc2MdError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default location of the conversion store.
pub const DEFAULT_STORE_PATH: &str = "./file_hashes.json";

// ── BatchConfig ──────────────────────────────────────────────────────────

/// Configuration for a batch (or single-file) run.
///
/// # Example
/// ```rust
/// use edgequake_doc2md::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .source_dir("inbox")
///     .output_dir("md")
///     .recursive(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.image_dir, std::path::PathBuf::from("md/images"));
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Root of the candidate files. Default: `source`.
    pub source_dir: PathBuf,

    /// Final Markdown goes here, mirrored in recursive mode. Default: `md`.
    pub output_dir: PathBuf,

    /// Extracted images go here, mirrored in recursive mode.
    /// Default: `<output_dir>/images`.
    pub image_dir: PathBuf,

    /// Intermediate PDFs from office files. Removed at the end of a batch
    /// unless `keep_intermediates`. Default: `tmp_pdf`.
    pub intermediate_dir: PathBuf,

    /// Conversion store document. `None` is force mode: every file is
    /// converted and the store is neither read nor written.
    pub store_path: Option<PathBuf>,

    /// Walk the whole subtree instead of direct children. Default: false.
    pub recursive: bool,

    /// Leave the intermediate directory in place after the run. Default: false.
    pub keep_intermediates: bool,

    /// Files processed at once. Default: 1 (sequential).
    pub concurrency: usize,

    /// Observer for per-file events. `None` disables callbacks.
    pub progress_callback: Option<ProgressCallback>,

    /// Set to stop starting new files. Files already in flight finish and
    /// are recorded.
    pub abort: Arc<AtomicBool>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("source"),
            output_dir: PathBuf::from("md"),
            image_dir: PathBuf::from("md").join("images"),
            intermediate_dir: PathBuf::from("tmp_pdf"),
            store_path: Some(PathBuf::from(DEFAULT_STORE_PATH)),
            recursive: false,
            keep_intermediates: false,
            concurrency: 1,
            progress_callback: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("source_dir", &self.source_dir)
            .field("output_dir", &self.output_dir)
            .field("image_dir", &self.image_dir)
            .field("intermediate_dir", &self.intermediate_dir)
            .field("store_path", &self.store_path)
            .field("recursive", &self.recursive)
            .field("keep_intermediates", &self.keep_intermediates)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .field("abort", &self.abort.load(Ordering::Relaxed))
            .finish()
    }
}

impl BatchConfig {
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
            image_dir_set: false,
        }
    }

    /// Force mode: the store is bypassed.
    pub fn is_forced(&self) -> bool {
        self.store_path.is_none()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

/// Builder for [`BatchConfig`].
pub struct BatchConfigBuilder {
    config: BatchConfig,
    image_dir_set: bool,
}

impl BatchConfigBuilder {
    pub fn source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.source_dir = dir.into();
        self
    }

    /// Also moves the default image directory unless one was set explicitly.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        if !self.image_dir_set {
            self.config.image_dir = self.config.output_dir.join("images");
        }
        self
    }

    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_dir = dir.into();
        self.image_dir_set = true;
        self
    }

    pub fn intermediate_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.intermediate_dir = dir.into();
        self
    }

    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = Some(path.into());
        self
    }

    /// `true` bypasses the store entirely.
    pub fn force(mut self, force: bool) -> Self {
        if force {
            self.config.store_path = None;
        } else if self.config.store_path.is_none() {
            self.config.store_path = Some(PathBuf::from(DEFAULT_STORE_PATH));
        }
        self
    }

    pub fn recursive(mut self, v: bool) -> Self {
        self.config.recursive = v;
        self
    }

    pub fn keep_intermediates(mut self, v: bool) -> Self {
        self.config.keep_intermediates = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.clamp(1, 64);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.config.abort = flag;
        self
    }

    /// Build, rejecting layouts where removing the intermediate directory
    /// would delete sources or outputs.
    pub fn build(self) -> Result<BatchConfig, Doc2MdError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(Doc2MdError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        let tmp = lexical(&c.intermediate_dir);
        if tmp.as_os_str().is_empty() || tmp == Path::new("/") {
            return Err(Doc2MdError::InvalidConfig(format!(
                "Intermediate directory '{}' is not a usable scratch location",
                c.intermediate_dir.display()
            )));
        }
        for (label, dir) in [("source", &c.source_dir), ("output", &c.output_dir)] {
            if lexical(dir).starts_with(&tmp) {
                return Err(Doc2MdError::InvalidConfig(format!(
                    "Intermediate directory '{}' contains the {} directory '{}'; it is deleted after each run",
                    c.intermediate_dir.display(),
                    label,
                    dir.display()
                )));
            }
        }
        Ok(self.config)
    }
}

/// Absolute, `.`/`..`-free form for containment checks.
fn lexical(path: &Path) -> PathBuf {
    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_default()
    };
    let mut out = PathBuf::new();
    for comp in base.join(path).components() {
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

// ── VisionConfig ─────────────────────────────────────────────────────────

/// Configuration for the pdfium + vision-LLM document parser.
#[derive(Clone)]
pub struct VisionConfig {
    /// Rendering DPI for scanned pages. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest edge of a rendered page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// A page with fewer extractable characters than this is treated as
    /// scanned. Default: 16.
    pub min_text_chars: usize,

    /// LLM model identifier. `None` uses the provider default.
    pub model: Option<String>,

    /// LLM provider name ("openai", "anthropic", "ollama", ...).
    pub provider_name: Option<String>,

    /// Pre-constructed provider; takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Max tokens per transcribed page. Default: 4096.
    pub max_tokens: usize,

    /// Retries per page on LLM failure. Default: 3.
    pub max_retries: u32,

    /// Initial backoff; doubles per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Override for the transcription system prompt.
    pub system_prompt: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            min_text_chars: 16,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("min_text_chars", &self.min_text_chars)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl VisionConfig {
    pub fn builder() -> VisionConfigBuilder {
        VisionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Pixel width for a page `width_pts` wide (1/72 in) at the configured
    /// DPI, capped at `max_rendered_pixels`.
    pub fn render_width(&self, width_pts: f32) -> u32 {
        let px = (width_pts / 72.0 * self.dpi as f32).round() as u32;
        px.clamp(1, self.max_rendered_pixels)
    }
}

/// Builder for [`VisionConfig`].
#[derive(Debug)]
pub struct VisionConfigBuilder {
    config: VisionConfig,
}

impl VisionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn build(self) -> Result<VisionConfig, Doc2MdError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Doc2MdError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_tokens == 0 {
            return Err(Doc2MdError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}
