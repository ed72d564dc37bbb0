//! PDF → Markdown with pdfium, falling back to a vision LLM for scanned pages.
//!
//! ## Classification
//!
//! Each page is classified on its own:
//!
//! * **text page**: the text layer has at least `min_text_chars`
//!   non-whitespace characters. The text is emitted directly and every
//!   embedded raster image is extracted to the image directory and linked.
//! * **scanned page**: no usable text layer but some content. The page is
//!   rasterised and transcribed by the vision model, with exponential
//!   backoff between retries (`retry_backoff_ms * 2^attempt`).
//! * **blank page**: no text and no objects. Skipped.
//!
//! ## Threading
//!
//! `parse` is blocking. It is called from `spawn_blocking`, where it drives
//! the async LLM client with `Handle::block_on`. Outside a runtime it builds
//! a private current-thread runtime.

use super::{markdown, write_markdown, DocumentParser, ParseMethod, ParseTarget, ParsedDocument};
use crate::config::VisionConfig;
use crate::error::BackendError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default model when a provider is chosen by name without one.
const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Embedded images smaller than this on either side are decoration.
const MIN_IMAGE_EDGE: u32 = 16;

/// System prompt for transcribing one scanned page.
pub const TRANSCRIBE_PROMPT: &str = r#"You transcribe a scanned document page into Markdown.

- Reproduce all text faithfully in natural reading order.
- Use # headings, lists, **bold** and *italic* as they appear visually.
- Render tables as GitHub pipe tables.
- Render formulas in LaTeX ($inline$, $$display$$).
- Skip page numbers and running headers or footers.
- Output only the Markdown. No code fences around it, no commentary."#;

/// pdfium-backed [`DocumentParser`] with vision-LLM OCR.
pub struct VisionParser {
    config: VisionConfig,
    provider: OnceLock<Arc<dyn LLMProvider>>,
}

impl VisionParser {
    pub fn new(config: VisionConfig) -> Self {
        let provider = OnceLock::new();
        if let Some(p) = &config.provider {
            let _ = provider.set(Arc::clone(p));
        }
        Self { config, provider }
    }

    pub fn config(&self) -> &VisionConfig {
        &self.config
    }

    /// The LLM provider, resolved on first use so text-only batches never
    /// need API credentials.
    fn provider(&self) -> Result<Arc<dyn LLMProvider>, BackendError> {
        if let Some(p) = self.provider.get() {
            return Ok(Arc::clone(p));
        }
        let resolved = resolve_provider(&self.config)?;
        let _ = self.provider.set(Arc::clone(&resolved));
        Ok(resolved)
    }

    fn transcribe(&self, page_num: usize, image: &DynamicImage) -> Result<String, BackendError> {
        let provider = self.provider()?;
        let image_data = encode_png(image)?;
        let prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(TRANSCRIBE_PROMPT);
        let messages = vec![
            ChatMessage::system(prompt),
            ChatMessage::user_with_images("", vec![image_data]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            ..Default::default()
        };
        let max_retries = self.config.max_retries;
        let backoff_ms = self.config.retry_backoff_ms;

        block_on(async move {
            let mut last_err = String::from("no attempt made");
            for attempt in 0..=max_retries {
                if attempt > 0 {
                    let wait = backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
                    warn!(
                        "Page {}: retry {}/{} after {}ms",
                        page_num, attempt, max_retries, wait
                    );
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                }
                match provider.chat(&messages, Some(&options)).await {
                    Ok(response) => {
                        debug!(
                            "Page {}: transcribed ({} in / {} out tokens)",
                            page_num, response.prompt_tokens, response.completion_tokens
                        );
                        return Ok(markdown::strip_outer_fence(&response.content));
                    }
                    Err(e) => {
                        warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                        last_err = e.to_string();
                    }
                }
            }
            Err(BackendError::Llm(format!(
                "page {page_num}: {} attempt(s) failed, last error: {last_err}",
                max_retries + 1
            )))
        })?
    }
}

impl DocumentParser for VisionParser {
    fn name(&self) -> &str {
        "pdfium+vision"
    }

    fn parse(&self, pdf: &Path, target: &ParseTarget) -> Result<ParsedDocument, BackendError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| BackendError::Pdf(format!("{}: {e}", pdf.display())))?;
        let pages = document.pages();
        let total = pages.len() as usize;
        if total == 0 {
            return Err(BackendError::Pdf(format!("{}: no pages", pdf.display())));
        }
        info!("Parsing {} ({} pages)", pdf.display(), total);

        let mut sections: Vec<String> = Vec::with_capacity(total);
        let mut images: Vec<PathBuf> = Vec::new();
        let (mut text_pages, mut scanned_pages) = (0usize, 0usize);

        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;
            let text = page.text().map(|t| t.all()).unwrap_or_default();

            if has_text_layer(&text, self.config.min_text_chars) {
                text_pages += 1;
                let mut section = markdown::text_layer_to_markdown(&text);
                for (n, img) in page_images(&page).into_iter().enumerate() {
                    let path = target
                        .image_dir
                        .join(image_file_name(&target.stem, page_num, n + 1));
                    save_png(&img, &path)?;
                    section.push_str(&format!(
                        "\n\n![{} page {} image {}]({})",
                        target.stem,
                        page_num,
                        n + 1,
                        target.image_link(&path)
                    ));
                    images.push(path);
                }
                sections.push(section);
            } else if page.objects().len() == 0 {
                debug!("Page {}: blank, skipped", page_num);
            } else {
                scanned_pages += 1;
                let width = self.config.render_width(page.width().value);
                let render = PdfRenderConfig::new()
                    .set_target_width(width as i32)
                    .set_maximum_height(self.config.max_rendered_pixels as i32);
                let image = page
                    .render_with_config(&render)
                    .map_err(|e| BackendError::Pdf(format!("page {page_num}: render failed: {e}")))?
                    .as_image();
                debug!(
                    "Page {}: scanned, rendered {}x{}",
                    page_num,
                    image.width(),
                    image.height()
                );
                sections.push(self.transcribe(page_num, &image)?);
            }
        }

        let method = match (text_pages, scanned_pages) {
            (_, 0) => ParseMethod::Text,
            (0, _) => ParseMethod::Ocr,
            _ => ParseMethod::Mixed,
        };
        let markdown_path = target.markdown_path();
        write_markdown(&markdown_path, &markdown::clean_document(&sections.join("\n\n")))?;
        info!(
            "Wrote {} ({:?}: {} text, {} scanned, {} image(s))",
            markdown_path.display(),
            method,
            text_pages,
            scanned_pages,
            images.len()
        );

        Ok(ParsedDocument {
            markdown_path,
            images,
            method,
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Bind to the pdfium shared library: `PDFIUM_LIB_PATH` (file or directory)
/// first, then the working directory, then the system library path.
fn bind_pdfium() -> Result<Pdfium, BackendError> {
    if let Ok(configured) = std::env::var("PDFIUM_LIB_PATH") {
        if !configured.is_empty() {
            let path = PathBuf::from(configured);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            return Pdfium::bind_to_library(&lib).map(Pdfium::new).map_err(|e| {
                BackendError::Pdf(format!("cannot load pdfium from {}: {e}", lib.display()))
            });
        }
    }
    let local = Pdfium::pdfium_platform_library_name_at_path("./");
    Pdfium::bind_to_library(&local)
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| {
            BackendError::Pdf(format!(
                "pdfium library not found ({e}); set PDFIUM_LIB_PATH to libpdfium"
            ))
        })
}

/// Same order as the library's other entry points: explicit provider name,
/// `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, OpenAI when its key is set,
/// then full auto-detection.
fn resolve_provider(config: &VisionConfig) -> Result<Arc<dyn LLMProvider>, BackendError> {
    if let Some(name) = &config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }
    if let (Ok(name), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !name.is_empty() && !model.is_empty() {
            return create_provider(&name, &model);
        }
    }
    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider("openai", model);
    }
    let (llm, _) = ProviderFactory::from_env()
        .map_err(|e| BackendError::Llm(format!("no vision provider configured: {e}")))?;
    Ok(llm)
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, BackendError> {
    ProviderFactory::create_llm_provider(name, model)
        .map_err(|e| BackendError::Llm(format!("provider '{name}' ({model}): {e}")))
}

fn block_on<F: Future>(fut: F) -> Result<F::Output, BackendError> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(handle.block_on(fut)),
        Err(_) => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            Ok(rt.block_on(fut))
        }
    }
}

/// Enough non-whitespace characters to trust the text layer.
fn has_text_layer(text: &str, min_chars: usize) -> bool {
    min_chars > 0 && text.chars().filter(|c| !c.is_whitespace()).count() >= min_chars
}

fn page_images(page: &PdfPage<'_>) -> Vec<DynamicImage> {
    let mut out = Vec::new();
    for object in page.objects().iter() {
        let Some(image_object) = object.as_image_object() else {
            continue;
        };
        match image_object.get_raw_image() {
            Ok(img) if img.width() >= MIN_IMAGE_EDGE && img.height() >= MIN_IMAGE_EDGE => {
                out.push(img)
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable embedded image: {}", e),
        }
    }
    out
}

fn image_file_name(stem: &str, page_num: usize, n: usize) -> String {
    format!("{stem}_p{page_num}_{n}.png")
}

fn save_png(img: &DynamicImage, path: &Path) -> Result<(), BackendError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    img.save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| BackendError::Other(format!("{}: {e}", path.display())))
}

/// PNG + base64, `detail: high` so small print survives the model's tiling.
fn encode_png(img: &DynamicImage) -> Result<ImageData, BackendError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| BackendError::Other(format!("PNG encode failed: {e}")))?;
    Ok(ImageData::new(STANDARD.encode(&buf), "image/png").with_detail("high"))
}
