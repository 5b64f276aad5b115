//! Text extraction pipeline.
//!
//! Extraction is best effort and never fails: an ordered list of strategies
//! is tried, the first non-blank result wins, and a strategy that errors is
//! logged and counted as having produced nothing.
//!
//! 1. [`Strategy::Native`]: the embedded text layer, page by page.
//! 2. [`Strategy::Ocr`]: every page rasterized and recognized, pages in
//!    parallel behind a semaphore, each under a timeout, reassembled in page
//!    order.
//!
//! Single pages ([`Extractor::extract_page`]) follow the same chain for just
//! that page.
//!
//! Pages are joined with [`PAGE_BREAK`], so page `n` of the stored text is
//! the `n`-th segment when split on it.

pub mod native;
pub mod ocr;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::ExtractionConfig;

pub use native::{PdfInfo, PdfTextLayer};
pub use ocr::{Pdftoppm, Tesseract};

/// Separator placed between pages of extracted text.
pub const PAGE_BREAK: &str = "\n\x0c\n";

/// Failures inside the pipeline. These never leave it: the pipeline logs
/// them and degrades to empty text.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("PDF parsing failed: {0}")]
    Pdf(String),

    #[error("{tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("page {page} timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction task failed: {0}")]
    Task(String),
}

/// Embedded text access. Synchronous; the pipeline runs it on the blocking
/// pool.
pub trait TextLayer: Send + Sync {
    /// Text of each page, in page order.
    fn pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractError>;

    /// Number of pages according to the document structure.
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractError>;
}

/// Renders one 1-based page to an image file inside `out_dir`.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(
        &self,
        pdf: &Path,
        page: usize,
        dpi: u32,
        out_dir: &Path,
    ) -> Result<PathBuf, ExtractError>;
}

/// Recognizes the text in an image file.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &Path, languages: &str) -> Result<String, ExtractError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Native,
    Ocr,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedText {
    pub text: String,
    pub method: ExtractionMethod,
    pub page_count: usize,
}

impl ExtractedText {
    pub fn processed(&self) -> bool {
        !self.text.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Native,
    Ocr,
}

/// Strategies tried by [`Extractor::extract`], in order.
pub const STRATEGIES: [Strategy; 2] = [Strategy::Native, Strategy::Ocr];

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub dpi: u32,
    pub languages: String,
    pub page_timeout: Duration,
    pub max_parallel_pages: usize,
}

impl From<&ExtractionConfig> for ExtractOptions {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.dpi,
            languages: config.languages.clone(),
            page_timeout: config.page_timeout(),
            max_parallel_pages: config.max_parallel_pages.max(1),
        }
    }
}

/// Runs the strategy chain over a stored PDF.
#[derive(Clone)]
pub struct Extractor {
    text_layer: Arc<dyn TextLayer>,
    rasterizer: Arc<dyn Rasterizer>,
    ocr: Arc<dyn OcrEngine>,
    options: ExtractOptions,
}

impl Extractor {
    pub fn new(
        text_layer: Arc<dyn TextLayer>,
        rasterizer: Arc<dyn Rasterizer>,
        ocr: Arc<dyn OcrEngine>,
        options: ExtractOptions,
    ) -> Self {
        Self {
            text_layer,
            rasterizer,
            ocr,
            options,
        }
    }

    /// `pdf-extract` + `lopdf` for the text layer, `pdftoppm` + `tesseract`
    /// for OCR.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(
            Arc::new(PdfTextLayer),
            Arc::new(Pdftoppm::new(&config.pdftoppm)),
            Arc::new(Tesseract::new(&config.tesseract)),
            ExtractOptions::from(config),
        )
    }

    /// Extracts the whole document. Never fails.
    pub async fn extract(&self, path: &Path) -> ExtractedText {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => Arc::new(b),
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read document for extraction: {e}");
                return ExtractedText {
                    text: String::new(),
                    method: ExtractionMethod::None,
                    page_count: 0,
                };
            }
        };

        let native_pages = self.native_pages(&bytes).await;
        let page_count = match self.structural_page_count(&bytes).await {
            Some(n) => n,
            None => native_pages.as_ref().map_or(0, Vec::len),
        };

        for strategy in STRATEGIES {
            let text = match strategy {
                Strategy::Native => match native_pages {
                    Some(ref pages) => join_pages(pages),
                    None => continue,
                },
                Strategy::Ocr => {
                    if page_count == 0 {
                        continue;
                    }
                    join_pages(&self.ocr_pages(path, page_count).await)
                }
            };
            if !text.is_empty() {
                tracing::info!(path = %path.display(), ?strategy, page_count, chars = text.len(), "extracted text");
                return ExtractedText {
                    text,
                    method: match strategy {
                        Strategy::Native => ExtractionMethod::Native,
                        Strategy::Ocr => ExtractionMethod::Ocr,
                    },
                    page_count,
                };
            }
            tracing::debug!(path = %path.display(), ?strategy, "strategy produced no text");
        }

        tracing::info!(path = %path.display(), page_count, "no text found");
        ExtractedText {
            text: String::new(),
            method: ExtractionMethod::None,
            page_count,
        }
    }

    /// Text of one 1-based page: native first, then OCR of that page alone.
    /// Out-of-range pages give `""`.
    pub async fn extract_page(&self, path: &Path, page: usize) -> String {
        if page == 0 {
            return String::new();
        }
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => Arc::new(b),
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read document: {e}");
                return String::new();
            }
        };

        let native_pages = self.native_pages(&bytes).await;
        let page_count = match self.structural_page_count(&bytes).await {
            Some(n) => n,
            None => native_pages.as_ref().map_or(0, Vec::len),
        };
        if page > page_count {
            return String::new();
        }

        if let Some(text) = native_pages.as_ref().and_then(|p| p.get(page - 1)) {
            if !text.trim().is_empty() {
                return text.trim().to_string();
            }
        }

        match run_ocr_page(
            Arc::clone(&self.rasterizer),
            Arc::clone(&self.ocr),
            self.options.clone(),
            path.to_path_buf(),
            page,
        )
        .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!(path = %path.display(), page, "page OCR failed: {e}");
                String::new()
            }
        }
    }

    /// Structure and document-info of the file.
    pub async fn inspect(&self, path: &Path) -> Result<PdfInfo, ExtractError> {
        let bytes = Arc::new(tokio::fs::read(path).await?);
        let for_info = Arc::clone(&bytes);
        let mut info = tokio::task::spawn_blocking(move || native::pdf_info(&for_info))
            .await
            .map_err(|e| ExtractError::Task(e.to_string()))??;
        info.has_text_layer = self
            .native_pages(&bytes)
            .await
            .is_some_and(|pages| pages.iter().any(|p| !p.trim().is_empty()));
        Ok(info)
    }

    async fn native_pages(&self, bytes: &Arc<Vec<u8>>) -> Option<Vec<String>> {
        let layer = Arc::clone(&self.text_layer);
        let bytes = Arc::clone(bytes);
        // pdf-extract may panic on malformed input; the join error contains it
        match tokio::task::spawn_blocking(move || layer.pages(&bytes)).await {
            Ok(Ok(pages)) => Some(pages),
            Ok(Err(e)) => {
                tracing::debug!("native text layer unavailable: {e}");
                None
            }
            Err(e) => {
                tracing::warn!("native text extraction aborted: {e}");
                None
            }
        }
    }

    async fn structural_page_count(&self, bytes: &Arc<Vec<u8>>) -> Option<usize> {
        let layer = Arc::clone(&self.text_layer);
        let bytes = Arc::clone(bytes);
        match tokio::task::spawn_blocking(move || layer.page_count(&bytes)).await {
            Ok(Ok(n)) => Some(n),
            Ok(Err(e)) => {
                tracing::debug!("page count unavailable: {e}");
                None
            }
            Err(e) => {
                tracing::warn!("page count aborted: {e}");
                None
            }
        }
    }

    /// OCR of pages `1..=page_count`; failed pages come back empty.
    async fn ocr_pages(&self, path: &Path, page_count: usize) -> Vec<String> {
        let permits = Arc::new(Semaphore::new(self.options.max_parallel_pages));
        let mut tasks = JoinSet::new();

        for page in 1..=page_count {
            let permits = Arc::clone(&permits);
            let rasterizer = Arc::clone(&self.rasterizer);
            let ocr = Arc::clone(&self.ocr);
            let options = self.options.clone();
            let path = path.to_path_buf();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => run_ocr_page(rasterizer, ocr, options, path, page).await,
                    Err(e) => Err(ExtractError::Task(e.to_string())),
                };
                (page, result)
            });
        }

        let mut pages = vec![String::new(); page_count];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((page, Ok(text))) => pages[page - 1] = text,
                Ok((page, Err(e))) => {
                    tracing::warn!(path = %path.display(), page, "page OCR failed: {e}")
                }
                Err(e) => tracing::warn!(path = %path.display(), "page OCR task aborted: {e}"),
            }
        }
        pages
    }
}

async fn run_ocr_page(
    rasterizer: Arc<dyn Rasterizer>,
    ocr: Arc<dyn OcrEngine>,
    options: ExtractOptions,
    path: PathBuf,
    page: usize,
) -> Result<String, ExtractError> {
    let work = async {
        let scratch = tempfile::tempdir()?;
        let image = rasterizer
            .rasterize(&path, page, options.dpi, scratch.path())
            .await?;
        ocr.recognize(&image, &options.languages).await
    };
    match tokio::time::timeout(options.page_timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(ExtractError::Timeout {
            page,
            secs: options.page_timeout.as_secs(),
        }),
    }
}

/// Trimmed pages joined with [`PAGE_BREAK`]; `""` when no page has text.
pub fn join_pages(pages: &[String]) -> String {
    if pages.iter().all(|p| p.trim().is_empty()) {
        return String::new();
    }
    pages
        .iter()
        .map(|p| p.trim())
        .collect::<Vec<_>>()
        .join(PAGE_BREAK)
}

/// Splits stored text back into pages.
pub fn split_pages(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(PAGE_BREAK).collect()
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes the page number into the "image" file.
    pub struct FakeRasterizer {
        pub calls: AtomicUsize,
    }

    impl FakeRasterizer {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Rasterizer for FakeRasterizer {
        async fn rasterize(
            &self,
            _pdf: &Path,
            page: usize,
            _dpi: u32,
            out_dir: &Path,
        ) -> Result<PathBuf, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let image = out_dir.join(format!("page-{}.png", page));
            tokio::fs::write(&image, page.to_string()).await?;
            Ok(image)
        }
    }

    /// Reads the page number back and returns deterministic text. Pages in
    /// `fail` error, pages in `hang` never finish.
    pub struct FakeOcr {
        pub fail: HashSet<usize>,
        pub hang: HashSet<usize>,
        /// Later pages finish first.
        pub reverse_delay: bool,
    }

    impl FakeOcr {
        pub fn ok() -> Self {
            Self {
                fail: HashSet::new(),
                hang: HashSet::new(),
                reverse_delay: false,
            }
        }
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn recognize(&self, image: &Path, _languages: &str) -> Result<String, ExtractError> {
            let page: usize = tokio::fs::read_to_string(image)
                .await?
                .parse()
                .map_err(|_| ExtractError::Task("bad fake image".into()))?;
            if self.hang.contains(&page) {
                std::future::pending::<()>().await;
            }
            if self.reverse_delay {
                tokio::time::sleep(Duration::from_millis((20 - page.min(20)) as u64 * 5)).await;
            }
            if self.fail.contains(&page) {
                return Err(ExtractError::Tool {
                    tool: "fake".into(),
                    message: format!("page {} unreadable", page),
                });
            }
            Ok(format!("skannet side {} blodtrykk", page))
        }
    }

    pub fn options() -> ExtractOptions {
        ExtractOptions {
            dpi: 200,
            languages: "nor+eng".into(),
            page_timeout: Duration::from_millis(500),
            max_parallel_pages: 3,
        }
    }

    pub fn extractor(ocr: FakeOcr) -> (Extractor, Arc<FakeRasterizer>) {
        let raster = Arc::new(FakeRasterizer::new());
        let ex = Extractor::new(
            Arc::new(PdfTextLayer),
            raster.clone(),
            Arc::new(ocr),
            options(),
        );
        (ex, raster)
    }
}
