//! Rasterizer and OCR engine backed by the Poppler and Tesseract CLIs.
//!
//! Both spawn a child process with `kill_on_drop`, so a page timeout in the
//! pipeline also terminates the tool.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use super::{ExtractError, OcrEngine, Rasterizer};

/// Renders pages with `pdftoppm`.
pub struct Pdftoppm {
    program: PathBuf,
}

impl Pdftoppm {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Rasterizer for Pdftoppm {
    async fn rasterize(
        &self,
        pdf: &Path,
        page: usize,
        dpi: u32,
        out_dir: &Path,
    ) -> Result<PathBuf, ExtractError> {
        let prefix = out_dir.join(format!("page-{}", page));
        let page_arg = page.to_string();

        let output = Command::new(&self.program)
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&page_arg)
            .arg("-l")
            .arg(&page_arg)
            .arg("-singlefile")
            .arg("-png")
            .arg(pdf)
            .arg(&prefix)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&self.program, e))?;
        check_status(&self.program, &output)?;

        let image = prefix.with_extension("png");
        if !image.exists() {
            return Err(ExtractError::Tool {
                tool: tool_name(&self.program),
                message: format!("no image produced for page {}", page),
            });
        }
        Ok(image)
    }
}

/// Recognizes text with `tesseract <image> stdout -l <languages>`.
pub struct Tesseract {
    program: PathBuf,
}

impl Tesseract {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for Tesseract {
    async fn recognize(&self, image: &Path, languages: &str) -> Result<String, ExtractError> {
        let output = Command::new(&self.program)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(languages)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&self.program, e))?;
        check_status(&self.program, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

fn spawn_error(program: &Path, e: std::io::Error) -> ExtractError {
    ExtractError::Tool {
        tool: tool_name(program),
        message: format!("failed to start: {e}"),
    }
}

fn check_status(program: &Path, output: &Output) -> Result<(), ExtractError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ExtractError::Tool {
        tool: tool_name(program),
        message: format!("exited with {}: {}", output.status, stderr.trim()),
    })
}
