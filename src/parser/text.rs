use std::panic;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Renders the visible text of a document, one string per logical page.
pub trait TextLayer: Send + Sync {
    fn page_texts(&self, path: &Path) -> Result<Vec<String>>;
}

/// PDF text layer backed by the pdf-extract crate.
pub struct PdfTextLayer;

impl TextLayer for PdfTextLayer {
    fn page_texts(&self, path: &Path) -> Result<Vec<String>> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        // pdf-extract panics on some malformed files instead of returning Err.
        match panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(&bytes)) {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(anyhow!("PDF parsing failed for {}: {}", path.display(), e)),
            Err(payload) => Err(anyhow!(
                "PDF parsing panicked for {}: {}",
                path.display(),
                panic_message(payload.as_ref())
            )),
        }
    }
}

/// Text of a caught panic payload, when it carries one.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
