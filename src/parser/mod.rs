pub mod lines;
pub mod rows;
pub mod text;

use std::path::Path;

use anyhow::Result;
use tracing::{debug, trace};

use crate::snapshot::PriceRecord;
use rows::RowFormat;
use text::TextLayer;

/// Turns one downloaded bulletin into price records, in page then line order.
pub struct DocumentExtractor<'a> {
    layer: &'a dyn TextLayer,
    format: RowFormat,
}

impl<'a> DocumentExtractor<'a> {
    pub fn new(layer: &'a dyn TextLayer, format: RowFormat) -> Self {
        Self { layer, format }
    }

    pub fn extract(&self, path: &Path) -> Result<Vec<PriceRecord>> {
        let pages = self.layer.page_texts(path)?;
        let records = extract_pages(&pages, &self.format);
        debug!(
            path = %path.display(),
            pages = pages.len(),
            records = records.len(),
            "Extracted document"
        );
        Ok(records)
    }
}

/// Scan page texts top to bottom. A date marker applies to the rows that
/// follow it; rows seen earlier keep the date that was current for them.
pub fn extract_pages(pages: &[String], format: &RowFormat) -> Vec<PriceRecord> {
    let mut records = Vec::new();
    let mut current_date = String::new();

    for page in pages {
        if page.trim().is_empty() {
            continue;
        }
        for raw in page.lines() {
            let line = lines::classify_line(raw, format);
            if let Some(date) = line.date {
                current_date = date;
            }
            match line.row {
                Ok(row) => records.push(row.with_date(&current_date)),
                Err(reason) => trace!(line = raw, %reason, "Skipped line"),
            }
        }
    }

    records
}
