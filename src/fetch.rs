use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::session::PageSession;

const LABEL_PREFIX_CHARS: usize = 20;

/// A downloaded bulletin document on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub index: usize,
    pub filename: String,
    pub path: PathBuf,
}

/// Local directory of downloaded documents. A file's presence under its
/// derived name is the whole cache check: no hash, no stored URL.
#[derive(Debug, Clone)]
pub struct DocumentCache {
    dir: PathBuf,
}

impl DocumentCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Return the cached copy of a document, downloading it first if needed.
    /// `Ok(None)` means the download failed and the document should be
    /// skipped; `Err` is reserved for local I/O problems.
    pub async fn fetch<S: PageSession + ?Sized>(
        &self,
        session: &S,
        index: usize,
        label: &str,
        url: &Url,
    ) -> Result<Option<CachedFile>> {
        let filename = file_name(index, label);
        let path = self.dir.join(&filename);
        let cached = CachedFile {
            index,
            filename,
            path: path.clone(),
        };

        let exists = tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to check cache for {}", path.display()))?;
        if exists {
            debug!(path = %path.display(), "Already cached");
            return Ok(Some(cached));
        }

        let response = match session.fetch(url).await {
            Ok(r) => r,
            Err(e) => {
                warn!(%url, "Download failed: {:#}", e);
                return Ok(None);
            }
        };
        if !response.is_success() {
            warn!(%url, status = response.status, "Download rejected");
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        // Written under a temporary name so an interrupted download is never
        // mistaken for a cached document.
        let partial = path.with_extension("pdf.part");
        tokio::fs::write(&partial, &response.body)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        tokio::fs::rename(&partial, &path)
            .await
            .with_context(|| format!("Failed to move {} into place", partial.display()))?;

        info!(path = %path.display(), bytes = response.body.len(), "Downloaded document");
        Ok(Some(cached))
    }
}

/// `{index}_{label prefix}.pdf`, the first 20 characters of the label with
/// spaces turned into underscores. Other characters, other whitespace
/// included, are kept as-is. Different labels can collide.
pub fn file_name(index: usize, label: &str) -> String {
    let prefix: String = label
        .chars()
        .take(LABEL_PREFIX_CHARS)
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    format!("{}_{}.pdf", index, prefix)
}
