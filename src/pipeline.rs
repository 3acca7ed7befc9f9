use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::discovery;
use crate::fetch::{CachedFile, DocumentCache};
use crate::parser::text::{panic_message, TextLayer};
use crate::parser::DocumentExtractor;
use crate::session::PageSession;
use crate::snapshot::{self, PriceRecord, SnapshotStore};

/// Summary of one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub documents: usize,
    pub fetched: usize,
    pub fetch_failures: usize,
    pub unreadable: usize,
    pub records: usize,
}

/// Discovery → fetch → extraction → sort → snapshot, for one run.
/// Nothing is written unless every step before persistence succeeded.
pub async fn run_once<S: PageSession + ?Sized>(
    session: &mut S,
    text_layer: Arc<dyn TextLayer>,
    settings: &Settings,
) -> Result<RunStats> {
    let t0 = Instant::now();
    let url = &settings.bulletin_url;

    info!(%url, "Loading bulletin page");
    session.navigate(url).await?;
    auto_scroll(session, settings.scroll_step, settings.max_scroll_steps).await?;

    let frames = session.frames().await.context("Failed to enumerate frames")?;
    let docs = discovery::discover(&frames);
    if docs.is_empty() {
        warn!(%url, "No attached documents found");
    }

    let cache = DocumentCache::new(&settings.pdf_dir);
    let files = fetch_all(session, &cache, &docs).await?;

    let mut stats = RunStats {
        documents: docs.len(),
        fetched: files.len(),
        fetch_failures: docs.len() - files.len(),
        ..RunStats::default()
    };

    // Parsing and the snapshot write are blocking work; keep them off the runtime.
    let format = settings.row_format;
    let store = SnapshotStore::new(&settings.cache_file);
    let (records, unreadable) = tokio::task::spawn_blocking(move || -> Result<(usize, usize)> {
        let extractor = DocumentExtractor::new(text_layer.as_ref(), format);
        let (mut records, unreadable) = extract_all(&extractor, &files);
        snapshot::sort_by_date_desc(&mut records);
        store.write(&records)?;
        Ok((records.len(), unreadable))
    })
    .await
    .map_err(|err| anyhow!("extraction task join error: {err}"))??;
    stats.unreadable = unreadable;
    stats.records = records;

    info!(
        documents = stats.documents,
        fetched = stats.fetched,
        failed = stats.fetch_failures,
        unreadable = stats.unreadable,
        records = stats.records,
        elapsed_s = t0.elapsed().as_secs_f64(),
        "Prices updated"
    );
    Ok(stats)
}

/// Scroll in fixed steps until the distance covered reaches the page's
/// current scroll height, so lazily loaded content is present before
/// discovery. `max_steps` stops pages that grow forever.
pub async fn auto_scroll<S: PageSession + ?Sized>(
    session: &mut S,
    step: u64,
    max_steps: usize,
) -> Result<u64> {
    let mut scrolled = 0u64;
    for _ in 0..max_steps {
        let height = session.scroll_height().await?;
        session.scroll_by(step).await?;
        scrolled += step;
        if scrolled >= height {
            return Ok(scrolled);
        }
    }
    warn!(scrolled, max_steps, "Page still growing, stopped scrolling");
    Ok(scrolled)
}

/// Download sequentially, in discovery order, numbering documents from 1.
async fn fetch_all<S: PageSession + ?Sized>(
    session: &S,
    cache: &DocumentCache,
    docs: &[discovery::DiscoveredDocument],
) -> Result<Vec<CachedFile>> {
    let pb = ProgressBar::new(docs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let mut files = Vec::with_capacity(docs.len());
    for (i, doc) in docs.iter().enumerate() {
        pb.set_message(doc.label.clone());
        if let Some(file) = cache.fetch(session, i + 1, &doc.label, &doc.link).await? {
            debug!(index = file.index, file = %file.filename, "Document ready");
            files.push(file);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(files)
}

/// Extract every file in parallel; records come back in file order.
/// Files the text layer cannot read, or panics on, are logged and left out.
fn extract_all(extractor: &DocumentExtractor<'_>, files: &[CachedFile]) -> (Vec<PriceRecord>, usize) {
    let results: Vec<_> = files
        .par_iter()
        .map(|f| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| extractor.extract(&f.path)))
                .unwrap_or_else(|payload| {
                    Err(anyhow!("text layer panicked: {}", panic_message(payload.as_ref())))
                });
            (f, result)
        })
        .collect();

    let mut records = Vec::new();
    let mut unreadable = 0;
    for (file, result) in results {
        match result {
            Ok(rs) => records.extend(rs),
            Err(e) => {
                unreadable += 1;
                warn!(path = %file.path.display(), "Skipping unreadable document: {:#}", e);
            }
        }
    }
    (records, unreadable)
}
