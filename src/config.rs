use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use reqwest::Url;

use crate::parser::rows::{ParseMode, RowFormat, RowLayout};

pub const BULLETIN_URL: &str = "https://www.pima.go.cr/boletin/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayoutArg {
    /// Unit doubles as wholesaler: `… unit min max mode avg`
    Five,
    /// `… unit wholesaler min max mode avg`
    Six,
    /// Six-field layout first, five-field when that fails
    Auto,
}

impl From<LayoutArg> for ParseMode {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Five => ParseMode::Fixed(RowLayout::Five),
            LayoutArg::Six => ParseMode::Fixed(RowLayout::Six),
            LayoutArg::Auto => ParseMode::SixThenFive,
        }
    }
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Bulletin page listing the attached documents
    #[arg(long, env = "PIMA_BULLETIN_URL", default_value = BULLETIN_URL, global = true)]
    pub bulletin_url: String,

    /// Directory holding downloaded documents
    #[arg(long, env = "PIMA_PDF_DIR", default_value = "pdfs", global = true)]
    pub pdf_dir: PathBuf,

    /// Snapshot file written by each run and served by `serve`
    #[arg(long, env = "PIMA_CACHE_FILE", default_value = "datos_cache.json", global = true)]
    pub cache_file: PathBuf,

    /// Row layout of the bulletin tables
    #[arg(long, env = "PIMA_ROW_LAYOUT", value_enum, default_value_t = LayoutArg::Five, global = true)]
    pub layout: LayoutArg,

    /// Minimum whitespace-separated tokens for a data row (default depends on layout)
    #[arg(long, env = "PIMA_MIN_TOKENS", global = true)]
    pub min_tokens: Option<usize>,

    /// Pixels advanced per auto-scroll step
    #[arg(long, env = "PIMA_SCROLL_STEP", default_value_t = 100, global = true)]
    pub scroll_step: u64,

    /// Upper bound on auto-scroll steps for pages that keep growing
    #[arg(long, env = "PIMA_MAX_SCROLL_STEPS", default_value_t = 10_000, global = true)]
    pub max_scroll_steps: usize,

    /// Seconds before a single HTTP request gives up
    #[arg(long, env = "PIMA_REQUEST_TIMEOUT_SECS", default_value_t = 60, global = true)]
    pub request_timeout_secs: u64,
}

/// Resolved configuration handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bulletin_url: Url,
    pub pdf_dir: PathBuf,
    pub cache_file: PathBuf,
    pub row_format: RowFormat,
    pub scroll_step: u64,
    pub max_scroll_steps: usize,
    pub request_timeout: Duration,
}

impl CommonArgs {
    pub fn settings(&self) -> Result<Settings> {
        let bulletin_url = Url::parse(&self.bulletin_url)
            .with_context(|| format!("invalid bulletin URL {}", self.bulletin_url))?;
        Ok(Settings {
            bulletin_url,
            pdf_dir: self.pdf_dir.clone(),
            cache_file: self.cache_file.clone(),
            row_format: RowFormat {
                mode: self.layout.into(),
                min_tokens: self.min_tokens,
            },
            scroll_step: self.scroll_step.max(1),
            max_scroll_steps: self.max_scroll_steps.max(1),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        })
    }
}
