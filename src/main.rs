mod config;
mod discovery;
mod fetch;
mod parser;
mod pipeline;
mod scheduler;
mod server;
mod session;
mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use config::{CommonArgs, Settings};
use parser::text::PdfTextLayer;
use parser::DocumentExtractor;
use session::HttpSession;
use snapshot::SnapshotStore;

#[derive(Parser)]
#[command(name = "pima_prices", about = "PIMA wholesale price bulletin scraper and API")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the bulletin once and rewrite the snapshot
    Run,
    /// Serve the snapshot over HTTP, refreshing it periodically
    Serve {
        /// Address to bind the HTTP server to (host:port)
        #[arg(long, env = "PIMA_BIND", default_value = "0.0.0.0:5000")]
        bind: String,
        /// Hours between bulletin updates
        #[arg(long, env = "PIMA_INTERVAL_HOURS", default_value_t = 24)]
        interval_hours: u64,
    },
    /// Parse local documents and print the extracted rows
    Extract {
        /// Documents to parse
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the current snapshot
    Show {
        /// Only products containing this text (case-insensitive)
        #[arg(short, long)]
        product: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = cli.common.settings()?;

    let result = match cli.command {
        Commands::Run => {
            let stats = run_pipeline(&settings).await?;
            println!(
                "Saved {} prices from {} documents ({} downloaded, {} failed, {} unreadable) to '{}'.",
                stats.records,
                stats.documents,
                stats.fetched,
                stats.fetch_failures,
                stats.unreadable,
                settings.cache_file.display()
            );
            Ok(())
        }
        Commands::Serve { bind, interval_hours } => {
            serve(&settings, &bind, Duration::from_secs(interval_hours.max(1) * 3600)).await
        }
        Commands::Extract { files, json } => {
            let layer = PdfTextLayer;
            let extractor = DocumentExtractor::new(&layer, settings.row_format);
            let mut records = Vec::new();
            for file in &files {
                match extractor.extract(file) {
                    Ok(rs) => records.extend(rs),
                    Err(e) => warn!(path = %file.display(), "Skipping: {:#}", e),
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_table(&records);
            }
            Ok(())
        }
        Commands::Show { product, limit } => {
            let store = SnapshotStore::new(&settings.cache_file);
            let Some(records) = store.load().await? else {
                println!("No snapshot at '{}'. Run 'run' first.", settings.cache_file.display());
                return Ok(());
            };
            let needle = product.map(|p| p.to_lowercase());
            let rows: Vec<_> = records
                .into_iter()
                .filter(|r| match &needle {
                    Some(n) => r.product.to_lowercase().contains(n),
                    None => true,
                })
                .take(limit)
                .collect();
            print_table(&rows);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_pipeline(settings: &Settings) -> anyhow::Result<pipeline::RunStats> {
    let mut session = HttpSession::new(settings.request_timeout)?;
    pipeline::run_once(&mut session, Arc::new(PdfTextLayer), settings).await
}

/// Periodic updates plus the HTTP API, both stopped by Ctrl-C. A server
/// error (bad address, port in use) ends the updates too and is returned.
async fn serve(settings: &Settings, bind: &str, interval: Duration) -> anyhow::Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
        let _ = stop_tx.send(true);
    });

    let updates_stop_rx = stop_rx.clone();
    let updates = async {
        scheduler::run_periodic(interval, updates_stop_rx, || run_pipeline(settings)).await;
        Ok::<_, anyhow::Error>(())
    };
    let api = server::serve(bind, SnapshotStore::new(&settings.cache_file), stop_rx);

    tokio::try_join!(updates, api)?;
    Ok(())
}

fn print_table(records: &[snapshot::PriceRecord]) {
    if records.is_empty() {
        println!("No prices.");
        return;
    }

    println!(
        "{:>3} | {:<28} | {:<10} | {:<12} | {:>10} | {:>10} | {:>10} | {:>10} | {:<10}",
        "#", "Producto", "Unidad", "Mayorista", "Mínimo", "Máximo", "Moda", "Promedio", "Fecha"
    );
    println!("{}", "-".repeat(130));

    for (i, r) in records.iter().enumerate() {
        println!(
            "{:>3} | {:<28} | {:<10} | {:<12} | {:>10} | {:>10} | {:>10} | {:>10} | {:<10}",
            i + 1,
            truncate(&r.product, 28),
            truncate(&r.unit, 10),
            truncate(&r.wholesaler, 12),
            r.minimum,
            r.maximum,
            r.mode,
            r.average,
            r.effective_date
        );
    }

    println!("\n{} prices", records.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("Culantro de castilla", 8), "Culantro...");
        assert_eq!(truncate("Ñame", 8), "Ñame");
        assert_eq!(truncate("ÑÑÑÑÑ", 2), "ÑÑ...");
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from(["pima_prices", "serve", "--bind", "127.0.0.1:8080", "--layout", "six"]);
        assert!(matches!(cli.command, Commands::Serve { ref bind, interval_hours: 24 } if bind == "127.0.0.1:8080"));
        assert_eq!(cli.common.layout, config::LayoutArg::Six);

        let cli = Cli::parse_from(["pima_prices", "extract", "a.pdf", "b.pdf", "--json"]);
        assert!(matches!(cli.command, Commands::Extract { ref files, json: true } if files.len() == 2));
    }

    #[tokio::test]
    async fn serve_returns_bind_errors_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let pdf_dir = dir.path().join("pdfs");
        let cache_file = dir.path().join("datos_cache.json");
        let cli = Cli::parse_from([
            "pima_prices",
            "--bulletin-url",
            "http://127.0.0.1:9/boletin/",
            "--pdf-dir",
            pdf_dir.to_str().unwrap(),
            "--cache-file",
            cache_file.to_str().unwrap(),
            "run",
        ]);
        let settings = cli.common.settings().unwrap();

        let served = tokio::time::timeout(
            Duration::from_secs(10),
            serve(&settings, "not-an-address", Duration::from_secs(3600)),
        )
        .await
        .expect("serve kept running after the server failed");
        let err = served.unwrap_err();
        assert!(format!("{:#}", err).contains("invalid bind address"));
    }
}
