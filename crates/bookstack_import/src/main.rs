use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bookstack_import_core::client::BookStackClient;
use bookstack_import_core::config::{
    ConfigOverrides, DEFAULT_CONFIG_FILENAME, load_config, resolve_config,
};
use bookstack_import_core::import::{FileStatus, ImportReport, run_import};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "bookstack-import",
    version,
    about = "Import a tree of exported Markdown notes into BookStack"
)]
struct Cli {
    #[arg(long, value_name = "PATH", help = "Config file (default: ./.bookstack-import.toml)")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Root of the Markdown export (overrides BOOKSTACK_IMPORT_PATH)")]
    import_path: Option<PathBuf>,
    #[arg(long, help = "Reuse already uploaded attachments with identical content on the same page")]
    dedup_attachments: bool,
    #[arg(long, help = "Do not rewrite exported arrow glyphs to ->")]
    keep_arrows: bool,
    #[arg(long, help = "Print the import report as JSON")]
    json: bool,
    #[arg(short, long, help = "Enable debug logging")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let file_config = load_config(&config_path)?;
    let overrides = ConfigOverrides {
        import_path: cli.import_path.clone(),
        dedup_attachments: cli.dedup_attachments,
        keep_arrows: cli.keep_arrows,
    };
    let resolved = resolve_config(&file_config, &overrides)?;

    let mut client = BookStackClient::connect(resolved.client)?;
    let report = run_import(&resolved.import, &mut client).with_context(|| {
        format!(
            "import of {} aborted",
            normalize_path(&resolved.import.import_path)
        )
    })?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();
}

fn print_report(report: &ImportReport) {
    println!("bookstack import");
    println!("import_path: {}", report.import_path.replace('\\', "/"));
    println!("discovered_files: {}", report.discovered_files);
    println!("imported_files: {}", report.imported_files);
    println!("created_pages: {}", report.created_pages);
    println!("updated_pages: {}", report.updated_pages);
    println!("failed_files: {}", report.failed_files);
    println!("skipped_files: {}", report.skipped_files);
    println!("uploaded_attachments: {}", report.uploaded_attachments);
    println!("reused_attachments: {}", report.reused_attachments);
    println!("request_count: {}", report.request_count);

    let failures: Vec<_> = report
        .files
        .iter()
        .filter(|outcome| outcome.status == FileStatus::Failed)
        .collect();
    if !failures.is_empty() {
        println!("failures:");
        for outcome in failures {
            println!(
                "  - {}: {}",
                outcome.relative_path,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    if !report.internal_links.is_empty() {
        println!("internal_links:");
        for link in &report.internal_links {
            println!("  - {}: [{}]({})", link.relative_path, link.label, link.target);
        }
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
