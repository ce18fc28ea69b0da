use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

use dragnet::config::{self, Config};
use dragnet::db::models::ScanStatus;
use dragnet::db::Store;
use dragnet::engine;
use dragnet::progress::{ModuleStatus, ProgressEvent};

/// Dragnet: staged external reconnaissance for a single domain.
///
/// Discovers subdomains from public intelligence sources, probes ports and
/// HTTP services, enriches with third-party data, and captures screenshots
/// of live web services — everything lands in one queryable database.
#[derive(Parser)]
#[command(name = "dragnet", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Run a full scan against a target domain
    Scan {
        /// The domain to scan (e.g. example.com)
        target: String,

        /// Use a specific scan identifier instead of a generated one
        #[arg(long)]
        scan_id: Option<String>,
    },

    /// List recent scans
    List {
        /// Maximum number of scans to show
        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Show stored findings for a target
    Findings {
        target: String,

        /// Filter by module ("subdomain" for a whole category,
        /// "subdomain/crtsh" for one source)
        #[arg(long)]
        module: Option<String>,

        /// Filter by scan identifier
        #[arg(long)]
        scan_id: Option<String>,
    },

    /// Show all unique subdomains discovered for a target
    Subdomains { target: String },

    /// Wipe all scan history and findings
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present (API keys may live there)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load(&cli.config);
    config::init_logging(&config.logging);

    match cli.command {
        Commands::Init => {
            Store::open(&config.database)?;
            println!("Database initialized at: {}", config.database);
            println!("\nNext step: enable sources in {} and run:", cli.config);
            println!("  dragnet scan <target>");
        }

        Commands::Scan { target, scan_id } => {
            if !dragnet::util::is_valid_domain(&target) {
                anyhow::bail!("'{target}' does not look like a valid domain name");
            }
            run_scan_command(&cli.config, &target, scan_id).await?;
        }

        Commands::List { limit } => {
            let store = Store::open(&config.database)?;
            let scans = store.list_scans(limit).await?;
            if scans.is_empty() {
                println!("No scans recorded yet.");
            }
            for scan in scans {
                let status = match scan.status {
                    ScanStatus::Completed => scan.status.as_str().green(),
                    ScanStatus::Failed => scan.status.as_str().red(),
                    ScanStatus::Running => scan.status.as_str().yellow(),
                    _ => scan.status.as_str().normal(),
                };
                println!(
                    "{}  {}  {}  {}",
                    scan.id.dimmed(),
                    scan.target.bold(),
                    status,
                    scan.start_time.unwrap_or_default(),
                );
            }
        }

        Commands::Findings {
            target,
            module,
            scan_id,
        } => {
            let store = Store::open(&config.database)?;
            let findings = store
                .get_findings(&target, module.as_deref(), scan_id.as_deref())
                .await?;
            println!("{} findings for {}", findings.len(), target.bold());
            for finding in findings {
                println!(
                    "[{}] {} ({})",
                    finding.kind.as_str().cyan(),
                    finding.module,
                    finding.timestamp.dimmed(),
                );
                println!("{}", serde_json::to_string_pretty(&finding.data)?);
            }
        }

        Commands::Subdomains { target } => {
            let store = Store::open(&config.database)?;
            let subdomains = store.get_unique_subdomains(&target).await?;
            println!(
                "{} unique subdomains for {}",
                subdomains.len(),
                target.bold()
            );
            for subdomain in subdomains {
                println!("  {subdomain}");
            }
        }

        Commands::Clear => {
            let store = Store::open(&config.database)?;
            store.clear_history().await?;
            println!("Scan history cleared.");
        }
    }

    Ok(())
}

/// Foreground scan with live progress rendering.
async fn run_scan_command(config_path: &str, target: &str, scan_id: Option<String>) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}").unwrap());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Scanning {target}..."));
    let spinner = Arc::new(spinner);

    let printer_spinner = spinner.clone();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Phase { phase, modules } => {
                    printer_spinner.set_message(phase.clone());
                    printer_spinner
                        .println(format!("{} [{}]", phase.bold(), modules.join(", ").dimmed()));
                }
                ProgressEvent::ModuleEnd {
                    module,
                    status,
                    error,
                } => match status {
                    ModuleStatus::Completed => {
                        printer_spinner.println(format!("  {} {module}", "ok".green()));
                    }
                    ModuleStatus::Failed => {
                        printer_spinner.println(format!(
                            "  {} {module}: {}",
                            "failed".red(),
                            error.unwrap_or_default()
                        ));
                    }
                },
                ProgressEvent::Status {
                    status: ScanStatus::Completed,
                    summary,
                    ..
                } => {
                    printer_spinner.println(format!("\n{}", "Scan completed".green().bold()));
                    if let Some(summary) = summary {
                        for (kind, count) in summary {
                            printer_spinner.println(format!("  {kind}: {count}"));
                        }
                    }
                }
                ProgressEvent::Error { message } => {
                    printer_spinner.println(format!("{} {message}", "error:".red()));
                }
                _ => {}
            }
        }
    });

    let result = engine::run_scan(target, Some(config_path), scan_id, Some(tx)).await;
    let _ = printer.await;
    spinner.finish_and_clear();
    result
}
