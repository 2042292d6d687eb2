use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use cfddns::config::{self, Settings};
use cfddns::dns::{CloudflareClient, DnsProvider};
use cfddns::ip::IpResolver;
use cfddns::notify::create_notifier;
use cfddns::reconcile::Reconciler;
use cfddns::state::FileStateStore;
use cfddns::{logs, Result};

#[derive(Parser)]
#[command(name = "cfddns")]
#[command(about = "Cloudflare DDNS reconciler - keeps a DNS A record synchronized with the host's public IP")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation cycle and exit (the default action)
    Run,

    /// Verify the API token, then print the current public IP and DNS record
    Check,

    /// Show configuration file location and contents
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_cycle(cli.config.as_deref()).await,
        Commands::Check => match check_status(cli.config.as_deref()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("cfddns: {e}");
                ExitCode::FAILURE
            }
        },
        Commands::Config => {
            show_config(cli.config.as_deref());
            ExitCode::SUCCESS
        }
    }
}

/// One full reconciliation pass. Exit 0 on a clean update or no-op, 1 on an
/// aborted cycle, 2 when the configuration is unusable.
async fn run_cycle(config_path: Option<&std::path::Path>) -> ExitCode {
    let settings = match Settings::load(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("cfddns: {e}");
            return ExitCode::from(2);
        }
    };
    logs::init(&settings.logging);

    let reconciler = match build_reconciler(&settings) {
        Ok(reconciler) => reconciler,
        Err(e) => {
            eprintln!("cfddns: {e}");
            return ExitCode::from(2);
        }
    };

    let outcome = reconciler.run_cycle().await;
    if outcome.is_success() {
        info!(
            changed = outcome.changed,
            ip = ?outcome.resolved_ip,
            "reconciliation cycle complete"
        );
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn build_reconciler(settings: &Settings) -> Result<Reconciler> {
    let token = config::api_token()?;
    let resolver = IpResolver::from_settings(settings)?;
    let provider = Arc::new(CloudflareClient::new(token, settings)?);
    let store = FileStateStore::new(settings.state.path.clone());
    let notifier = create_notifier(&settings.notification)?;

    Ok(Reconciler::new(resolver, provider, store, notifier, settings))
}

async fn check_status(config_path: Option<&std::path::Path>) -> Result<()> {
    let settings = Settings::load(config_path)?;
    logs::init(&settings.logging);

    let token = config::api_token()?;
    let client = CloudflareClient::new(token, &settings)?;

    print!("API token: ");
    match client.verify_token().await {
        Ok(()) => println!("valid"),
        Err(e) => println!("INVALID - {e}"),
    }

    let resolver = IpResolver::from_settings(&settings)?;
    print!("Public IP: ");
    let public_ip = match resolver.resolve().await {
        Ok(ip) => {
            println!("{ip}");
            Some(ip)
        }
        Err(e) => {
            println!("error - {e}");
            None
        }
    };

    print!("DNS record {}: ", settings.record_name);
    match client.fetch_record().await {
        Ok(record) => {
            println!("{}", record.content);
            match (public_ip, record.current_ip()) {
                (Some(ip), Some(record_ip)) if ip == record_ip => {
                    println!("Status: in sync");
                }
                (Some(_), _) => println!("Status: out of sync, next run will update"),
                _ => {}
            }
        }
        Err(e) => println!("error - {e}"),
    }

    let store = FileStateStore::new(settings.state.path.clone());
    let state = store.load();
    if state.total_runs > 0 {
        println!(
            "Runs: {} total, {} updates, {} failures, last run {}",
            state.total_runs,
            state.successful_updates,
            state.failed_attempts,
            state
                .last_run
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
    }

    Ok(())
}

fn show_config(config_path: Option<&std::path::Path>) {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(Settings::config_path);

    println!("Configuration file location: {}\n", path.display());

    match Settings::load(Some(&path)) {
        Ok(settings) => match toml::to_string_pretty(&settings) {
            Ok(rendered) => {
                println!("Current configuration:\n");
                println!("{rendered}");
            }
            Err(e) => eprintln!("cfddns: failed to render configuration: {e}"),
        },
        Err(_) => {
            println!("Configuration file not found or invalid.");
            println!("\nCreate a configuration file at the location above.");
            println!("Example configuration:\n");
            println!(
                r#"domain = "lab.example.com"

[cloudflare]
zone_id = "auto-detect"

[notification]
webhook_url = "https://hooks.example.com/ddns"

[state]
path = "/var/lib/cfddns/state.json"

[logging]
directory = "/var/log/cfddns"
level = "info"
max_files = 7
"#
            );
            println!(
                "The API token is read from the {} environment variable.",
                config::TOKEN_ENV
            );
        }
    }
}
