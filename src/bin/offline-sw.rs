use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use offline_sw::broadcast::ChannelMessage;
use offline_sw::format::{format_bytes, format_status};
use offline_sw::platform::HeadlessPlatform;
use offline_sw::reconcile::ReconcileReport;
use offline_sw::{AppConfig, Command, OfflineWorker, Request};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;

enum Action {
    Install,
    Activate,
    Command(Command),
    Fetch(String),
    Settings,
    Caches,
}

struct CliConfig {
    config_path: PathBuf,
    origin: Option<String>,
    action: Action,
}

#[tokio::main]
async fn main() -> offline_sw::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = parse_args();
    let mut app = AppConfig::load(&cli.config_path)?;
    if let Some(origin) = cli.origin {
        app.worker.origin = origin;
    }

    let worker = OfflineWorker::open(&app, Arc::new(HeadlessPlatform)).await?;

    match cli.action {
        Action::Install => {
            worker.install().await?;
            println!("Installed {} shell files", app.worker.shell_files.len());
        }
        Action::Activate => {
            let purged = worker.activate().await?;
            if purged.is_empty() {
                println!("No stale caches");
            }
            for name in purged {
                println!("Deleted {name}");
            }
        }
        Action::Command(command) => {
            let stop = CancellationToken::new();
            let logger = tokio::spawn(log_status(worker.subscribe_status(), stop.clone()));
            let report = worker.handle_command(command).await;
            stop.cancel();
            let _ = logger.await;
            match report? {
                Some(report) => print_report(&report),
                None => println!("Nothing to do"),
            }
        }
        Action::Fetch(url) => {
            let request = Request::parse(&url)?;
            match worker.fetch_deferred(&request).await? {
                Some(outcome) => {
                    println!(
                        "{} {} ({}) via {:?}",
                        outcome.response.status,
                        outcome.response.url,
                        format_bytes(outcome.response.body.len() as u64),
                        outcome.strategy
                    );
                    outcome.deferred.settle().await;
                }
                None => println!("{url} is not intercepted"),
            }
        }
        Action::Settings => {
            for setting in worker.settings().all().await? {
                match setting.updated_at {
                    Some(at) => println!("{} = {} (updated {at})", setting.key, setting.value),
                    None => println!("{} = {}", setting.key, setting.value),
                }
            }
        }
        Action::Caches => {
            let caches = worker.caches();
            for name in caches.cache_names().await? {
                let keys = caches.keys(&name).await?;
                let mut bytes = 0u64;
                for key in &keys {
                    if let Some(response) = caches.get(&name, key).await? {
                        bytes += response.body.len() as u64;
                    }
                }
                println!("{name}: {} entries, {}", keys.len(), format_bytes(bytes));
            }
        }
    }

    Ok(())
}

/// Logs status broadcasts until `stop` is cancelled, then logs whatever is
/// still queued. Returns the number of status lines logged.
async fn log_status(mut rx: Receiver<ChannelMessage>, stop: CancellationToken) -> usize {
    let mut logged = 0;
    loop {
        tokio::select! {
            biased;
            received = rx.recv() => match received {
                Ok(message) => logged += log_message(&message),
                Err(RecvError::Lagged(skipped)) => log::debug!("Skipped {skipped} status messages"),
                Err(RecvError::Closed) => return logged,
            },
            () = stop.cancelled() => break,
        }
    }
    loop {
        match rx.try_recv() {
            Ok(message) => logged += log_message(&message),
            Err(TryRecvError::Lagged(skipped)) => log::debug!("Skipped {skipped} status messages"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return logged,
        }
    }
}

fn log_message(message: &ChannelMessage) -> usize {
    message.as_status().map_or(0, |status| {
        log::info!("{}", format_status(status));
        1
    })
}

fn print_report(report: &ReconcileReport) {
    let counts = &report.counts;
    println!(
        "{}: {} downloaded, {} failed, {} deleted",
        if report.cancelled { "Cancelled" } else { "Done" },
        counts.downloaded,
        counts.download_failed,
        counts.deleted
    );
}

// ============================================================================
// CLI Parsing
// ============================================================================

fn parse_args() -> CliConfig {
    let args: Vec<_> = env::args().skip(1).collect();

    let mut config_path = AppConfig::default_path();
    let mut origin = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    eprintln!("Error: --config requires a value");
                    std::process::exit(1);
                }
            }
            "--origin" => {
                i += 1;
                if i < args.len() {
                    origin = Some(args[i].clone());
                } else {
                    eprintln!("Error: --origin requires a value");
                    std::process::exit(1);
                }
            }
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => positional.push(arg.to_string()),
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let action = match positional.first().map(String::as_str) {
        Some("install") => Action::Install,
        Some("activate") => Action::Activate,
        Some("enable") => Action::Command(Command::EnableOffline),
        Some("continue") => Action::Command(Command::ContinueDownload),
        Some("disable") => Action::Command(Command::DisableOffline),
        Some("fetch") => match positional.get(1) {
            Some(url) => Action::Fetch(url.clone()),
            None => {
                eprintln!("Error: fetch requires a URL");
                std::process::exit(1);
            }
        },
        Some("settings") => Action::Settings,
        Some("caches") => Action::Caches,
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_usage();
            std::process::exit(1);
        }
        None => {
            print_usage();
            std::process::exit(0);
        }
    };

    CliConfig {
        config_path,
        origin,
        action,
    }
}

fn print_usage() {
    eprintln!("Usage: offline-sw [OPTIONS] <COMMAND>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  install             Pre-cache the app shell");
    eprintln!("  activate            Delete stale caches and upgrade settings");
    eprintln!("  enable              Turn offline mode on and download the bundle");
    eprintln!("  continue            Resume the bundle download if offline mode is on");
    eprintln!("  disable             Turn offline mode off and delete the bundle");
    eprintln!("  fetch <url>         Serve one request through the cache router");
    eprintln!("  settings            Show stored settings");
    eprintln!("  caches              Show cache namespaces and their sizes");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH> Config file (default: {})", AppConfig::default_path().display());
    eprintln!("      --origin <URL>  Override the site origin");
    eprintln!("  -h, --help          Show this help");
}
