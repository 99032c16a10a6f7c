//! passthrough: negotiate GPU/input device pass-through for a Proxmox container.

use clap::{Parser, Subcommand};
use passthrough::progress::log_progress;
use passthrough::{
    check_host, CapabilityCatalog, ChannelProgressReporter, ContainerConfigStore,
    ContainerControl, JsonReportWriter, NegotiationEngine, NegotiationProgress, NegotiatorConfig,
    PctLifecycle,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "passthrough",
    version,
    about = "Negotiate GPU and input device pass-through for a system container"
)]
struct Args {
    /// Config file (default: ./passthrough.toml, then /etc/passthrough/passthrough.toml)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Probe capabilities one by one and commit the largest bootable set
    Negotiate {
        /// Container identifier
        ctid: String,

        /// Write the negotiation report as JSON to this path
        #[arg(long = "report")]
        report: Option<PathBuf>,
    },
    /// Check which host devices can be offered
    Check,
    /// Show container status and the fragments currently persisted
    Status {
        ctid: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default to info level if RUST_LOG not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let config = NegotiatorConfig::load(args.config.as_deref())?;

    match args.command {
        Commands::Negotiate { ctid, report } => negotiate(&config, &ctid, report).await,
        Commands::Check => {
            check(&config);
            Ok(())
        }
        Commands::Status { ctid } => status(&config, &ctid).await,
    }
}

async fn negotiate(
    config: &NegotiatorConfig,
    ctid: &str,
    report_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("╔════════════════════════════════════════════════════════════════╗");
    eprintln!("║  Device pass-through negotiation                               ║");
    eprintln!("╚════════════════════════════════════════════════════════════════╝");
    eprintln!("  Container: {}", ctid);
    eprintln!("  Config: {}", config.container_config_path(ctid).display());

    let control: Arc<dyn ContainerControl> = Arc::new(PctLifecycle::from_config(&config.runtime));
    let (progress_tx, progress_rx) = tokio::sync::mpsc::channel::<NegotiationProgress>(32);
    let progress_task = tokio::spawn(log_progress(progress_rx));

    let mut engine = NegotiationEngine::from_config(config, control, ctid)?.with_progress(Arc::new(
        ChannelProgressReporter::with_container_id(progress_tx, ctid.to_string()),
    ));
    if let Some(path) = report_path {
        engine = engine.with_provisioner(Arc::new(JsonReportWriter::new(path)));
    }

    let result = engine.negotiate(ctid).await;
    drop(engine);
    let _ = progress_task.await;

    match result {
        Ok(report) => {
            eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            eprintln!("  Granted: {}", report.granted.join(", "));
            eprintln!("  Excluded: {}", report.excluded.join(", "));
            eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(aborted) => {
            eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            eprintln!("  FAILED: {}", aborted.error);
            for attempt in &aborted.attempts {
                eprintln!(
                    "    {} ({:?}): {}",
                    attempt.capability, attempt.stage, attempt.excerpt
                );
            }
            eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            Err(aborted.into())
        }
    }
}

fn check(config: &NegotiatorConfig) {
    let result = check_host(config);
    for item in &result.checks {
        eprintln!(
            "  [{}] {} - {}",
            if item.passed { "ok" } else if item.required { "FAIL" } else { "skip" },
            item.name,
            item.message
        );
    }
    let unavailable = result.unavailable();
    if !unavailable.is_empty() {
        eprintln!("  Capabilities that will be skipped: {}", unavailable.join(", "));
    }
    if let Some(msg) = result.error_message() {
        eprintln!("{}", msg);
        std::process::exit(1);
    }
}

async fn status(config: &NegotiatorConfig, ctid: &str) -> Result<(), Box<dyn std::error::Error>> {
    let control = PctLifecycle::from_config(&config.runtime);
    let state = control.status(ctid).await?;
    let store = ContainerConfigStore::new(config.container_config_path(ctid));
    let catalog = CapabilityCatalog::from_devices(&config.devices);
    let fragments: Vec<_> = store
        .fragments()?
        .into_iter()
        .map(|name| {
            let entry = catalog.get(&name);
            serde_json::json!({
                "capability": name,
                "known": entry.is_some(),
                "required": entry.map(|e| e.required).unwrap_or(false),
            })
        })
        .collect();

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "container_id": ctid,
            "status": state,
            "fragments": fragments,
        }))?
    );
    Ok(())
}
