use clap::Parser;
use devserve::config::{Config, DEFAULT_PORT};
use devserve::server::{LaunchRequest, LifecycleManager, Notification, ServerType};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

/// Serve a project folder until Ctrl-C
#[derive(Parser, Debug)]
#[command(name = "serve_folder", version)]
struct Args {
    /// Project folder
    folder: PathBuf,

    /// Port to bind
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Server type: static, flask, django or php
    #[arg(short = 't', long = "type", default_value = "static")]
    server_type: ServerType,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=devserve=debug shows the manager's own tracing
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let (manager, mut notifications) = LifecycleManager::new(config)?;

    let printer = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            match notification {
                Notification::LogLine { tag, text, .. } => println!("{} {}", tag, text),
                Notification::StateChanged {
                    status,
                    addresses: Some(addresses),
                } => println!("== {} at {}", status, addresses.join(", ")),
                Notification::StateChanged { status, .. } => println!("== {}", status),
                Notification::Error { kind, message } => eprintln!("!! {}: {}", kind, message),
                Notification::Terminated { exit, .. } => {
                    eprintln!(
                        "!! server terminated unexpectedly ({})",
                        exit.as_deref().unwrap_or("unknown status")
                    );
                }
            }
        }
    });

    let request = LaunchRequest::new(&args.folder, args.port, args.server_type);
    let session = manager.start(request).await?;
    println!("Serving {} on:", args.folder.display());
    for address in &session.addresses {
        println!("  {}", address);
    }
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    manager.shutdown().await;

    drop(manager);
    printer.abort();
    tracing::info!("serve_folder finished");
    Ok(())
}
