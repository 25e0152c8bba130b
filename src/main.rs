use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context as _, Result};
use clap::Parser;

use varpoint::api::build_router;
use varpoint::config::{AppConfig, load_required_yaml};
use varpoint::context::ServiceContext;
use varpoint::logging;
use varpoint::monitor::monitor_files;

#[derive(Parser)]
#[command(name = "varpoint", about = "Read-only federated genomic data node", version)]
struct Cli {
    /// Directory holding app.yaml, fdp.yaml and the beacon-*.yaml files
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Address to serve HTTP on
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_config: AppConfig = match load_required_yaml(&cli.config_dir, "app.yaml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&app_config.logger) {
        eprintln!("[ERROR] {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli, app_config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Startup failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, app_config: AppConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to create the runtime")?;
    runtime.block_on(serve(cli, app_config))
}

async fn serve(cli: Cli, app_config: AppConfig) -> Result<()> {
    let ctx = Arc::new(
        ServiceContext::load(&app_config, &cli.config_dir)
            .await
            .context("Cannot build the service state")?,
    );

    // Data directory and object-store monitoring take place in a dedicated
    // thread owning all registry writes:
    let stop = Arc::new(AtomicBool::new(false));
    let monitor_handle = {
        let data_dir = ctx.data_dir.clone();
        let registry = Arc::clone(&ctx.registry);
        let s3_config = ctx.s3_sync.clone();
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("data-monitor".to_owned())
            .spawn(move || {
                monitor_files(&data_dir, registry, s3_config.as_ref(), &stop);
            })
            .context("Failed to spawn the data-monitor thread")?
    };

    log_startup_summary(&ctx);

    let router = build_router(Arc::clone(&ctx));
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("Cannot listen on {}", cli.listen))?;
    tracing::info!("Serving on http://{}", cli.listen);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    stop.store(true, Ordering::Relaxed);
    if monitor_handle.join().is_err() {
        tracing::warn!("The data-monitor thread ended with a panic");
    }

    Ok(())
}

fn log_startup_summary(ctx: &ServiceContext) {
    tracing::info!("Data directory: {}", ctx.data_dir.display());
    for (name, enabled) in [
        ("aggregated Beacon", ctx.aggregated.is_some()),
        ("sensitive Beacon", ctx.sensitive.is_some()),
        ("FAIR Data Point", ctx.fdp.is_some()),
        (
            "S3 synchronisation",
            ctx.s3_sync.as_ref().is_some_and(|config| config.is_enabled()),
        ),
    ] {
        let state = if enabled { "enabled" } else { "disabled" };
        tracing::info!("Module {name}: {state}");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for the shutdown signal: {e}");
        return;
    }
    tracing::info!("Shutdown requested; draining in-flight requests");
}
