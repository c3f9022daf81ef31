//! `roam serve` runs the controller and its workers.
//! `roam exec` runs one job from stdin; worker slots spawn it per job.

use std::process::ExitCode;

use roam::{LogFormat, Roam, ServerConfig, ServerError, callables, telemetry};
use tokio::io::BufReader;
use tokio::net::TcpListener;

const USAGE: &str = "usage: roam [serve | exec]";

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let command = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    let runtime = match command.as_str() {
        "serve" => tokio::runtime::Builder::new_multi_thread().enable_all().build(),
        "exec" => tokio::runtime::Builder::new_current_thread().enable_all().build(),
        "-h" | "--help" | "help" => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        other => {
            eprintln!("unknown command {other:?}\n{USAGE}");
            return ExitCode::from(2);
        }
    };
    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        match command.as_str() {
            "exec" => exec().await,
            _ => serve().await,
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "roam exited with an error");
            eprintln!("roam: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> Result<(), ServerError> {
    let config = ServerConfig::from_env()?;
    telemetry::init(config.log_format);
    tracing::info!(addr = %config.bind_addr(), db = %config.db.endpoint, "Loaded server configuration");

    let roam = Roam::start(&config).await?;
    let listener = TcpListener::bind(config.bind_addr()).await?;
    roam.serve(listener, shutdown_signal()).await
}

/// Run the one job written to stdin, answering on stdout.
async fn exec() -> Result<(), ServerError> {
    let format = std::env::var("ROAM_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(LogFormat::Text);
    telemetry::init(format);

    let registry = callables::registry();
    let stdin = BufReader::new(tokio::io::stdin());
    actors::protocol::serve_exec(&registry, stdin, tokio::io::stdout()).await?;
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
