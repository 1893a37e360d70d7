//! CRM Uploader - Main entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crm_common::logging::{init_logging, LogConfig, LogLevel};
use tokio::signal;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crm_uploader::{
    config::{Config, DEFAULT_LISTENER_ADDR},
    signal as listener, HttpSink, PgRecordSource, RecordSource, RecordingSink, RemoteSink,
    SignalClient, SignalError, Uploader,
};

#[derive(Parser, Debug)]
#[command(name = "crm-uploader")]
#[command(author, version, about = "Upload staged customer records to the CRM")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the uploader and its signal listener
    Run {
        /// Apply database migrations before starting
        #[arg(long)]
        migrate: bool,

        /// Accept every upload locally instead of posting to the CRM
        #[arg(long)]
        dry_run: bool,
    },

    /// Tell a running uploader that new records are staged
    Signal {
        /// Listener address of the running uploader
        #[arg(short, long, env = "CRM_LISTENER_ADDR", default_value = DEFAULT_LISTENER_ADDR)]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("crm-uploader")
        .filter_directives(if cli.verbose {
            "crm_uploader=debug,tower_http=debug,sqlx=warn"
        } else {
            "crm_uploader=info,tower_http=info,sqlx=warn"
        })
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run { migrate, dry_run } => run(migrate, dry_run).await,
        Command::Signal { addr } => send_signal(&addr).await,
    }
}

async fn run(migrate: bool, dry_run: bool) -> Result<()> {
    info!("Starting CRM uploader");

    let config = Config::load().context("Failed to load configuration")?;
    let listen_addr = config.listener_addr()?;

    let source = PgRecordSource::connect(&config.database)
        .await
        .context("Failed to connect to the staging database")?;

    if migrate {
        source.migrate().await.context("Failed to run migrations")?;
    }

    let source: Arc<dyn RecordSource> = Arc::new(source);
    let sink: Arc<dyn RemoteSink> = if dry_run {
        warn!("Dry run - uploads are accepted locally and nothing is sent to the CRM");
        Arc::new(RecordingSink::new())
    } else {
        let sink = HttpSink::new(&config.crm)?;
        info!("Uploading to {}", sink.endpoint());
        Arc::new(sink)
    };

    let handle = Uploader::new(config.uploader, source, sink)
        .start()
        .context("Failed to start uploader")?;

    // The listener shares the uploader's shutdown token
    let mut server = tokio::spawn(listener::serve(
        listen_addr,
        listener::router(handle.listener_state()),
        handle.shutdown_token(),
    ));

    // Some(..) when the listener ended before a shutdown was requested
    let early_exit = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut server => Some(listener_result(result)),
    };

    handle.stop().await;

    match early_exit {
        Some(Err(e)) => return Err(e),
        Some(Ok(())) => anyhow::bail!("Signal listener stopped before shutdown was requested"),
        None => listener_result(server.await)?,
    }

    info!("CRM uploader shut down gracefully");
    Ok(())
}

/// Map the listener task's outcome to the process result
fn listener_result(result: Result<std::io::Result<()>, JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Signal listener failed: {}", e);
            Err(anyhow::Error::from(e).context("Signal listener failed"))
        },
        Err(e) => {
            error!("Signal listener task failed: {}", e);
            Err(anyhow::Error::from(e).context("Signal listener task failed"))
        },
    }
}

async fn send_signal(addr: &str) -> Result<()> {
    let client = SignalClient::new(addr)?;

    match client.signal().await {
        Ok(()) => info!("Uploader signalled"),
        Err(SignalError::Busy) => info!("Uploader already has a signal pending"),
        Err(e) => {
            return Err(anyhow::Error::from(e)
                .context(format!("Failed to signal uploader at {}", client.url())));
        },
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_clean_listener_exit_is_ok() {
        assert!(listener_result(Ok(Ok(()))).is_ok());
    }

    #[test]
    fn test_bind_failure_is_an_error() {
        let err = io::Error::new(io::ErrorKind::AddrInUse, "address already in use");
        let result = listener_result(Ok(Err(err)));

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "Signal listener failed");
        assert_eq!(
            err.root_cause().downcast_ref::<io::Error>().unwrap().kind(),
            io::ErrorKind::AddrInUse
        );
    }

    #[tokio::test]
    async fn test_panicked_listener_task_is_an_error() {
        let task = tokio::spawn(async {
            if true {
                panic!("listener crashed");
            }
            Ok::<(), io::Error>(())
        });
        let err = listener_result(task.await).unwrap_err();
        assert_eq!(err.to_string(), "Signal listener task failed");
    }

    #[tokio::test]
    async fn test_listener_on_taken_port_fails_run() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let (signals, _rx) = crm_uploader::wake::signal_slot();
        let (_status_tx, status_rx) =
            crm_uploader::scheduler::status_channel(std::time::Duration::from_secs(1));
        let state = listener::ListenerState::new(signals, status_rx, Arc::default());

        let server = tokio::spawn(listener::serve(
            addr,
            listener::router(state),
            tokio_util::sync::CancellationToken::new(),
        ));

        assert!(listener_result(server.await).is_err());
    }
}
