use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use httppipe::{Arguments, Server, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from(Arguments::parse());
    let shutdown = CancellationToken::new();

    let hits = Arc::new(AtomicUsize::new(0));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if hits.fetch_add(1, Ordering::Relaxed) == 0 {
                    eprintln!("Ctrl+C, shutting down (press again to force)");
                    shutdown.cancel();
                } else {
                    eprintln!("Force exiting.");
                    std::process::exit(130);
                }
            }
        });
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Ok(mut term) = signal(SignalKind::terminate()) {
                term.recv().await;
                eprintln!("SIGTERM, shutting down");
                shutdown.cancel();
            }
        });
    }

    Server::new(config).run(shutdown).await?;
    Ok(())
}
