use std::sync::Arc;

use httppipe_http::connection::HttpConnection;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::handler::PipeHandler;

/// Accepts connections and serves every one of them with the same [`PipeHandler`].
pub struct Server {
    config: ServerConfig,
    handler: Arc<PipeHandler>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let handler = Arc::new(PipeHandler::new(config.pipe));
        Self { config, handler }
    }

    /// Binds the configured address and serves until `shutdown` is cancelled.
    ///
    /// Connections already accepted keep running on their own tasks after shutdown.
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind.as_str()).await.inspect_err(|e| {
            error!(address = %self.config.bind, cause = %e, "bind server error");
        })?;
        info!(address = %listener.local_addr()?, "start listening");

        self.serve(listener, shutdown).await;
        Ok(())
    }

    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            let (tcp_stream, remote_addr) = select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stop accepting");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok(stream_and_addr) => stream_and_addr,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            let handler = self.handler.clone();
            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let connection = HttpConnection::new(reader, writer);
                match connection.process(handler).await {
                    Ok(()) => info!(%remote_addr, "finished process, connection shutdown"),
                    Err(e) => error!(%remote_addr, cause = %e, "service has error, connection shutdown"),
                }
            });
        }
    }
}
